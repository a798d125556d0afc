use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[cfg(windows)]
const DEFAULT_DEVICE: &str = "COM3";

#[cfg(not(windows))]
const DEFAULT_DEVICE: &str = "/dev/ttyACM0";

/// The default port to serve HTTP on.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// The configuration used for running the bridge.
///
/// All fields may be omitted from a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The serial port.
    /// Likely "/dev/ttyACMx" or "COMx".
    pub device: String,

    /// The baud rate of the serial port.
    pub baud: u32,

    /// How long to wait between attempts to open the serial port.
    pub retry_seconds: u64,

    /// Upper bound for waiting on a single line.
    pub read_timeout_ms: u64,

    /// Where CSV logs go.
    pub log_dir: PathBuf,

    /// An explicit CSV log file.
    /// If not set, a time-stamped file in [`Config::log_dir`] is used.
    pub log_file: Option<PathBuf>,

    /// Reopen the serial port automatically when it disappears.
    /// If false, a reconnect must be requested.
    pub reconnect_on_disconnect: bool,

    /// Which port the HTTP server listens on.
    pub http_port: u16,

    /// Where the index page is served from.
    pub static_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.into(),
            baud: 115_200,
            retry_seconds: 2,
            read_timeout_ms: 1000,
            log_dir: "logs".into(),
            log_file: None,
            reconnect_on_disconnect: true,
            http_port: DEFAULT_HTTP_PORT,
            static_dir: "static".into(),
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Not valid RON: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            device: "COM3".into(),
            log_file: Some("logs/session.csv".into()),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p.as_ref()).map_err(|e| {
            Error::BadConfig(format!("Could not read {:?}: {e}", p.as_ref()))
        })?;

        Self::deserialize(&s)
    }

    /// The backoff between attempts to open the device.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_seconds)
    }

    /// Upper bound for a single read.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Check that the values make sense.
    pub fn validate(&self) -> Result<(), Error> {
        if self.device.trim().is_empty() {
            return Err(Error::BadConfig("The device must be named".into()));
        }

        if self.baud == 0 {
            return Err(Error::BadConfig("The baud rate must be above zero".into()));
        }

        if self.retry_seconds == 0 {
            return Err(Error::BadConfig(
                "The retry interval must be at least one second".into(),
            ));
        }

        if self.read_timeout_ms == 0 {
            return Err(Error::BadConfig(
                "The read timeout must be above zero, reads would never wait for data".into(),
            ));
        }

        Ok(())
    }
}
