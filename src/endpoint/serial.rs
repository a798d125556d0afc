//! A serial port endpoint.

use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::FramedRead;
use tracing::debug;

use super::{Endpoint, LineStream};
use crate::{error::Error, serial::codecs::lines::LinesCodec};

/// A physical serial port.
#[derive(Debug, Clone)]
pub struct SerialEndpoint {
    path: String,
    baud: u32,
}

impl SerialEndpoint {
    /// The path should likely be along the lines of `/dev/ttyACMx` on unix, and `COMx` on Windows.
    pub fn new(path: &str, baud: u32) -> Self {
        Self {
            path: path.to_owned(),
            baud,
        }
    }
}

impl Endpoint for SerialEndpoint {
    fn id(&self) -> &str {
        &self.path
    }

    fn baud(&self) -> u32 {
        self.baud
    }

    fn open(&self) -> Result<LineStream, Error> {
        debug!(%self.path, %self.baud, "Opening port");

        let serial_stream = tokio_serial::new(&self.path, self.baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| Error::DeviceUnavailable {
                device: self.path.clone(),
                problem: e.to_string(),
            })?;

        // After a read or decode error the framed stream yields that error once and then ends,
        // which is how a vanished device shows up.
        let lines = FramedRead::new(serial_stream, LinesCodec::default().into_string_codec(true));

        Ok(Box::pin(lines))
    }
}
