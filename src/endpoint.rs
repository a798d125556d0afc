use std::pin::Pin;

use futures::Stream;

use crate::{error::Error, serial::error::SerialPortError};

pub(crate) mod mock;
pub mod serial;

/// Lines as they arrive from an open device.
///
/// The stream ending means the device went away.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, SerialPortError>> + Send>>;

/// A device which produces lines of text, such as a serial port.
pub trait Endpoint: Send + Sync {
    /// Some identifier of the device, e.g. `/dev/ttyACM0` or `COM3`.
    fn id(&self) -> &str;

    /// The baud rate used when opening.
    fn baud(&self) -> u32;

    /// Try to open the device once.
    fn open(&self) -> Result<LineStream, Error>;
}
