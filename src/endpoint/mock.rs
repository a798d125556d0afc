//! A mock endpoint.
//! Lines pushed into the mock come out of the opened stream.
//!
//! Useful for testing implementations which would use
//! regular serial ports- but faster and more reliable.

use super::{Endpoint, LineStream};
use crate::{error::Error, mock::MockEndpoint};

impl Endpoint for MockEndpoint {
    fn id(&self) -> &str {
        self.name()
    }

    fn baud(&self) -> u32 {
        self.baud_rate()
    }

    fn open(&self) -> Result<LineStream, Error> {
        self.try_open()
    }
}
