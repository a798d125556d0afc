use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::serial::error::SerialPortError;

/// Splits the bytes coming off the device into lines.
///
/// Sensors usually end lines with `\r\n`, so a carriage return right before
/// the delimiter is dropped along with it.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    // Bytes before this index are known not to hold a delimiter.
    scanned: usize,
    delimiter: u8,
}

impl LinesCodec {
    /// Split on the given byte.
    pub fn new(delimiter: u8) -> Self {
        Self {
            scanned: 0,
            delimiter,
        }
    }

    /// Yield strings instead of bytes.
    /// Invalid UTF-8 either fails the line or gets replacement characters, depending on `lossy`.
    pub fn into_string_codec(self, lossy: bool) -> StringCodec {
        StringCodec {
            lossy,
            wrapped: self,
        }
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n')
    }
}

impl Decoder for LinesCodec {
    type Item = Vec<u8>;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(offset) = src[self.scanned..]
            .iter()
            .position(|&byte| byte == self.delimiter)
        else {
            // The same buffer comes back with more data appended.
            self.scanned = src.len();
            return Ok(None);
        };

        let end = self.scanned + offset;
        self.scanned = 0;

        let mut line = src.split_to(end).to_vec();
        src.advance(1);

        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Ok(Some(line))
    }
}

/// A [`LinesCodec`] yielding strings.
#[derive(Debug, Clone)]
pub struct StringCodec {
    lossy: bool,
    wrapped: LinesCodec,
}

impl Decoder for StringCodec {
    type Item = String;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.wrapped.decode(src)? {
            Some(bytes) => {
                if self.lossy {
                    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
                } else {
                    Ok(Some(String::from_utf8(bytes)?))
                }
            }
            None => Ok(None),
        }
    }
}
