/// Serial port related errors.
pub mod error;

/// Codecs for decoding lines from the wire.
pub mod codecs;
