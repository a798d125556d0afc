#![deny(missing_docs)]

//! This crate bridges a single serial sensor to any number of observers.
//!
//! The device is expected to print lines of six comma separated numbers
//! (acceleration and gyroscope, three axes each).
//! Every line is timestamped on arrival, appended to a CSV log, and the raw text
//! is broadcast to all connected websocket subscribers.
//!
//! The device may disappear and reappear. Opening is retried with a fixed backoff
//! until it succeeds, and a reconnect can be requested at any time.

/// Turns raw lines into timestamped records.
pub mod parser;

/// The append-only CSV log.
pub mod csv_logger;

/// Fans lines out to subscribers.
pub mod hub;

/// The device connection and its lifecycle.
pub mod connection;

/// The read loop tying device, log and subscribers together.
pub mod pipeline;

/// Something which produces lines, such as a serial port.
pub mod endpoint;

/// Mocked serial port driver.
pub mod mock;

/// Serial port framing.
pub mod serial;

/// Code relating to setting up the HTTP server.
pub mod server;

/// Handles incoming websockets.
pub(crate) mod websocket;

/// Relates to config files.
pub mod config;

/// The command line interface.
pub mod cli;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;
