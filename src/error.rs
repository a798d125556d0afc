use std::io;

use thiserror::Error;

/// Errors thay may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration is not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The device could not be opened.
    /// Opening is retried, so this is only seen by the retry loop itself.
    #[error("The device `{device}` is unavailable. Problem: {problem}")]
    DeviceUnavailable {
        /// Which device we tried to open.
        device: String,

        /// Why it could not be opened.
        problem: String,
    },

    /// A row was written to the log without it being open.
    /// This is a programming error.
    #[error("The CSV log is not open")]
    LogNotOpen,

    /// Writing to the log failed.
    /// Fatal to the pipeline, since it would mean silently losing data.
    #[error("Could not write to the CSV log: {0}")]
    LogWrite(#[from] csv::Error),

    /// Filesystem problems around the log file.
    #[error("Log file IO problem: {0}")]
    LogIo(#[from] io::Error),

    /// A subscriber could not accept a message, likely because it left.
    #[error("The subscriber is gone")]
    SubscriberGone,

    /// The wait was aborted because the pipeline is stopping.
    #[error("Cancelled")]
    Cancelled,

    /// The web server had a problem.
    #[error("Server problem: {0}")]
    Server(String),

    /// The pipeline task could not be joined, for example because it panicked.
    #[error("The pipeline task failed: {0}")]
    Pipeline(String),
}

impl Error {
    /// If this is a bad config error, get the problem description.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(problem) = self {
            Ok(problem)
        } else {
            Err(self)
        }
    }
}
