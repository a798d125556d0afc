//! Owns the lifecycle of the one device connection.
//!
//! There is at most one live [`ConnectionHandle`] at a time.
//! Opening retries forever with a fixed backoff, since the device
//! is expected to be plugged back in by someone eventually.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    endpoint::{Endpoint, LineStream},
    error::Error,
    serial::error::SerialPortError,
};

/// What came out of a single read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A line arrived.
    Line(String),

    /// Nothing arrived within the read timeout.
    Idle,

    /// The handle was closed (or is closing), no more lines will come from it.
    Closed,

    /// The device went away: the line stream ended.
    Disconnected,

    /// A transient read problem.
    Fault(SerialPortError),
}

/// A live device session.
pub struct ConnectionHandle {
    device: String,
    baud: u32,
    open: AtomicBool,
    closing: CancellationToken,
    lines: Mutex<Option<LineStream>>,
}

impl ConnectionHandle {
    fn new(device: &str, baud: u32, lines: LineStream) -> Self {
        Self {
            device: device.to_owned(),
            baud,
            open: AtomicBool::new(true),
            closing: CancellationToken::new(),
            lines: Mutex::new(Some(lines)),
        }
    }

    /// Which device this handle belongs to.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// The baud rate the device was opened with.
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Whether lines may still arrive.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Wait for the next line, at most `timeout`.
    ///
    /// Closing the handle from elsewhere unblocks a pending read.
    pub async fn read_line(&self, timeout: Duration) -> ReadOutcome {
        if !self.is_open() {
            return ReadOutcome::Closed;
        }

        let mut lines = self.lines.lock().await;
        let Some(stream) = lines.as_mut() else {
            return ReadOutcome::Closed;
        };

        let outcome = tokio::select! {
            _ = self.closing.cancelled() => ReadOutcome::Closed,
            next = tokio::time::timeout(timeout, stream.next()) => match next {
                Err(_elapsed) => ReadOutcome::Idle,
                Ok(Some(Ok(line))) => ReadOutcome::Line(line),
                Ok(Some(Err(e))) => ReadOutcome::Fault(e),
                Ok(None) => ReadOutcome::Disconnected,
            }
        };

        if matches!(outcome, ReadOutcome::Disconnected) {
            self.open.store(false, Ordering::SeqCst);
            // Release the device right away, not when someone gets around to closing us.
            lines.take();
        }

        outcome
    }

    /// Release the device.
    /// Waits for an in-flight read to notice, so the port is really gone on return.
    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closing.cancel();
        self.lines.lock().await.take();
    }
}

/// Opens, checks and closes the device connection.
pub struct ConnectionManager {
    endpoint: Arc<dyn Endpoint>,
    retry_interval: Duration,
    handle: Mutex<Option<Arc<ConnectionHandle>>>,
}

impl ConnectionManager {
    /// A manager which retries opening every `retry_interval`.
    pub fn new(endpoint: Arc<dyn Endpoint>, retry_interval: Duration) -> Self {
        Self {
            endpoint,
            retry_interval,
            handle: Mutex::new(None),
        }
    }

    /// The device this manager connects to.
    pub fn device(&self) -> &str {
        self.endpoint.id()
    }

    /// Keep trying to open the device until it works.
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires while waiting.
    pub async fn open_with_retry(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<ConnectionHandle>, Error> {
        let device = self.endpoint.id();
        info!(%device, "Attempting to connect");

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let attempt = {
                // The attempt happens under the lock, after any previous handle is closed,
                // so two live handles never exist.
                let mut current = self.handle.lock().await;

                if let Some(previous) = current.take() {
                    debug!("Closing a previous handle before opening");
                    previous.close().await;
                }

                self.endpoint.open().map(|lines| {
                    let handle = Arc::new(ConnectionHandle::new(
                        device,
                        self.endpoint.baud(),
                        lines,
                    ));
                    *current = Some(Arc::clone(&handle));
                    handle
                })
            };

            match attempt {
                Ok(handle) => {
                    info!(%device, baud = %handle.baud(), "Connected");
                    return Ok(handle);
                }
                Err(e) => {
                    warn!(
                        %device,
                        %e,
                        "Waiting for device, retrying in {:?}",
                        self.retry_interval
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(self.retry_interval) => {}
                    }
                }
            }
        }
    }

    /// The current handle, if any.
    pub async fn current(&self) -> Option<Arc<ConnectionHandle>> {
        self.handle.lock().await.clone()
    }

    /// Whether a handle exists and it reports itself open.
    pub async fn is_connected(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .map(|handle| handle.is_open())
            .unwrap_or(false)
    }

    /// Close and forget the handle, if there is one.
    pub async fn force_close(&self) {
        let mut current = self.handle.lock().await;

        if let Some(handle) = current.take() {
            handle.close().await;
            info!(device = %handle.device(), "Connection closed");
        }
    }

    /// Drop the current connection so that the reader opens a fresh one.
    ///
    /// The read loop notices the missing handle and runs [`Self::open_with_retry`] again.
    pub async fn reconnect(&self) {
        info!(device = %self.device(), "Reconnect requested");
        self.force_close().await;
    }
}
