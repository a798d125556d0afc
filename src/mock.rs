//! A mock, useful to test the pipeline without an actual serial port.

use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use crate::{endpoint::LineStream, error::Error, serial::error::SerialPortError};

type MockLine = Result<String, SerialPortError>;

#[derive(Debug, Default)]
struct MockState {
    failures_left: AtomicUsize,
    open_attempts: AtomicUsize,
    live: AtomicUsize,
    peak_live: AtomicUsize,

    // Where pushed lines go: the most recently opened stream.
    wire: Mutex<Option<mpsc::UnboundedSender<MockLine>>>,
}

/// An in-memory device.
///
/// Clones share state, so a test can keep one clone to drive the device
/// while the pipeline owns another.
#[derive(Debug, Clone)]
pub struct MockEndpoint {
    name: String,
    baud: u32,
    state: Arc<MockState>,
}

impl MockEndpoint {
    /// A mock which opens successfully.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            baud: 115_200,
            state: Arc::default(),
        }
    }

    /// The next `attempts` opens will fail.
    pub fn fail_next_opens(&self, attempts: usize) {
        self.state.failures_left.store(attempts, Ordering::SeqCst);
    }

    /// Emit a line from the device.
    /// Returns false if no stream is open to receive it.
    pub fn push_line(&self, line: &str) -> bool {
        self.send(Ok(line.to_owned()))
    }

    /// Emit a read error from the device.
    pub fn push_fault(&self, error: SerialPortError) -> bool {
        self.send(Err(error))
    }

    /// Emulate the device being unplugged: the open stream ends.
    pub fn unplug(&self) {
        if let Ok(mut wire) = self.state.wire.lock() {
            if wire.take().is_some() {
                info!(%self.name, "Mock unplugged");
            }
        }
    }

    /// How many times opening was attempted, failed attempts included.
    pub fn open_attempts(&self) -> usize {
        self.state.open_attempts.load(Ordering::SeqCst)
    }

    /// How many opened streams are currently alive.
    pub fn live_streams(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// The highest number of streams ever alive at the same time.
    pub fn peak_live_streams(&self) -> usize {
        self.state.peak_live.load(Ordering::SeqCst)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn baud_rate(&self) -> u32 {
        self.baud
    }

    fn send(&self, line: MockLine) -> bool {
        let Ok(wire) = self.state.wire.lock() else {
            return false;
        };

        wire.as_ref().map(|tx| tx.send(line).is_ok()).unwrap_or(false)
    }

    pub(crate) fn try_open(&self) -> Result<LineStream, Error> {
        self.state.open_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if failing {
            debug!(%self.name, "Mock refuses to open");
            return Err(Error::DeviceUnavailable {
                device: self.name.clone(),
                problem: "mock told to fail".into(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .state
            .wire
            .lock()
            .map_err(|_| Error::DeviceUnavailable {
                device: self.name.clone(),
                problem: "mock state poisoned".into(),
            })? = Some(tx);

        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_live.fetch_max(live, Ordering::SeqCst);

        debug!(%self.name, %live, "Mock opened");

        Ok(Box::pin(MockLines {
            inner: UnboundedReceiverStream::new(rx),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockLines {
    inner: UnboundedReceiverStream<MockLine>,
    state: Arc<MockState>,
}

impl Stream for MockLines {
    type Item = MockLine;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for MockLines {
    fn drop(&mut self) {
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}
