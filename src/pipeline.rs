//! The read loop: device lines are parsed, logged and broadcast, in order.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Local;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::{
    config::Config,
    connection::{ConnectionManager, ReadOutcome},
    csv_logger::CsvLogger,
    endpoint::{serial::SerialEndpoint, Endpoint},
    error::Error,
    hub::BroadcastHub,
    parser::{LineParser, CSV_HEADER},
};

/// How long to wait before looking at a handle which is not usable again.
const IDLE_PAUSE: Duration = Duration::from_millis(500);

/// Knobs for the read loop.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Upper bound for a single read.
    pub read_timeout: Duration,

    /// Where to log. A time-stamped file in the log directory if `None`.
    pub log_file: Option<PathBuf>,

    /// Reopen the device on our own when its stream ends,
    /// instead of waiting for [`Pipeline::reconnect`].
    pub reconnect_on_disconnect: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            log_file: None,
            reconnect_on_disconnect: true,
        }
    }
}

struct RunningTask {
    stop: CancellationToken,
    handle: JoinHandle<Result<(), Error>>,
}

/// Ties the device, the CSV log and the subscribers together.
///
/// Cheap to clone; clones control the same pipeline.
#[derive(Clone)]
pub struct Pipeline {
    connection: Arc<ConnectionManager>,
    hub: BroadcastHub,
    log: Arc<Mutex<CsvLogger>>,
    parser: LineParser,
    settings: PipelineSettings,
    task: Arc<Mutex<Option<RunningTask>>>,

    // Set by `stop`, cleared by `start`. Reconnects leave a stopped pipeline alone.
    stopped: Arc<AtomicBool>,
}

impl Pipeline {
    /// Set up a pipeline. Nothing happens until [`Self::start`].
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        retry_interval: Duration,
        log: CsvLogger,
        hub: BroadcastHub,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            connection: Arc::new(ConnectionManager::new(endpoint, retry_interval)),
            hub,
            log: Arc::new(Mutex::new(log)),
            parser: LineParser::new(),
            settings,
            task: Arc::default(),
            stopped: Arc::default(),
        }
    }

    /// A pipeline reading from the serial port described by the configuration.
    pub fn from_config(config: &Config) -> Self {
        let endpoint = SerialEndpoint::new(&config.device, config.baud);

        Self::new(
            Arc::new(endpoint),
            config.retry_interval(),
            CsvLogger::new(&config.log_dir, &CSV_HEADER),
            BroadcastHub::default(),
            PipelineSettings {
                read_timeout: config.read_timeout(),
                log_file: config.log_file.clone(),
                reconnect_on_disconnect: config.reconnect_on_disconnect,
            },
        )
    }

    /// The subscribers lines are broadcast to.
    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Whether the device is open.
    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Whether the read loop is running.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// The log file currently written to.
    pub async fn log_path(&self) -> Option<PathBuf> {
        self.log.lock().await.path().map(Into::into)
    }

    /// Whether the log file is open.
    pub async fn is_logging(&self) -> bool {
        self.log.lock().await.is_open()
    }

    /// Spawn the read loop. Does nothing if it is already running.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        self.stopped.store(false, Ordering::SeqCst);
        self.spawn_unless_running(&mut task).await;
    }

    async fn spawn_unless_running(&self, task: &mut Option<RunningTask>) {
        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() {
                debug!("Already running");
                return;
            }
        }

        if let Some(finished) = task.take() {
            match finished.handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%e, "Previous run ended with an error"),
                Err(e) => warn!(%e, "Previous run could not be joined"),
            }
        }

        let stop = CancellationToken::new();
        let span = info_span!("tty", device = %self.connection.device());
        let handle = tokio::spawn(self.clone().run(stop.clone()).instrument(span));

        info!("Pipeline started");

        *task = Some(RunningTask { stop, handle });
    }

    /// Stop the read loop and release the device and the log file.
    ///
    /// On return neither is held.
    /// A fatal error which ended the loop is returned here.
    pub async fn stop(&self) -> Result<(), Error> {
        // Held until the loop is joined, so nothing restarts it halfway through.
        let mut task = self.task.lock().await;
        self.stopped.store(true, Ordering::SeqCst);

        let result = match task.take() {
            Some(RunningTask { stop, handle }) => {
                stop.cancel();
                match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(Error::Pipeline(e.to_string())),
                }
            }
            None => Ok(()),
        };

        self.connection.force_close().await;
        self.log.lock().await.close();
        drop(task);

        info!("Pipeline stopped");

        result
    }

    /// Drop the current device connection and open a new one.
    ///
    /// Safe to call at any time. Starts the read loop if it was never started
    /// or ended on its own, but not after [`Self::stop`].
    pub async fn reconnect(&self) {
        let mut task = self.task.lock().await;
        if self.stopped.load(Ordering::SeqCst) {
            debug!("Stopped, not reconnecting");
            return;
        }

        self.connection.reconnect().await;
        self.spawn_unless_running(&mut task).await;
    }

    async fn run(self, stop: CancellationToken) -> Result<(), Error> {
        let result = self.read_loop(&stop).await;

        // Every exit path releases the device and the log.
        self.connection.force_close().await;
        self.log.lock().await.close();
        info!("Serial port closed");

        if let Err(e) = &result {
            error!(%e, "Pipeline stopped on a fatal error");
        }

        result
    }

    async fn read_loop(&self, stop: &CancellationToken) -> Result<(), Error> {
        self.log
            .lock()
            .await
            .open(self.settings.log_file.clone())?;

        while !stop.is_cancelled() {
            let handle = match self.connection.current().await {
                Some(handle) => handle,
                None => match self.connection.open_with_retry(stop).await {
                    Ok(handle) => handle,
                    Err(Error::Cancelled) => break,
                    Err(e) => return Err(e),
                },
            };

            if !handle.is_open() {
                if self.settings.reconnect_on_disconnect {
                    info!("Device gone, reconnecting");
                    self.connection.force_close().await;
                } else {
                    pause(stop, IDLE_PAUSE).await;
                }
                continue;
            }

            let outcome = tokio::select! {
                _ = stop.cancelled() => break,
                outcome = handle.read_line(self.settings.read_timeout) => outcome,
            };

            match outcome {
                ReadOutcome::Line(raw) => self.handle_line(&raw).await?,
                ReadOutcome::Idle => trace!("No line within read timeout"),
                ReadOutcome::Closed => debug!("Handle closed under us"),
                ReadOutcome::Disconnected => warn!("Device disconnected"),
                ReadOutcome::Fault(e) => warn!(?e, "Serial read error"),
            }
        }

        Ok(())
    }

    async fn handle_line(&self, raw: &str) -> Result<(), Error> {
        let received = Local::now();

        if raw.trim().is_empty() {
            return Ok(());
        }

        let parsed = self.parser.parse(raw, received);
        debug!(%parsed, valid = parsed.is_valid(), "Line");

        self.log.lock().await.write(parsed.csv_record())?;

        self.hub.broadcast(parsed.raw()).await;

        Ok(())
    }
}

async fn pause(stop: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = stop.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
