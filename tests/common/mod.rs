#![allow(dead_code)]

use std::{
    fs::File,
    future::Future,
    io::{self, Write},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::http::StatusCode;
use color_eyre::Result;
use futures::StreamExt;
use sensor_bridge::{
    csv_logger::CsvLogger,
    error::Error,
    hub::{BroadcastHub, Subscriber},
    mock::MockEndpoint,
    parser::CSV_HEADER,
    pipeline::{Pipeline, PipelineSettings},
    server,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::info;

pub const RETRY: Duration = Duration::from_millis(20);

/// A subscriber which forwards everything to a channel.
pub struct ChannelSubscriber(pub mpsc::UnboundedSender<String>);

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn send_text(&self, text: &str) -> Result<(), Error> {
        self.0
            .send(text.to_owned())
            .map_err(|_| Error::SubscriberGone)
    }
}

/// A log file which starts failing writes once told to.
pub struct BreakableFile {
    file: File,
    broken: Arc<AtomicBool>,
}

impl BreakableFile {
    pub fn wrapper(broken: &Arc<AtomicBool>) -> impl Fn(File) -> Self + Send + Sync + 'static {
        let broken = Arc::clone(broken);
        move |file| Self {
            file,
            broken: Arc::clone(&broken),
        }
    }
}

impl Write for BreakableFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

pub fn settings(log_file: &Path) -> PipelineSettings {
    PipelineSettings {
        read_timeout: Duration::from_millis(50),
        log_file: Some(log_file.to_owned()),
        reconnect_on_disconnect: true,
    }
}

pub fn mock_pipeline(mock: &MockEndpoint, dir: &Path, settings: PipelineSettings) -> Pipeline {
    mock_pipeline_with_log(mock, CsvLogger::new(dir, &CSV_HEADER), settings)
}

pub fn mock_pipeline_with_log(
    mock: &MockEndpoint,
    log: CsvLogger,
    settings: PipelineSettings,
) -> Pipeline {
    Pipeline::new(
        Arc::new(mock.clone()),
        RETRY,
        log,
        BroadcastHub::default(),
        settings,
    )
}

pub async fn subscribe(pipeline: &Pipeline) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    pipeline.hub().add(Arc::new(ChannelSubscriber(tx))).await;
    rx
}

pub async fn next_line(rx: &mut mpsc::UnboundedReceiver<String>) -> Result<String> {
    timeout(Duration::from_secs(5), rx.recv())
        .await?
        .ok_or_else(|| color_eyre::eyre::eyre!("Subscriber channel closed"))
}

/// Poll until the condition holds, or give up after a few seconds.
pub async fn eventually<F, Fut>(mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    Ok(())
}

pub async fn start_server(pipeline: Pipeline, static_dir: &Path) -> u16 {
    let (port_tx, port_rx) = oneshot::channel();
    let app = server::router(pipeline, static_dir);

    tokio::spawn(async move { server::run_any_port(app, port_tx).await });
    port_rx
        .await
        .expect("Server should reply with allocated port")
}

pub async fn connect(port: u16) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    info!("Connecting to server on port {port}");
    let (stream, http_response) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/ws")).await?;

    assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

    Ok(stream)
}

pub async fn receive_text(
    client: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> Result<String> {
    let message = timeout(Duration::from_secs(5), client.next())
        .await?
        .ok_or_else(|| color_eyre::eyre::eyre!("Stream closed"))??;

    Ok(message.to_text()?.to_owned())
}

/// A bare-bones HTTP/1.1 request, returning the status code and body.
pub async fn http(port: u16, method: &str, path: &str) -> Result<(u16, String)> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;

    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    timeout(Duration::from_secs(10), stream.read_to_string(&mut response)).await??;

    let status = response
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| color_eyre::eyre::eyre!("No status line"))?
        .parse()?;
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_owned())
        .unwrap_or_default();

    Ok((status, body))
}
