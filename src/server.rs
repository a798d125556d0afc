use std::{io, net::SocketAddr, path::Path, time::Duration};

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, get_service, post},
    Extension, Json, Router,
};
use serde_json::json;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{services::ServeFile, trace::TraceLayer};
use tracing::{error, info};

use crate::{error::Error, pipeline::Pipeline, websocket};

/// How long a reconnect request waits for the device before answering.
const RECONNECT_WAIT: Duration = Duration::from_secs(3);

/// How often a reconnect request checks on the device.
const RECONNECT_POLL: Duration = Duration::from_millis(250);

/// The routes of the bridge.
pub fn router<P: AsRef<Path>>(pipeline: Pipeline, static_dir: P) -> Router {
    let index = static_dir.as_ref().join("index.html");

    Router::new()
        .route(
            "/",
            get_service(ServeFile::new(index)).handle_error(|e: io::Error| async move {
                error!(%e, "Could not serve the index page");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Unhandled internal error: {e}"))
            }),
        )
        .route("/ws", get(websocket::ws_handler))
        .route("/status", get(status))
        .route("/reconnect", post(reconnect))
        .route("/version", get(show_version))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Each handler needs to be able to reach the pipeline
                .layer(Extension(pipeline)),
        )
}

async fn run(
    app: Router,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Server(format!("Could not bind {addr}: {e}")))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            return Err(Error::Server(
                "The receiver of which port was allocated was dropped".into(),
            ));
        }
    }

    info!("listening on {}", addr);

    server.await.map_err(|e| Error::Server(e.to_string()))
}

/// Start the server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(app: Router, allocated_port: oneshot::Sender<u16>) -> Result<(), Error> {
    run(app, None, Some(allocated_port)).await
}

/// Start the server on the given port.
pub async fn run_on_port(app: Router, port: u16) -> Result<(), Error> {
    run(app, Some(port), None).await
}

async fn status(Extension(pipeline): Extension<Pipeline>) -> impl IntoResponse {
    Json(json!({
        "connected": pipeline.is_connected().await,
        "subscribers": pipeline.hub().count().await,
    }))
}

async fn reconnect(Extension(pipeline): Extension<Pipeline>) -> impl IntoResponse {
    if pipeline.is_connected().await {
        return Json(json!({"connected": true, "message": "Already connected"}));
    }

    let background = pipeline.clone();
    tokio::spawn(async move { background.reconnect().await });

    let checks = RECONNECT_WAIT.as_millis() / RECONNECT_POLL.as_millis();
    for _ in 0..checks {
        if pipeline.is_connected().await {
            return Json(json!({"connected": true, "message": "Reconnected"}));
        }
        tokio::time::sleep(RECONNECT_POLL).await;
    }

    Json(json!({
        "connected": false,
        "message": "Reconnect attempt started; not connected yet",
    }))
}

async fn show_version() -> impl IntoResponse {
    format!("Sensor Bridge v{}\n", env!("CARGO_PKG_VERSION"))
}
