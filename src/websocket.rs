use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{error::Error, hub::Subscriber, pipeline::Pipeline};

/// How many lines may wait for a socket's writer task.
pub(crate) const LINE_QUEUE: usize = 256;

/// A connected websocket, seen from the hub.
///
/// Sending queues the text for the socket's writer task.
/// When the queue is full the send waits, so a stalled socket
/// runs into the hub's delivery timeout and gets dropped.
pub(crate) struct WebsocketSubscriber(mpsc::Sender<String>);

#[async_trait]
impl Subscriber for WebsocketSubscriber {
    async fn send_text(&self, text: &str) -> Result<(), Error> {
        self.0
            .send(text.to_owned())
            .await
            .map_err(|_| Error::SubscriberGone)
    }
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(pipeline): Extension<Pipeline>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    }

    ws.on_upgrade(move |socket| {
        let span = info_span!("Subscriber", %addr);

        handle_websocket(socket, pipeline).instrument(span)
    })
}

/// Client frames are not used for anything, but reading them is how we notice the client leaving.
pub(crate) async fn read<S>(mut receiver: S)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                trace!(%text, "client text ignored");
            }
            Message::Binary(_) => {
                debug!("client sent binary data");
            }
            Message::Ping(_) => {
                debug!("socket ping");
            }
            Message::Pong(_) => {
                debug!("socket pong");
            }
            Message::Close(_) => {
                debug!("client disconnected");
                break;
            }
        }
    }
}

pub(crate) async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut receiver: mpsc::Receiver<String>,
) {
    while let Some(text) = receiver.recv().await {
        if sender.send(Message::Text(text)).await.is_err() {
            debug!("client disconnected");
            return;
        }
        trace!("Line flushed");
    }
}

pub(crate) async fn handle_websocket(websocket: WebSocket, pipeline: Pipeline) {
    let (stream_sender, stream_receiver) = websocket.split();
    let (text_sender, text_receiver) = mpsc::channel::<String>(LINE_QUEUE);

    let hub = pipeline.hub();
    let id = hub.add(Arc::new(WebsocketSubscriber(text_sender))).await;

    let write_handle = tokio::spawn(write(stream_sender, text_receiver).in_current_span());

    read(stream_receiver).await;

    hub.remove(id).await;

    debug!("Aborting write task");
    // This ensures the underlying TCP connection gets closed,
    // which signals the peer that the session is over.
    write_handle.abort();

    match write_handle.await {
        Ok(()) => debug!("Write task joined"),
        Err(e) if e.is_cancelled() => trace!("Write task aborted"),
        Err(e) => warn!("Write task join error: {e:?}"),
    }
}
