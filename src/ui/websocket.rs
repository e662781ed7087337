//! Inbound WebSocket endpoint of the gateway

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{future, SinkExt, StreamExt};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::RelayError;
use crate::proxy::{Frame, FrameSink, FrameStream, Route, StreamRelay, WsConnector};
use crate::ui::server::AppState;

/// `GET /ws/<namespace>/<target>`
///
/// Connections from any origin are accepted. Paths that do not resolve are
/// refused before the upgrade, so nothing is ever dialed for them.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let route = match state.resolver.resolve(&path) {
        Ok(route) => route,
        Err(e) => {
            tracing::warn!("Refusing websocket for {}: {}", path, e);
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
    };

    tracing::debug!("websocket {} -> {}", path, route.url());
    ws.on_upgrade(move |socket| handle_socket(socket, state, route))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, route: Route) {
    let span = tracing::info_span!("relay", id = %Uuid::new_v4(), backend = %route.url());
    let (sink, stream) = split_socket(socket);

    let summary = StreamRelay::new(route, state.retry.clone())
        .run(&WsConnector, sink, stream)
        .instrument(span)
        .await;

    tracing::debug!(
        "Relay finished after {} attempt(s): {} down, {} up",
        summary.attempts,
        summary.downstream_frames,
        summary.upstream_frames
    );
}

/// Adapt an axum socket to the relay's frame types
fn split_socket(socket: WebSocket) -> (FrameSink, FrameStream) {
    let (sink, stream) = socket.split();

    let sink: FrameSink = Box::pin(
        sink.with(|frame: Frame| future::ready(Ok::<Message, axum::Error>(to_message(frame))))
            .sink_map_err(RelayError::inbound),
    );
    let stream: FrameStream = Box::pin(stream.filter_map(|message| {
        future::ready(match message {
            Ok(message) => from_message(message).map(Ok),
            Err(e) => Some(Err(RelayError::inbound(e))),
        })
    }));

    (sink, stream)
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
        Frame::Close => Message::Close(None),
    }
}

fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(bytes) => Some(Frame::Binary(bytes)),
        Message::Close(_) => Some(Frame::Close),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}
