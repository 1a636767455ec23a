use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use ctxstream_common::{
    validate_max_length, ClientId, ControlAction, ControlMessage, Error, GenerationRequest,
    Result, ERROR_PREFIX,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::dispatcher::DispatchOutcome;
use crate::registry::{Connection, Delivery};
use crate::AppState;

/// Outbound half of a client's WebSocket
pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ClientId::from(client_id), state))
}

async fn handle_socket(socket: WebSocket, client_id: ClientId, state: AppState) {
    let (sink, mut stream) = socket.split();
    let connection: Arc<dyn Connection> = Arc::new(WsConnection::new(sink));
    state.registry.register(client_id.clone(), connection.clone());

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_control(&state, &client_id, text.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(client_id = %client_id, "WebSocket receive error: {}", e);
                break;
            }
        }
    }

    state.registry.disconnect(&client_id, &connection);
    debug!(client_id = %client_id, "WebSocket session closed");
}

/// Act on one control message from a connected client.
///
/// Input errors are reported back to the client and nothing is dispatched.
pub(crate) async fn handle_control(state: &AppState, client_id: &ClientId, text: &str) {
    let result = ControlMessage::parse(text).and_then(|action| match action {
        ControlAction::Generate { prompt, max_length } => {
            let max_length = validate_max_length(
                max_length.unwrap_or(state.limits.default_max_length),
                state.limits.max_length_limit,
            )?;
            Ok(GenerationRequest {
                client_id: client_id.clone(),
                prompt,
                max_length,
            })
        }
    });

    let request = match result {
        Ok(request) => request,
        Err(e) => {
            info!(client_id = %client_id, "Rejected control message: {}", e);
            state.metrics.record_rejection();
            let delivery = state.registry.send(client_id, &format!("{ERROR_PREFIX}{e}")).await;
            if delivery != Delivery::Sent {
                warn!(client_id = %client_id, ?delivery, "Could not report input error");
            }
            return;
        }
    };

    if let DispatchOutcome::Accepted { stream_id } = state.dispatcher.dispatch(request) {
        debug!(client_id = %client_id, stream_id = %stream_id, "Generation started from control message");
    }
}
