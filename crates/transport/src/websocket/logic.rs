//! See [the parent module documentation](super)

use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::sink::Buffer;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use graphql_engine::{ExecutionEngine, ExecutionRequest, ResultStream};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::data::{ClientMessage, ServerMessage, StartPayload};
use crate::TransportState;

/// The subprotocol token negotiated during the upgrade.
pub const SUBPROTOCOL: &str = "graphql-ws";

const OUTBOUND_CHANNEL_CAPACITY: usize = 10;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<TransportState>,
) -> impl IntoResponse {
    ws.max_message_size(crate::REQUEST_MAX_SIZE)
        .protocols([SUBPROTOCOL])
        .on_failed_upgrade(|error| tracing::debug!(%error, "Websocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: TransportState) {
    let (ws_sender, ws_receiver) = socket.split();

    let (message_sender, message_receiver) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

    tokio::spawn(write(
        ws_sender,
        message_receiver,
        state.socket_buffer_capacity,
    ));
    read(ws_receiver, message_sender, state.engine).await;
}

/// The single writer for a connection. Control responses and every
/// subscription's output funnel through one channel, so frames are never
/// interleaved mid-write.
async fn write(
    sender: SplitSink<WebSocket, Message>,
    mut messages: mpsc::Receiver<ServerMessage>,
    buffer_capacity: NonZeroUsize,
) {
    let mut sender = sender.buffer(buffer_capacity.get());
    while let Some(message) = messages.recv().await {
        if let ControlFlow::Break(()) = send_message(&mut sender, &message).await {
            break;
        }
    }
}

async fn send_message(
    sender: &mut Buffer<SplitSink<WebSocket, Message>, Message>,
    message: &ServerMessage,
) -> ControlFlow<()> {
    tracing::trace!(kind = message.kind(), "Sending message");

    if let Err(e) = sender.send(Message::Text(message.encode())).await {
        // Most likely the client closing the connection, or a full buffer.
        tracing::debug!(error=%e, "Sending websocket message failed");
        return ControlFlow::Break(());
    }

    ControlFlow::Continue(())
}

/// Control channel phases. `start` is only valid once acknowledged.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionPhase {
    AwaitingInit,
    Acknowledged,
}

/// The per-connection control loop. Reads protocol messages until the peer
/// disconnects or terminates; subscription output is produced elsewhere, so
/// this loop never waits on the execution engine's streams.
async fn read(
    mut receiver: SplitStream<WebSocket>,
    message_sender: mpsc::Sender<ServerMessage>,
    engine: Arc<dyn ExecutionEngine>,
) {
    let registry = SubscriptionRegistry::default();
    let mut phase = SessionPhase::AwaitingInit;

    loop {
        let raw = match receiver.next().await {
            Some(Ok(Message::Text(x))) => x,
            Some(Ok(Message::Binary(x))) => match String::from_utf8(x) {
                Ok(x) => x,
                Err(_) => {
                    let error = ServerMessage::protocol_error("binary frame is not valid UTF-8");
                    if message_sender.send(error).await.is_err() {
                        break;
                    }
                    continue;
                }
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                // Ping and pong messages are handled automatically by axum.
                continue;
            }
            // All of the following indicate client disconnection.
            Some(Err(e)) => {
                tracing::trace!(error=%e, "Client disconnected");
                break;
            }
            Some(Ok(Message::Close(_))) | None => {
                tracing::trace!("Client disconnected");
                break;
            }
        };

        let message = match ClientMessage::decode(&raw) {
            Ok(message) => message,
            // Bad input is reported, not fatal, in every phase.
            Err(e) => {
                if message_sender
                    .send(ServerMessage::protocol_error(e.to_string()))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        match message {
            ClientMessage::ConnectionInit => {
                // A redundant init after ack is acked again.
                phase = SessionPhase::Acknowledged;
                if message_sender.send(ServerMessage::ConnectionAck).await.is_err() {
                    break;
                }
            }
            ClientMessage::Start { id, .. } if phase == SessionPhase::AwaitingInit => {
                tracing::debug!(operation_id = %id, "Start before connection_init");
                let error = ServerMessage::operation_error(
                    &id,
                    json!({"message": "connection has not been acknowledged"}),
                );
                if message_sender.send(error).await.is_err() {
                    break;
                }
            }
            ClientMessage::Start { id, payload } => {
                start_subscription(id, payload, &registry, &message_sender, &engine).await;
            }
            ClientMessage::Stop { id } => {
                // Stopping an unknown or already-finished operation is a
                // tolerated no-op.
                if registry.cancel(&id) {
                    tracing::debug!(operation_id = %id, "Subscription stopped");
                }
            }
            ClientMessage::ConnectionTerminate => {
                tracing::trace!("Client terminated the connection");
                break;
            }
        }
    }

    // Operations never outlive their connection.
    registry.cancel_all();
}

/// Launches one subscription: duplicate-id check, engine setup, then a
/// runner task. Engine setup is where the query text is parsed, once per
/// start; a failure there is reported and never reaches the registry.
async fn start_subscription(
    id: String,
    payload: StartPayload,
    registry: &SubscriptionRegistry,
    message_sender: &mpsc::Sender<ServerMessage>,
    engine: &Arc<dyn ExecutionEngine>,
) {
    if registry.contains(&id) {
        tracing::debug!(operation_id = %id, "Duplicate start rejected");
        message_sender.send(duplicate_operation_error(&id)).await.ok();
        return;
    }

    let request = ExecutionRequest {
        query: payload.query,
        variables: payload.variables,
        operation_name: payload.operation_name,
    };

    let results = match engine.subscribe(request).await {
        Ok(results) => results,
        Err(error) => {
            tracing::debug!(operation_id = %id, %error, "Subscription failed to start");
            let error = ServerMessage::operation_error(&id, error.to_payload());
            message_sender.send(error).await.ok();
            message_sender.send(ServerMessage::complete(&id)).await.ok();
            return;
        }
    };

    let token = CancellationToken::new();
    let Some(serial) = registry.register(&id, token.clone()) else {
        message_sender.send(duplicate_operation_error(&id)).await.ok();
        return;
    };

    tracing::debug!(operation_id = %id, "Subscription started");
    tokio::spawn(run_subscription(
        id,
        serial,
        results,
        token,
        registry.clone(),
        message_sender.clone(),
    ));
}

fn duplicate_operation_error(id: &str) -> ServerMessage {
    ServerMessage::operation_error(
        id,
        json!({"message": format!("subscriber for operation \"{id}\" already exists")}),
    )
}

/// Drives one subscription's result stream to exhaustion or cancellation.
/// Cancellation is observed at each iteration boundary: once the token
/// fires, no further result is pulled and no further `data` is sent for
/// this id. Exactly one `complete` ends the stream either way.
async fn run_subscription(
    id: String,
    serial: u64,
    mut results: ResultStream,
    token: CancellationToken,
    registry: SubscriptionRegistry,
    message_sender: mpsc::Sender<ServerMessage>,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = results.next() => match result {
                Some(result) => {
                    if message_sender
                        .send(ServerMessage::data(&id, &result))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    registry.remove(&id, serial);
    message_sender.send(ServerMessage::complete(&id)).await.ok();
    tracing::debug!(operation_id = %id, "Subscription finished");
}

/// Per-connection mapping of operation id to the live subscription's
/// cancellation handle. The control loop registers and cancels while
/// completing runners deregister themselves, so lookups race removals.
/// Entries carry a serial stamped at registration; a cancelled runner's
/// deferred cleanup must not evict a successor reusing the same id.
#[derive(Clone, Default)]
struct SubscriptionRegistry {
    operations: Arc<DashMap<String, Subscription>>,
    next_serial: Arc<AtomicU64>,
}

struct Subscription {
    serial: u64,
    token: CancellationToken,
}

impl SubscriptionRegistry {
    fn contains(&self, id: &str) -> bool {
        self.operations.contains_key(id)
    }

    /// The new operation's serial, or `None` with nothing inserted if `id`
    /// already has a live operation.
    fn register(&self, id: &str, token: CancellationToken) -> Option<u64> {
        match self.operations.entry(id.to_owned()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
                entry.insert(Subscription { serial, token });
                Some(serial)
            }
        }
    }

    /// Requests cancellation of `id`. False if there is no such operation.
    /// The runner observes the signal at its next iteration boundary; this
    /// call does not wait for it.
    fn cancel(&self, id: &str) -> bool {
        match self.operations.remove(id) {
            Some((_, subscription)) => {
                subscription.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Runner self-deregistration once its stream is exhausted. Only evicts
    /// the entry still belonging to that runner's operation.
    fn remove(&self, id: &str, serial: u64) {
        self.operations
            .remove_if(id, |_, subscription| subscription.serial == serial);
    }

    fn cancel_all(&self) {
        self.operations.retain(|_, subscription| {
            subscription.token.cancel();
            false
        });
    }
}
