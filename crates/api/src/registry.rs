use async_trait::async_trait;
use ctxstream_common::{BroadcastAck, ClientId, Result, StreamId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// A live outbound channel to one client
#[async_trait]
pub trait Connection: Send + Sync {
    /// Deliver one text frame. An error means the client is no longer reachable.
    async fn send_text(&self, text: &str) -> Result<()>;
}

/// Result of an attempted delivery to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No connection registered under that client id
    NoConnection,
    /// Transport failed; the connection has been dropped from the registry
    Failed,
}

/// Handle on the consumer task currently streaming to a client
pub struct ConsumerHandle {
    stream_id: StreamId,
    abort: AbortHandle,
}

impl ConsumerHandle {
    pub fn new(stream_id: StreamId, abort: AbortHandle) -> Self {
        Self { stream_id, abort }
    }

    fn cancel(self) {
        debug!(stream_id = %self.stream_id, "Cancelling consumer");
        self.abort.abort();
    }
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ClientId, Arc<dyn Connection>>,
    consumers: HashMap<ClientId, ConsumerHandle>,
}

/// Shared map of connected clients and their active consumers.
///
/// Every mutation happens under one short lock; network I/O never runs while it is
/// held. Superseded consumers are aborted after the lock is released.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a connection reachable under `client_id`, replacing any previous one
    pub fn register(&self, client_id: ClientId, connection: Arc<dyn Connection>) {
        let total = {
            let mut state = self.state.lock();
            if state.connections.insert(client_id.clone(), connection).is_some() {
                warn!(client_id = %client_id, "Replacing existing connection");
            }
            state.connections.len()
        };
        info!(client_id = %client_id, total, "Client connected");
    }

    /// Forget the connection for `client_id`. Safe to call more than once.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn unregister(&self, client_id: &ClientId) -> bool {
        let (removed, total) = {
            let mut state = self.state.lock();
            let removed = state.connections.remove(client_id).is_some();
            (removed, state.connections.len())
        };
        if removed {
            info!(client_id = %client_id, total, "Client disconnected");
        }
        removed
    }

    /// Drop `connection` and its active consumer, if it is still the one registered
    /// for `client_id`. A newer connection under the same id is left alone.
    pub fn disconnect(&self, client_id: &ClientId, connection: &Arc<dyn Connection>) -> bool {
        let consumer = {
            let mut state = self.state.lock();
            let current = state
                .connections
                .get(client_id)
                .is_some_and(|c| std::ptr::addr_eq(Arc::as_ptr(c), Arc::as_ptr(connection)));
            if !current {
                return false;
            }
            state.connections.remove(client_id);
            state.consumers.remove(client_id)
        };

        if let Some(consumer) = consumer {
            consumer.cancel();
        }
        info!(client_id = %client_id, "Client disconnected");
        true
    }

    pub fn is_connected(&self, client_id: &ClientId) -> bool {
        self.state.lock().connections.contains_key(client_id)
    }

    pub fn connected_clients(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn active_streams(&self) -> usize {
        self.state.lock().consumers.len()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn active_stream_id(&self, client_id: &ClientId) -> Option<StreamId> {
        self.state
            .lock()
            .consumers
            .get(client_id)
            .map(|c| c.stream_id.clone())
    }

    /// Deliver one text frame to `client_id`.
    ///
    /// A transport failure removes the connection and cancels its consumer before
    /// returning `Delivery::Failed`.
    pub async fn send(&self, client_id: &ClientId, payload: &str) -> Delivery {
        let connection = self.state.lock().connections.get(client_id).cloned();
        let Some(connection) = connection else {
            debug!(client_id = %client_id, "No connection for client");
            return Delivery::NoConnection;
        };

        match connection.send_text(payload).await {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                warn!(client_id = %client_id, "Error sending to client: {}", e);
                self.disconnect(client_id, &connection);
                Delivery::Failed
            }
        }
    }

    /// Record `handle` as the only active consumer for `client_id`, cancelling the
    /// one it replaces. Returns the stream id of the replaced consumer.
    pub fn set_active_consumer(&self, client_id: ClientId, handle: ConsumerHandle) -> Option<StreamId> {
        let previous = self.state.lock().consumers.insert(client_id.clone(), handle);
        supersede(&client_id, previous)
    }

    /// Spawn `consumer` and make it the active consumer for `client_id`.
    ///
    /// The task is held at a start gate until its registration exists, so its own
    /// exit cleanup cannot run first and leave a stale entry behind.
    pub fn spawn_consumer<F>(&self, client_id: ClientId, stream_id: StreamId, consumer: F) -> Option<StreamId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (start, gate) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            if gate.await.is_ok() {
                consumer.await;
            }
        });

        let previous = self.set_active_consumer(client_id, ConsumerHandle::new(stream_id, task.abort_handle()));
        let _ = start.send(());
        previous
    }

    /// Remove the consumer registration for `client_id`, but only if it still
    /// belongs to `stream_id`.
    pub fn clear_active_consumer(&self, client_id: &ClientId, stream_id: &StreamId) -> bool {
        let mut state = self.state.lock();
        let owned = state
            .consumers
            .get(client_id)
            .is_some_and(|current| &current.stream_id == stream_id);
        if owned {
            state.consumers.remove(client_id);
        }
        owned
    }

    /// Send `payload` to every connected client. Clients whose transport fails are
    /// dropped once the pass is over.
    pub async fn broadcast(&self, payload: &str) -> BroadcastAck {
        let targets: Vec<(ClientId, Arc<dyn Connection>)> = self
            .state
            .lock()
            .connections
            .iter()
            .map(|(id, c)| (id.clone(), c.clone()))
            .collect();

        let total = targets.len();
        let mut failed = Vec::new();
        for (client_id, connection) in targets {
            if let Err(e) = connection.send_text(payload).await {
                warn!(client_id = %client_id, "Broadcast delivery failed: {}", e);
                failed.push((client_id, connection));
            }
        }

        let dropped = failed.len();
        for (client_id, connection) in failed {
            self.disconnect(&client_id, &connection);
        }

        BroadcastAck {
            delivered: total - dropped,
            dropped,
        }
    }

    /// Cancel every consumer and forget every connection
    pub fn shutdown(&self) {
        let (consumers, clients) = {
            let mut state = self.state.lock();
            let consumers: Vec<ConsumerHandle> = state.consumers.drain().map(|(_, c)| c).collect();
            let clients = state.connections.len();
            state.connections.clear();
            (consumers, clients)
        };

        info!(clients, streams = consumers.len(), "Shutting down connection registry");
        for consumer in consumers {
            consumer.cancel();
        }
    }
}

fn supersede(client_id: &ClientId, previous: Option<ConsumerHandle>) -> Option<StreamId> {
    previous.map(|old| {
        info!(client_id = %client_id, stream_id = %old.stream_id, "Superseding active stream");
        let stream_id = old.stream_id.clone();
        old.cancel();
        stream_id
    })
}
