use ctxstream_common::{ClientId, Fragment, StreamId, StreamMetrics, StreamOutcome};
use ctxstream_runtime::FragmentReceiver;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::registry::{ConnectionRegistry, Delivery};

/// Drains one fragment channel into one client's connection.
///
/// Fragments go out in channel order as plain text frames. The stop sentinel goes
/// out as `[DONE]` and ends the stream.
pub struct StreamingConsumer {
    receiver: FragmentReceiver,
    cleanup: CleanupGuard,
}

impl StreamingConsumer {
    pub fn new(
        client_id: ClientId,
        stream_id: StreamId,
        receiver: FragmentReceiver,
        registry: ConnectionRegistry,
        metrics: StreamMetrics,
    ) -> Self {
        Self {
            receiver,
            cleanup: CleanupGuard {
                client_id,
                stream_id,
                registry,
                metrics,
                started: Instant::now(),
                outcome: None,
            },
        }
    }

    /// Forward fragments until the stream ends.
    ///
    /// However the consumer goes away, including by abort before it ever ran, its
    /// registry entry is cleared and its outcome recorded. Dropping the receiver
    /// tells the worker to stop.
    pub async fn run(mut self) {
        let outcome = self.forward().await;
        self.cleanup.outcome = Some(outcome);
    }

    async fn forward(&mut self) -> StreamOutcome {
        let client_id = &self.cleanup.client_id;
        let stream_id = &self.cleanup.stream_id;
        debug!(client_id = %client_id, stream_id = %stream_id, "Consumer started");

        loop {
            let fragment = self.receiver.get().await;

            match self.cleanup.registry.send(client_id, &fragment.wire_text()).await {
                Delivery::Sent => {}
                delivery => {
                    warn!(
                        client_id = %client_id,
                        stream_id = %stream_id,
                        ?delivery,
                        "Client unreachable, abandoning stream"
                    );
                    return StreamOutcome::Failed;
                }
            }

            match fragment {
                Fragment::Stop => return StreamOutcome::Done,
                Fragment::Error(_) => self.cleanup.metrics.record_fragment(true),
                Fragment::Text(_) => self.cleanup.metrics.record_fragment(false),
            }
        }
    }
}

/// RAII guard for cleanup. A consumer dropped without an outcome was cancelled.
struct CleanupGuard {
    client_id: ClientId,
    stream_id: StreamId,
    registry: ConnectionRegistry,
    metrics: StreamMetrics,
    started: Instant,
    outcome: Option<StreamOutcome>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.unwrap_or(StreamOutcome::Cancelled);
        self.metrics.record_stream_end(outcome, self.started.elapsed());
        self.registry.clear_active_consumer(&self.client_id, &self.stream_id);
        info!(
            client_id = %self.client_id,
            stream_id = %self.stream_id,
            outcome = outcome.as_str(),
            "Stream finished"
        );
    }
}
