use ctxstream_common::{GenerationRequest, StreamId, StreamMetrics};
use ctxstream_runtime::{fragment_channel, GenerationWorker};
use tracing::{debug, info};

use crate::registry::ConnectionRegistry;
use crate::streaming::StreamingConsumer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted { stream_id: StreamId },
    /// Target client was not connected; nothing was started
    Skipped,
}

/// Entry point that turns a validated request into a running stream
#[derive(Clone)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
    worker: GenerationWorker,
    metrics: StreamMetrics,
    channel_capacity: Option<usize>,
}

impl Dispatcher {
    pub fn new(
        registry: ConnectionRegistry,
        worker: GenerationWorker,
        metrics: StreamMetrics,
        channel_capacity: Option<usize>,
    ) -> Self {
        Self {
            registry,
            worker,
            metrics,
            channel_capacity,
        }
    }

    /// Start generation for `request` and stream it to its client.
    ///
    /// Returns without waiting for any output. A request for a client that is not
    /// connected is skipped without invoking the generator. An earlier stream to
    /// the same client is cancelled.
    pub fn dispatch(&self, request: GenerationRequest) -> DispatchOutcome {
        let client_id = request.client_id.clone();

        if !self.registry.is_connected(&client_id) {
            info!(client_id = %client_id, "Client not connected, skipping generation");
            self.metrics.record_skip();
            return DispatchOutcome::Skipped;
        }

        let (sender, receiver) = fragment_channel(self.channel_capacity);
        let stream_id = StreamId::new();
        let consumer = StreamingConsumer::new(
            client_id.clone(),
            stream_id.clone(),
            receiver,
            self.registry.clone(),
            self.metrics.clone(),
        );

        self.metrics.record_dispatch();
        if let Some(previous) = self
            .registry
            .spawn_consumer(client_id.clone(), stream_id.clone(), consumer.run())
        {
            debug!(client_id = %client_id, previous = %previous, "Previous stream cancelled");
        }

        let worker = self.worker.clone();
        let worker_stream = stream_id.clone();
        tokio::spawn(async move {
            let outcome = worker.generate(request, sender).await;
            debug!(client_id = %client_id, stream_id = %worker_stream, ?outcome, "Worker finished");
        });

        info!(stream_id = %stream_id, "Generation dispatched");
        DispatchOutcome::Accepted { stream_id }
    }
}
