use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const MAX_SAMPLES: usize = 10000;

/// Correlation ID for one streaming consumer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId(Arc<str>);

impl Serialize for StreamId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    pub fn from_string(s: String) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a streaming consumer finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOutcome {
    /// Stop sentinel reached and `[DONE]` delivered
    Done,
    /// Client became unreachable mid-stream
    Failed,
    /// Superseded by a newer stream or torn down
    Cancelled,
}

impl StreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamOutcome::Done => "done",
            StreamOutcome::Failed => "failed",
            StreamOutcome::Cancelled => "cancelled",
        }
    }
}

/// Process-wide counters for the streaming bridge
#[derive(Debug, Clone)]
pub struct StreamMetrics {
    inner: Arc<RwLock<MetricsData>>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsData {
    // Request tracking
    dispatched_requests: u64,
    skipped_requests: u64,
    rejected_requests: u64,

    // Stream lifecycle
    active_streams: u64,
    completed_streams: u64,
    failed_streams: u64,
    cancelled_streams: u64,
    outcomes: HashMap<StreamOutcome, u64>,

    // Delivery
    fragments_sent: u64,
    error_fragments_sent: u64,

    stream_durations: VecDeque<u64>,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsData::default())),
            start_time: Instant::now(),
        }
    }

    /// A request was handed to the generation worker
    pub fn record_dispatch(&self) {
        let mut data = self.inner.write();
        data.dispatched_requests += 1;
        data.active_streams += 1;
    }

    /// A request was skipped because its client is not connected
    pub fn record_skip(&self) {
        self.inner.write().skipped_requests += 1;
    }

    /// A request failed validation
    pub fn record_rejection(&self) {
        self.inner.write().rejected_requests += 1;
    }

    pub fn record_fragment(&self, is_error: bool) {
        let mut data = self.inner.write();
        data.fragments_sent += 1;
        if is_error {
            data.error_fragments_sent += 1;
        }
    }

    /// A streaming consumer exited
    pub fn record_stream_end(&self, outcome: StreamOutcome, duration: Duration) {
        let mut data = self.inner.write();

        data.active_streams = data.active_streams.saturating_sub(1);
        match outcome {
            StreamOutcome::Done => data.completed_streams += 1,
            StreamOutcome::Failed => data.failed_streams += 1,
            StreamOutcome::Cancelled => data.cancelled_streams += 1,
        }
        *data.outcomes.entry(outcome).or_insert(0) += 1;

        data.stream_durations.push_back(duration.as_millis() as u64);
        if data.stream_durations.len() > MAX_SAMPLES {
            data.stream_durations.pop_front();
        }
    }

    /// Calculate percentile from samples
    fn calculate_percentile(samples: &[u64], percentile: f64) -> u64 {
        if samples.is_empty() {
            return 0;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64) as usize;
        sorted[index]
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get detailed metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let data = self.inner.read();

        let durations: Vec<u64> = data.stream_durations.iter().copied().collect();

        MetricsSnapshot {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            uptime_seconds: self.start_time.elapsed().as_secs(),

            dispatched_requests: data.dispatched_requests,
            skipped_requests: data.skipped_requests,
            rejected_requests: data.rejected_requests,

            active_streams: data.active_streams,
            completed_streams: data.completed_streams,
            failed_streams: data.failed_streams,
            cancelled_streams: data.cancelled_streams,

            fragments_sent: data.fragments_sent,
            error_fragments_sent: data.error_fragments_sent,

            stream_duration_p50_ms: Self::calculate_percentile(&durations, 50.0),
            stream_duration_p95_ms: Self::calculate_percentile(&durations, 95.0),
            stream_duration_p99_ms: Self::calculate_percentile(&durations, 99.0),

            streams_by_outcome: data.outcomes.clone(),
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics snapshot for /metrics endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,

    // Request counts
    pub dispatched_requests: u64,
    pub skipped_requests: u64,
    pub rejected_requests: u64,

    // Stream metrics
    pub active_streams: u64,
    pub completed_streams: u64,
    pub failed_streams: u64,
    pub cancelled_streams: u64,

    // Delivery
    pub fragments_sent: u64,
    pub error_fragments_sent: u64,

    // Latency percentiles (milliseconds)
    pub stream_duration_p50_ms: u64,
    pub stream_duration_p95_ms: u64,
    pub stream_duration_p99_ms: u64,

    pub streams_by_outcome: HashMap<StreamOutcome, u64>,
}
