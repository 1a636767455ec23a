pub mod dto;
pub mod error;
pub mod observability;

#[cfg(test)]
mod tests;

pub use dto::*;
pub use error::{Error, Result, ErrorResponse};
pub use observability::{MetricsSnapshot, StreamId, StreamMetrics, StreamOutcome};
