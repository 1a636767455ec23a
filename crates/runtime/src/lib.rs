mod channel;
mod llama_adapter;
pub mod template_engine;
mod worker;

#[cfg(test)]
mod tests;

pub use channel::{fragment_channel, FragmentReceiver, FragmentSender};
pub use llama_adapter::LlamaServerGenerator;
pub use template_engine::TemplateEngine;
pub use worker::{GenerationWorker, WorkerOutcome};

use ctxstream_common::Result;
use std::ops::ControlFlow;

/// Blocking text generator consumed by the generation worker.
///
/// `generate` runs on a dedicated blocking thread and may take as long as the model
/// needs. It calls `on_chunk` once per completed text chunk, in order. When
/// `on_chunk` returns `ControlFlow::Break` nobody is reading the output any more and
/// the implementation must return at its next chunk boundary.
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        max_length: usize,
        on_chunk: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<()>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "generator"
    }
}
