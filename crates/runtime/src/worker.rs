use crate::{channel::FragmentSender, template_engine::TemplateEngine, Generator};
use ctxstream_common::{Fragment, GenerationRequest};
use ctxstream_config::TemplateConfig;
use std::any::Any;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How one generation call ended, from the worker's side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Output finished and `Stop` enqueued
    Completed { chunks: usize },
    /// `Error` and `Stop` enqueued
    Failed { chunks: usize },
    /// The consumer went away; generation was told to stop
    Abandoned { chunks: usize },
}

/// Runs the blocking generator off the async scheduler and feeds its output into a
/// fragment channel.
#[derive(Clone)]
pub struct GenerationWorker {
    generator: Arc<dyn Generator>,
    template: Arc<TemplateConfig>,
    system_prompt: Arc<str>,
}

impl GenerationWorker {
    pub fn new(
        generator: Arc<dyn Generator>,
        template: TemplateConfig,
        system_prompt: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            generator,
            template: Arc::new(template),
            system_prompt: system_prompt.into(),
        }
    }

    /// Generate text for `request` into `channel`.
    ///
    /// Every failure is reported in-band as an `Error` fragment. Unless the consumer
    /// has already gone, the channel always receives exactly one `Stop` last.
    pub async fn generate(&self, request: GenerationRequest, channel: FragmentSender) -> WorkerOutcome {
        let client_id = request.client_id.clone();

        let prompt = match TemplateEngine::format_prompt(&self.system_prompt, &request.prompt, &self.template) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(client_id = %client_id, "Rejected generation input: {}", e);
                return finish(&channel, Some(e.to_string()), 0).await;
            }
        };

        let generator = self.generator.clone();
        let sender = channel.clone();
        let max_length = request.max_length;

        info!(client_id = %client_id, generator = generator.name(), max_length, "Dispatching generation to worker thread");

        let joined = tokio::task::spawn_blocking(move || {
            let mut chunks = 0usize;
            let mut abandoned = false;

            let result = generator.generate(&prompt, max_length, &mut |chunk: &str| {
                if chunk.is_empty() {
                    return ControlFlow::Continue(());
                }
                match sender.blocking_put(Fragment::Text(chunk.to_string())) {
                    Ok(()) => {
                        chunks += 1;
                        ControlFlow::Continue(())
                    }
                    Err(_) => {
                        abandoned = true;
                        ControlFlow::Break(())
                    }
                }
            });

            (result, chunks, abandoned)
        })
        .await;

        let (failure, chunks) = match joined {
            Ok((_, chunks, true)) => {
                info!(client_id = %client_id, chunks, "Consumer went away, generation abandoned");
                return WorkerOutcome::Abandoned { chunks };
            }
            Ok((Ok(()), chunks, false)) => (None, chunks),
            Ok((Err(e), chunks, false)) => {
                error!(client_id = %client_id, "Error during model generation: {}", e);
                (Some(e.to_string()), chunks)
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "generation task cancelled".to_string()
                };
                error!(client_id = %client_id, "Generation worker crashed: {}", message);
                (Some(message), 0)
            }
        };

        debug!(client_id = %client_id, chunks, "Blocking generation finished");
        finish(&channel, failure, chunks).await
    }
}

/// Enqueue the optional error and the stop sentinel
async fn finish(channel: &FragmentSender, failure: Option<String>, chunks: usize) -> WorkerOutcome {
    let failed = failure.is_some();

    if let Some(message) = failure {
        if channel.put(Fragment::Error(message)).await.is_err() {
            return WorkerOutcome::Abandoned { chunks };
        }
    }
    if channel.put(Fragment::Stop).await.is_err() {
        return WorkerOutcome::Abandoned { chunks };
    }

    if failed {
        WorkerOutcome::Failed { chunks }
    } else {
        WorkerOutcome::Completed { chunks }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("generation worker panicked: {}", detail)
}
