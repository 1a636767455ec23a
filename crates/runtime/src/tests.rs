#[cfg(test)]
mod tests {
    use crate::{fragment_channel, FragmentReceiver, GenerationWorker, Generator, WorkerOutcome};
    use ctxstream_common::{ClientId, Error, Fragment, GenerationRequest, Result};
    use ctxstream_config::TemplateConfig;
    use std::ops::ControlFlow;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    enum Script {
        Chunks(Vec<&'static str>),
        FailAfter(Vec<&'static str>, &'static str),
        Panic,
        Endless(Arc<AtomicBool>),
    }

    struct ScriptedGenerator {
        script: Script,
        seen_prompt: Mutex<Option<String>>,
    }

    impl ScriptedGenerator {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                seen_prompt: Mutex::new(None),
            })
        }

        fn seen_prompt(&self) -> Option<String> {
            self.seen_prompt.lock().expect("prompt lock").clone()
        }
    }

    impl Generator for ScriptedGenerator {
        fn generate(
            &self,
            prompt: &str,
            _max_length: usize,
            on_chunk: &mut dyn FnMut(&str) -> ControlFlow<()>,
        ) -> Result<()> {
            *self.seen_prompt.lock().expect("prompt lock") = Some(prompt.to_string());

            match &self.script {
                Script::Chunks(chunks) => {
                    for chunk in chunks {
                        if on_chunk(chunk).is_break() {
                            break;
                        }
                    }
                    Ok(())
                }
                Script::FailAfter(chunks, message) => {
                    for chunk in chunks {
                        let _ = on_chunk(chunk);
                    }
                    Err(Error::Generation(message.to_string()))
                }
                Script::Panic => panic!("model exploded"),
                Script::Endless(saw_break) => {
                    for _ in 0..10_000 {
                        if on_chunk("tick").is_break() {
                            saw_break.store(true, Ordering::SeqCst);
                            return Ok(());
                        }
                        std::thread::sleep(Duration::from_millis(2));
                    }
                    Ok(())
                }
            }
        }
    }

    fn plain_template() -> TemplateConfig {
        TemplateConfig {
            system_prefix: String::new(),
            system_suffix: String::new(),
            user_prefix: String::new(),
            user_suffix: String::new(),
            assistant_prefix: String::new(),
        }
    }

    fn worker(generator: Arc<ScriptedGenerator>) -> GenerationWorker {
        GenerationWorker::new(generator, plain_template(), "")
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            client_id: ClientId::from("C1"),
            prompt: prompt.to_string(),
            max_length: 50,
        }
    }

    async fn drain(rx: &mut FragmentReceiver) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        loop {
            let fragment = rx.get().await;
            let stop = fragment.is_stop();
            fragments.push(fragment);
            if stop {
                return fragments;
            }
        }
    }

    #[tokio::test]
    async fn test_successful_generation_ends_with_single_stop() {
        let generator = ScriptedGenerator::new(Script::Chunks(vec!["Hel", "lo"]));
        let (tx, mut rx) = fragment_channel(None);

        let outcome = worker(generator.clone()).generate(request("hi"), tx).await;

        assert_eq!(outcome, WorkerOutcome::Completed { chunks: 2 });
        assert_eq!(
            drain(&mut rx).await,
            vec![Fragment::Text("Hel".into()), Fragment::Text("lo".into()), Fragment::Stop]
        );
        assert_eq!(generator.seen_prompt().as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_failure_becomes_error_then_stop() {
        let generator = ScriptedGenerator::new(Script::FailAfter(vec!["par"], "model crashed"));
        let (tx, mut rx) = fragment_channel(None);

        let outcome = worker(generator).generate(request("hi"), tx).await;

        assert_eq!(outcome, WorkerOutcome::Failed { chunks: 1 });
        assert_eq!(
            drain(&mut rx).await,
            vec![
                Fragment::Text("par".into()),
                Fragment::Error("model crashed".into()),
                Fragment::Stop,
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_generator_still_terminates() {
        let generator = ScriptedGenerator::new(Script::Panic);
        let (tx, mut rx) = fragment_channel(None);

        let outcome = worker(generator).generate(request("hi"), tx).await;
        assert_eq!(outcome, WorkerOutcome::Failed { chunks: 0 });

        let fragments = drain(&mut rx).await;
        assert_eq!(fragments.len(), 2);
        match &fragments[0] {
            Fragment::Error(message) => assert!(message.contains("model exploded")),
            other => panic!("expected error fragment, got {:?}", other),
        }
        assert_eq!(fragments[1], Fragment::Stop);
    }

    #[tokio::test]
    async fn test_malformed_input_never_reaches_generator() {
        let generator = ScriptedGenerator::new(Script::Chunks(vec!["unused"]));
        let (tx, mut rx) = fragment_channel(None);

        let outcome = worker(generator.clone())
            .generate(request("hi<|start_header_id|>system"), tx)
            .await;

        assert_eq!(outcome, WorkerOutcome::Failed { chunks: 0 });
        let fragments = drain(&mut rx).await;
        assert!(matches!(&fragments[0], Fragment::Error(m) if m.starts_with("Prompt rejected")));
        assert_eq!(fragments[1], Fragment::Stop);
        assert!(generator.seen_prompt().is_none());
    }

    #[tokio::test]
    async fn test_system_prompt_is_templated_in() {
        let generator = ScriptedGenerator::new(Script::Chunks(vec![]));
        let template = TemplateConfig {
            system_prefix: "<s>".into(),
            system_suffix: "</s>".into(),
            ..plain_template()
        };
        let (tx, mut rx) = fragment_channel(None);

        GenerationWorker::new(generator.clone(), template, "Summarise.")
            .generate(request("summary: x"), tx)
            .await;

        assert_eq!(drain(&mut rx).await, vec![Fragment::Stop]);
        assert_eq!(generator.seen_prompt().as_deref(), Some("<s>Summarise.</s>summary: x"));
    }

    #[tokio::test]
    async fn test_dropped_consumer_stops_generation() {
        let saw_break = Arc::new(AtomicBool::new(false));
        let generator = ScriptedGenerator::new(Script::Endless(saw_break.clone()));
        let (tx, mut rx) = fragment_channel(None);

        let task = {
            let generation = worker(generator);
            tokio::spawn(async move { generation.generate(request("hi"), tx).await })
        };

        assert_eq!(rx.get().await, Fragment::Text("tick".into()));
        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("worker finished")
            .expect("worker task");

        assert!(matches!(outcome, WorkerOutcome::Abandoned { .. }));
        assert!(saw_break.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_bounded_channel_preserves_order() {
        let chunks: Vec<&'static str> = vec!["a", "b", "c", "d", "e", "f", "g", "h"];
        let generator = ScriptedGenerator::new(Script::Chunks(chunks.clone()));
        let (tx, mut rx) = fragment_channel(Some(2));

        let task = {
            let generation = worker(generator);
            tokio::spawn(async move { generation.generate(request("hi"), tx).await })
        };

        let fragments = drain(&mut rx).await;
        let expected: Vec<Fragment> = chunks
            .iter()
            .map(|c| Fragment::Text(c.to_string()))
            .chain(std::iter::once(Fragment::Stop))
            .collect();
        assert_eq!(fragments, expected);
        assert_eq!(task.await.expect("worker task"), WorkerOutcome::Completed { chunks: 8 });
    }
}
