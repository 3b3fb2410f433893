use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use kiln_files::FileTracker;
use kiln_infer::InferenceClient;
use kiln_types::{CodeNotice, ProgressEvent};

pub mod extract;
pub mod notify;

pub use extract::{extract, fallback_blocks, CodeBlock, CodeBlocks};
pub use notify::{BroadcastNotifier, Notifier, NullNotifier};

/// Events of one generation run, in emission order. Ends after `complete` or `error`.
pub type EventStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

const EVENT_BUFFER: usize = 16;

/// Prompt in, files on disk out: inference, extraction, persistence, progress.
pub struct GenerationPipeline {
    inference: Arc<dyn InferenceClient>,
    tracker: Arc<FileTracker>,
    notifier: Arc<dyn Notifier>,
}

impl GenerationPipeline {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        tracker: Arc<FileTracker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inference,
            tracker,
            notifier,
        }
    }

    pub fn tracker(&self) -> &Arc<FileTracker> {
        &self.tracker
    }

    /// Start a run on its own task and return its events.
    ///
    /// The run is not tied to the stream: dropping the stream stops delivery,
    /// not the run.
    pub fn generate(self: &Arc<Self>, prompt: impl Into<String>, model: impl Into<String>) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let pipeline = Arc::clone(self);
        let prompt = prompt.into();
        let model = model.into();
        tokio::spawn(async move {
            pipeline.run(&prompt, &model, &tx).await;
        });
        Box::pin(ReceiverStream::new(rx))
    }

    /// Drive one run to completion, sending events to `tx` as they happen.
    pub async fn run(&self, prompt: &str, model: &str, tx: &mpsc::Sender<ProgressEvent>) {
        let generation_id = Uuid::new_v4();
        let span = info_span!("generation", %generation_id, model);
        self.run_inner(prompt, model, tx).instrument(span).await
    }

    async fn run_inner(&self, prompt: &str, model: &str, tx: &mpsc::Sender<ProgressEvent>) {
        info!(prompt_chars = prompt.chars().count(), "generation started");

        let completion = match self.inference.generate(model, prompt).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "inference failed");
                emit(tx, ProgressEvent::error(e.to_string())).await;
                return;
            }
        };

        let mut blocks = extract(&completion);
        if blocks.is_empty() {
            debug!("no fenced blocks in completion; using fallback file");
            blocks = fallback_blocks(&completion);
        }

        for block in blocks {
            let tracker = Arc::clone(&self.tracker);
            let stored = tokio::task::spawn_blocking(move || {
                let result = tracker.store(&block.filename, &block.content);
                (block, result)
            })
            .await;

            let block = match stored {
                Ok((block, Ok(_))) => block,
                Ok((_, Err(e))) => {
                    emit(tx, ProgressEvent::error(e.to_string())).await;
                    return;
                }
                Err(e) => {
                    error!(error = %e, "store task failed");
                    emit(tx, ProgressEvent::error(e.to_string())).await;
                    return;
                }
            };
            let event = ProgressEvent::file_generated(&block.filename);
            self.notifier.code_generated(CodeNotice {
                filename: block.filename,
                code: block.content,
            });
            emit(tx, event).await;
        }

        info!("generation complete");
        emit(tx, ProgressEvent::complete()).await;
    }
}

async fn emit(tx: &mpsc::Sender<ProgressEvent>, event: ProgressEvent) {
    if tx.send(event).await.is_err() {
        debug!("event consumer gone; run continues");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use kiln_files::{LocalStorage, Storage};
    use kiln_infer::InferenceError;
    use kiln_types::OperationStatus;
    use std::fs;
    use std::io;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Returns a canned completion, or a transport error when there is none.
    struct ScriptedInference(Option<String>);

    #[async_trait]
    impl InferenceClient for ScriptedInference {
        async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
            Ok(vec!["scripted".into()])
        }

        async fn generate(&self, _model: &str, _prompt: &str) -> Result<String, InferenceError> {
            self.0
                .clone()
                .ok_or_else(|| InferenceError::Http("connection refused".into()))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<CodeNotice>>);

    impl Notifier for RecordingNotifier {
        fn code_generated(&self, notice: CodeNotice) {
            self.0.lock().unwrap().push(notice);
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        pipeline: Arc<GenerationPipeline>,
        notices: Arc<RecordingNotifier>,
    }

    fn harness(completion: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(FileTracker::new(dir.path().join("generated")));
        let notices = Arc::new(RecordingNotifier::default());
        let pipeline = Arc::new(GenerationPipeline::new(
            Arc::new(ScriptedInference(completion.map(str::to_string))),
            tracker,
            notices.clone(),
        ));
        Harness {
            dir,
            pipeline,
            notices,
        }
    }

    async fn collect(h: &Harness) -> Vec<ProgressEvent> {
        h.pipeline.generate("make it", "scripted").collect().await
    }

    #[tokio::test]
    async fn two_blocks_progress_then_complete() {
        let h = harness(Some(
            "Sure.\n```a.py\nimport b\nprint(b.x)\n```\nand\n```b.py\nx = 42\n```\n",
        ));

        let events = collect(&h).await;
        assert_eq!(
            events,
            vec![
                ProgressEvent::file_generated("a.py"),
                ProgressEvent::file_generated("b.py"),
                ProgressEvent::complete(),
            ]
        );

        let root = h.dir.path().join("generated");
        assert_eq!(fs::read_to_string(root.join("a.py")).unwrap(), "import b\nprint(b.x)");
        assert_eq!(fs::read_to_string(root.join("b.py")).unwrap(), "x = 42");

        let notices = h.notices.0.lock().unwrap();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[1].filename, "b.py");
        assert_eq!(notices[1].code, "x = 42");
    }

    #[tokio::test]
    async fn inference_failure_emits_single_error() {
        let h = harness(None);

        let events = collect(&h).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            ProgressEvent::Error { message } => assert!(message.contains("connection refused")),
            other => panic!("expected error, got {other:?}"),
        }

        assert!(!h.dir.path().join("generated").exists());
        assert!(h.pipeline.tracker().list_operations().is_empty());
        assert!(h.notices.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_second_block_keeps_first_file() {
        let h = harness(Some("```a.py\nfirst = 1\n```\n```../escape.py\nbad = 1\n```"));

        let events = collect(&h).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ProgressEvent::file_generated("a.py"));
        assert!(matches!(&events[1], ProgressEvent::Error { message } if message.contains("Access denied")));

        let root = h.dir.path().join("generated");
        assert_eq!(fs::read_to_string(root.join("a.py")).unwrap(), "first = 1");
        assert!(!h.dir.path().join("escape.py").exists());

        let ops = h.pipeline.tracker().list_operations();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].status, OperationStatus::Success);
        assert_eq!(ops[1].status, OperationStatus::Failed);
    }

    #[tokio::test]
    async fn empty_completion_writes_placeholder() {
        let h = harness(Some(""));

        let events = collect(&h).await;
        assert_eq!(
            events,
            vec![ProgressEvent::file_generated("app.py"), ProgressEvent::complete()]
        );
        let written = fs::read_to_string(h.dir.path().join("generated/app.py")).unwrap();
        assert_eq!(written, extract::EMPTY_COMPLETION_PLACEHOLDER);
    }

    #[tokio::test]
    async fn unfenced_completion_written_verbatim() {
        let h = harness(Some("print('plain')"));

        collect(&h).await;
        let written = fs::read_to_string(h.dir.path().join("generated/app.py")).unwrap();
        assert_eq!(written, "print('plain')");
    }

    /// Local disk, but every write takes `0` first.
    struct SlowStorage(Duration);

    impl Storage for SlowStorage {
        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            LocalStorage.create_dir_all(path)
        }

        fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            std::thread::sleep(self.0);
            LocalStorage.write(path, contents)
        }

        fn exists(&self, path: &Path) -> bool {
            LocalStorage.exists(path)
        }
    }

    #[tokio::test]
    async fn slow_writes_leave_the_runtime_free() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(SlowStorage(Duration::from_millis(300)));
        let pipeline = Arc::new(GenerationPipeline::new(
            Arc::new(ScriptedInference(Some("```a.py\nx = 1\n```".into()))),
            Arc::new(FileTracker::with_storage(dir.path(), storage)),
            Arc::new(NullNotifier),
        ));

        let timer = async {
            let started = Instant::now();
            tokio::time::sleep(Duration::from_millis(10)).await;
            started.elapsed()
        };
        let (events, waited) = tokio::join!(
            pipeline.generate("p", "scripted").collect::<Vec<_>>(),
            timer
        );

        assert_eq!(events.len(), 2);
        assert_eq!(events[1], ProgressEvent::complete());
        assert!(waited < Duration::from_millis(200), "timer waited {waited:?}");
        assert!(dir.path().join("a.py").exists());
    }

    #[tokio::test]
    async fn run_finishes_after_consumer_leaves() {
        let h = harness(Some("```a.py\nx = 1\n```\n```b.py\ny = 2\n```"));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        h.pipeline.run("p", "scripted", &tx).await;

        let root = h.dir.path().join("generated");
        assert!(root.join("a.py").exists());
        assert!(root.join("b.py").exists());
    }
}
