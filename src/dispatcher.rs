//! The render dispatcher: one engine, one serialized queue.
//!
//! Submissions become [`RenderTask`]s pushed onto an unbounded FIFO. A single
//! worker drains it, lending the engine to exactly one task at a time, so
//! the engine itself needs no locking and never sees two listeners.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, Mutex};

use crate::engine::{EngineAdapter, DONE_MESSAGE};
use crate::task::RenderTask;
use crate::{Error, PostAction, RenderOutput, RenderRequest, RendererConfig, Result};

type EngineSlot = Mutex<Option<Box<dyn EngineAdapter>>>;

/// Per-submission settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Policy to run after the done signal
    pub post_action: Option<PostAction>,
    /// Overrides the dispatcher-wide default when set
    pub load_media_content: Option<bool>,
}

impl RenderOptions {
    pub fn post_action(mut self, action: PostAction) -> Self {
        self.post_action = Some(action);
        self
    }

    pub fn load_media_content(mut self, load: bool) -> Self {
        self.load_media_content = Some(load);
        self
    }
}

impl From<PostAction> for RenderOptions {
    fn from(action: PostAction) -> Self {
        RenderOptions::default().post_action(action)
    }
}

/// Owns the engine and the queue that serializes access to it.
///
/// The queue worker only keeps a weak reference to the engine. Dropping the
/// dispatcher releases the engine once the in-flight task (if any) is done,
/// and every task still queued completes with [`Error::EngineUnavailable`].
pub struct Dispatcher {
    queue: UnboundedSender<RenderTask>,
    engine: Arc<EngineSlot>,
    load_media_content: AtomicBool,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Take ownership of `engine`, install the done signal on it and start
    /// the queue worker on the current tokio runtime.
    pub fn new(engine: impl EngineAdapter + 'static, config: RendererConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::InitializationError(format!("Dispatcher requires a tokio runtime: {}", e))
        })?;

        let mut engine: Box<dyn EngineAdapter> = Box::new(engine);
        engine.install_done_signal(DONE_MESSAGE)?;
        let engine = Arc::new(Mutex::new(Some(engine)));

        let (queue, rx) = mpsc::unbounded_channel();
        let load_media_content = AtomicBool::new(config.load_media_content);
        runtime.spawn(drain_queue(rx, Arc::downgrade(&engine), config));

        Ok(Self {
            queue,
            engine,
            load_media_content,
            next_id: AtomicU64::new(1),
        })
    }

    /// Default copied into each task at submission
    pub fn load_media_content(&self) -> bool {
        self.load_media_content.load(Ordering::SeqCst)
    }

    /// Change the default for tasks submitted from now on. Queued tasks keep
    /// the value they were created with.
    pub fn set_load_media_content(&self, load: bool) {
        self.load_media_content.store(load, Ordering::SeqCst);
    }

    /// Queue a request; `completion` fires exactly once with the outcome.
    /// Returns the task id.
    pub fn submit<F>(&self, request: RenderRequest, options: RenderOptions, completion: F) -> u64
    where
        F: FnOnce(RenderOutput) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let load_media_content = options
            .load_media_content
            .unwrap_or_else(|| self.load_media_content());
        let task = RenderTask::new(
            id,
            request,
            options.post_action,
            load_media_content,
            Box::new(completion),
        );
        debug!("[task {}] queued {}", id, task.name());

        if let Err(mpsc::error::SendError(task)) = self.queue.send(task) {
            // Worker is gone along with its runtime
            task.abandon();
        }
        id
    }

    /// Render a page (or run a script) and await the outcome.
    pub async fn render(&self, request: RenderRequest, post_action: Option<PostAction>) -> RenderOutput {
        let options = RenderOptions {
            post_action,
            load_media_content: None,
        };
        self.render_with(request, options).await
    }

    pub async fn render_with(&self, request: RenderRequest, options: RenderOptions) -> RenderOutput {
        let (tx, rx) = oneshot::channel();
        self.submit(request, options, move |output| {
            let _ = tx.send(output);
        });
        rx.await.unwrap_or_else(|_| RenderOutput {
            error: Some(Error::EngineUnavailable),
            ..Default::default()
        })
    }

    /// Evaluate `script`.
    ///
    /// When `runs_on_loaded_page` is set the script is expected to trigger a
    /// navigation and the result is the newly loaded document. Otherwise the
    /// script runs against the current page and its value is the result; no
    /// navigation is issued.
    pub async fn execute_script(
        &self,
        script: impl Into<String>,
        runs_on_loaded_page: bool,
        post_action: Option<PostAction>,
    ) -> RenderOutput {
        self.render(RenderRequest::script(script, runs_on_loaded_page), post_action)
            .await
    }

    /// Callback form of [`execute_script`](Self::execute_script)
    pub fn execute_script_with<F>(
        &self,
        script: impl Into<String>,
        runs_on_loaded_page: bool,
        post_action: Option<PostAction>,
        completion: F,
    ) -> u64
    where
        F: FnOnce(RenderOutput) + Send + 'static,
    {
        let options = RenderOptions {
            post_action,
            load_media_content: None,
        };
        self.submit(
            RenderRequest::script(script, runs_on_loaded_page),
            options,
            completion,
        )
    }

    /// Reclaim the engine once the in-flight task finishes. Tasks activated
    /// afterwards complete with `EngineUnavailable` until an engine is put back.
    pub async fn take_engine(&self) -> Option<Box<dyn EngineAdapter>> {
        self.engine.lock().await.take()
    }

    /// Install a new engine for subsequent tasks, returning the previous one.
    pub async fn replace_engine(
        &self,
        engine: impl EngineAdapter + 'static,
    ) -> Result<Option<Box<dyn EngineAdapter>>> {
        let mut engine: Box<dyn EngineAdapter> = Box::new(engine);
        engine.install_done_signal(DONE_MESSAGE)?;
        Ok(self.engine.lock().await.replace(engine))
    }
}

async fn drain_queue(
    mut queue: UnboundedReceiver<RenderTask>,
    engine: Weak<EngineSlot>,
    config: RendererConfig,
) {
    while let Some(task) = queue.recv().await {
        debug!("activating {}", task.name());
        let Some(slot) = engine.upgrade() else {
            task.abandon();
            continue;
        };
        let mut guard = slot.clone().lock_owned().await;
        let name = task.name().to_string();
        let task_config = config.clone();
        // Own task per activation, so a panicking engine fails only this render
        let run = tokio::spawn(async move {
            match guard.as_mut() {
                Some(engine) => task.run(&mut **engine, &task_config).await,
                None => task.abandon(),
            }
        });
        match run.await {
            Ok(()) => {}
            Err(err) if err.is_panic() => {
                error!("engine panicked while running {}", name);
                if let Some(engine) = slot.lock().await.as_mut() {
                    engine.unregister_listener();
                }
            }
            Err(_) => {
                debug!("render of {} cancelled", name);
                break;
            }
        }
    }
    debug!("render queue closed");
}
