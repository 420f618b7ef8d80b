//! A single unit of render work and its state machine.
//!
//! A task is created when a request is submitted and does nothing until the
//! dispatcher's queue activates it with exclusive access to the engine. From
//! then on it moves strictly forward:
//!
//! `Pending → Running → AwaitingDone → PostAction → Finalizing → Completed`
//!
//! Engine events (navigation finished/failed, injected messages, evaluation
//! results) arrive on arbitrary threads. The task's listener forwards them
//! into one channel that the task drains, so the first decisive signal wins
//! and later ones are ignored.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time;

use crate::engine::{self, EngineAdapter, EngineListener, ScriptValue, CAPTURE_DOCUMENT_SCRIPT, DONE_MESSAGE};
use crate::{Error, PostAction, RenderOutput, RenderRequest, RendererConfig, ResponseMetadata, Result};

/// Caller-supplied completion handler
pub type Completion = Box<dyn FnOnce(RenderOutput) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    AwaitingDone,
    PostAction,
    Finalizing,
    Completed,
}

enum Signal {
    Response(ResponseMetadata),
    NavigationFinished,
    NavigationFailed(String),
    Message { name: String, payload: String },
    Evaluated(Result<ScriptValue>),
}

struct TaskListener {
    tx: UnboundedSender<Signal>,
}

impl EngineListener for TaskListener {
    fn on_response(&self, response: &ResponseMetadata) {
        let _ = self.tx.send(Signal::Response(response.clone()));
    }

    fn on_navigation_finished(&self) {
        let _ = self.tx.send(Signal::NavigationFinished);
    }

    fn on_navigation_failed(&self, reason: &str) {
        let _ = self.tx.send(Signal::NavigationFailed(reason.to_string()));
    }

    fn on_injected_message(&self, name: &str, payload: &str) {
        let _ = self.tx.send(Signal::Message {
            name: name.to_string(),
            payload: payload.to_string(),
        });
    }
}

pub(crate) struct RenderTask {
    id: u64,
    name: String,
    request: RenderRequest,
    post_action: Option<PostAction>,
    load_media_content: bool,
    state: TaskState,
    result: Option<Vec<u8>>,
    response: Option<ResponseMetadata>,
    error: Option<Error>,
    completion: Option<Completion>,
}

impl RenderTask {
    pub(crate) fn new(
        id: u64,
        request: RenderRequest,
        post_action: Option<PostAction>,
        load_media_content: bool,
        completion: Completion,
    ) -> Self {
        Self {
            id,
            name: request.name(),
            request,
            post_action,
            load_media_content,
            state: TaskState::Pending,
            result: None,
            response: None,
            error: None,
            completion: Some(completion),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Drive the task to completion on `engine`, which it holds exclusively
    /// until this returns.
    pub(crate) async fn run(mut self, engine: &mut dyn EngineAdapter, config: &RendererConfig) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.register_listener(Arc::new(TaskListener { tx: tx.clone() }));
        self.transition(TaskState::Running);

        let outcome = self.execute(engine, &tx, &mut rx, config).await;
        self.finalize(engine, outcome, &mut rx, config).await;
        self.complete();
    }

    /// The engine is gone: skip straight to finalizing with no result.
    pub(crate) fn abandon(mut self) {
        warn!("[task {}] {}: engine unavailable", self.id, self.name);
        self.transition(TaskState::Finalizing);
        self.error = Some(Error::EngineUnavailable);
        self.complete();
    }

    async fn execute(
        &mut self,
        engine: &mut dyn EngineAdapter,
        tx: &UnboundedSender<Signal>,
        rx: &mut UnboundedReceiver<Signal>,
        config: &RendererConfig,
    ) -> Result<()> {
        match self.request.clone() {
            RenderRequest::Navigate(nav) => {
                nav.parsed_url()?;
                engine.navigate(&nav)?;
                self.await_done(rx, config).await?;
            }
            RenderRequest::Script {
                script,
                runs_on_loaded_page: true,
            } => {
                engine.watch_navigation();
                let tx = tx.clone();
                engine.evaluate(
                    &script,
                    Box::new(move |res| {
                        let _ = tx.send(Signal::Evaluated(res));
                    }),
                );
                self.await_done(rx, config).await?;
            }
            RenderRequest::Script {
                script,
                runs_on_loaded_page: false,
            } => {
                self.transition(TaskState::AwaitingDone);
                let value = time::timeout(config.done_timeout(), engine::evaluate(engine, &script))
                    .await
                    .map_err(|_| Error::Timeout(config.done_timeout_ms))??;
                self.result = encode_value(value)?;
            }
        }

        if let Some(action) = self.post_action.clone() {
            self.transition(TaskState::PostAction);
            action.run(engine, &config.validation_policy()).await?;
        }
        Ok(())
    }

    async fn await_done(&mut self, rx: &mut UnboundedReceiver<Signal>, config: &RendererConfig) -> Result<()> {
        self.transition(TaskState::AwaitingDone);
        match time::timeout(config.done_timeout(), self.next_done(rx)).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(config.done_timeout_ms)),
        }
    }

    async fn next_done(&mut self, rx: &mut UnboundedReceiver<Signal>) -> Result<()> {
        while let Some(signal) = rx.recv().await {
            match signal {
                Signal::Response(meta) => self.response = Some(meta),
                Signal::NavigationFailed(reason) => return Err(Error::NavigationFailed(reason)),
                Signal::Evaluated(Err(err)) => return Err(err),
                Signal::Evaluated(Ok(_)) => {}
                Signal::Message { name, payload } if name == DONE_MESSAGE => {
                    // Last-seen document, replaced by a fresh capture when finalizing
                    self.result = Some(payload.into_bytes());
                    if !self.load_media_content {
                        return Ok(());
                    }
                }
                Signal::Message { name, .. } => {
                    debug!("[task {}] ignoring message '{}'", self.id, name);
                }
                Signal::NavigationFinished => return Ok(()),
            }
        }
        Err(Error::EngineUnavailable)
    }

    async fn finalize(
        &mut self,
        engine: &mut dyn EngineAdapter,
        outcome: Result<()>,
        rx: &mut UnboundedReceiver<Signal>,
        config: &RendererConfig,
    ) {
        self.transition(TaskState::Finalizing);
        if let Err(err) = outcome {
            debug!("[task {}] failed: {}", self.id, err);
            self.error = Some(err);
        }

        // A response can trail the done message
        while let Ok(signal) = rx.try_recv() {
            if let Signal::Response(meta) = signal {
                self.response.get_or_insert(meta);
            }
        }

        let keeps_content = self.error.as_ref().map_or(true, Error::is_partial);
        if !keeps_content {
            self.result = None;
        } else if self.request.captures_document() {
            match capture_document(engine, config).await {
                Ok(bytes) => self.result = Some(bytes),
                Err(err) => {
                    warn!("[task {}] document capture failed: {}", self.id, err);
                    if self.error.is_none() {
                        self.error = Some(err);
                        self.result = None;
                    }
                }
            }
        }

        engine.unregister_listener();
    }

    fn complete(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        let Some(completion) = self.completion.take() else {
            return;
        };
        self.transition(TaskState::Completed);
        let output = RenderOutput {
            result: self.result.take(),
            response: self.response.take(),
            error: self.error.take(),
        };
        if panic::catch_unwind(AssertUnwindSafe(move || completion(output))).is_err() {
            error!("[task {}] completion handler panicked", self.id);
        }
    }

    fn transition(&mut self, next: TaskState) {
        debug!("[task {}] {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

/// A task dropped before completing (runtime shutdown, a panicking engine)
/// still reports, through the unavailable path.
impl Drop for RenderTask {
    fn drop(&mut self) {
        if self.completion.is_none() {
            return;
        }
        warn!("[task {}] {}: dropped in state {:?}", self.id, self.name, self.state);
        self.result = None;
        self.error = Some(Error::EngineUnavailable);
        self.fire();
    }
}

async fn capture_document(engine: &mut dyn EngineAdapter, config: &RendererConfig) -> Result<Vec<u8>> {
    let value = time::timeout(config.done_timeout(), engine::evaluate(engine, CAPTURE_DOCUMENT_SCRIPT))
        .await
        .map_err(|_| Error::Timeout(config.done_timeout_ms))??;
    match value {
        ScriptValue::String(markup) => Ok(markup.into_bytes()),
        other => Err(Error::EncodingFailed(format!(
            "document capture returned non-string value: {}",
            other
        ))),
    }
}

/// Strings become their UTF-8 bytes, `null` becomes no result and anything
/// else its JSON text.
fn encode_value(value: ScriptValue) -> Result<Option<Vec<u8>>> {
    match value {
        ScriptValue::Null => Ok(None),
        ScriptValue::String(s) => Ok(Some(s.into_bytes())),
        other => serde_json::to_vec(&other)
            .map(Some)
            .map_err(|e| Error::EncodingFailed(e.to_string())),
    }
}
