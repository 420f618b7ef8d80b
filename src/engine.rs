//! The browser-engine seam.
//!
//! The dispatcher never talks to a concrete browser. It drives anything that
//! implements [`EngineAdapter`], and receives engine events through the single
//! [`EngineListener`] the active task registers.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::{Error, NavigationRequest, ResponseMetadata, Result};

/// Value produced by evaluating a script in the page
pub type ScriptValue = serde_json::Value;

/// Receives the outcome of [`EngineAdapter::evaluate`]. May be called from any thread.
pub type EvalCallback = Box<dyn FnOnce(Result<ScriptValue>) + Send>;

/// Name of the bridge message the page posts at document end.
pub const DONE_MESSAGE: &str = "doneLoading";

/// Expression used to capture the current document markup.
pub const CAPTURE_DOCUMENT_SCRIPT: &str = "document.documentElement.outerHTML";

/// Event sink installed on the engine by the active render task.
///
/// Engines may invoke these from any thread. Implementations only forward.
pub trait EngineListener: Send + Sync {
    /// The main document response arrived
    fn on_response(&self, _response: &ResponseMetadata) {}

    /// The engine finished the navigation, including subresources
    fn on_navigation_finished(&self) {}

    /// The engine gave up on the navigation
    fn on_navigation_failed(&self, _reason: &str) {}

    /// The page posted a message through the injected bridge
    fn on_injected_message(&self, _name: &str, _payload: &str) {}
}

/// Core trait for embedded browser engines driven by the dispatcher.
///
/// Implementations need no internal locking: the dispatcher guarantees that
/// at most one task holds the engine, and that task is the only registered
/// listener.
pub trait EngineAdapter: Send {
    /// Arrange for the page to post `message_name` with the serialized
    /// document once it reaches document end.
    fn install_done_signal(&mut self, message_name: &str) -> Result<()>;

    /// Make `listener` the target of all subsequent engine events
    fn register_listener(&mut self, listener: Arc<dyn EngineListener>);

    /// Drop the current listener, if any
    fn unregister_listener(&mut self);

    /// Begin loading a page. Completion is reported through the listener.
    fn navigate(&mut self, request: &NavigationRequest) -> Result<()>;

    /// Evaluate a script against the current page and hand the value to `reply`.
    fn evaluate(&mut self, script: &str, reply: EvalCallback);

    /// Hint that the next `evaluate` is expected to start a navigation whose
    /// events should reach the listener. Engines that observe navigations on
    /// their own can ignore it.
    fn watch_navigation(&mut self) {}
}

/// Evaluate a script and await its value.
pub(crate) async fn evaluate(engine: &mut dyn EngineAdapter, script: &str) -> Result<ScriptValue> {
    let (tx, rx) = oneshot::channel();
    engine.evaluate(
        script,
        Box::new(move |res| {
            let _ = tx.send(res);
        }),
    );
    // A dropped reply means the engine went away mid-evaluation
    rx.await.map_err(|_| Error::EngineUnavailable)?
}
