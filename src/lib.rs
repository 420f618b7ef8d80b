//! RFox Render
//!
//! Headless page rendering on top of an embedded browser engine. A
//! [`Dispatcher`] owns one engine and runs render tasks through a serialized
//! queue: each task loads a URL (or evaluates a script), waits for the page's
//! done signal, optionally runs a [`PostAction`], and hands back the rendered
//! document together with the engine's response and any error.
//!
//! # Features
//!
//! - **Engine-agnostic**: anything implementing [`EngineAdapter`] can be driven
//! - **Single writer**: at most one task touches the engine at a time, in FIFO order
//! - **CDP Backend** (feature `cdp`): [`cdp::CdpEngine`] over headless Chrome
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cdp")]
//! # async fn demo() -> rfrender::Result<()> {
//! use rfrender::{cdp::CdpEngine, Dispatcher, PostAction, RenderRequest, RendererConfig};
//!
//! let engine = CdpEngine::launch()?;
//! let dispatcher = Dispatcher::new(engine, RendererConfig::default())?;
//! let output = dispatcher
//!     .render(
//!         RenderRequest::navigate("https://example.com"),
//!         Some(PostAction::validate("document.querySelector('#app') !== null")),
//!     )
//!     .await;
//! println!("{}", output.text().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod dispatcher;
pub mod engine;
pub mod post_action;
pub mod request;
mod task;

#[cfg(feature = "cdp")]
pub mod cdp;

pub use dispatcher::{Dispatcher, RenderOptions};
pub use engine::{EngineAdapter, EngineListener, EvalCallback, ScriptValue, DONE_MESSAGE};
pub use post_action::{PostAction, ValidationPolicy};
pub use request::{NavigationRequest, RenderOutput, RenderRequest, ResponseMetadata};

/// Configuration for the dispatcher and the tasks it runs
///
/// The defaults wait for media content, give a page 30 seconds to signal
/// that it is done, and poll `Validate` scripts every 100ms for up to 10
/// seconds.
///
/// # Examples
///
/// ```
/// let cfg = rfrender::RendererConfig::default();
/// assert!(cfg.load_media_content);
/// assert_eq!(cfg.validate_poll_interval_ms, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Default for new tasks: wait for navigation-finished (media included)
    /// rather than just the done message
    pub load_media_content: bool,
    /// How long a task waits for its done signal, in milliseconds
    pub done_timeout_ms: u64,
    /// Delay between `Validate` evaluations, in milliseconds
    pub validate_poll_interval_ms: u64,
    /// Overall budget for a `Validate` post-action, in milliseconds
    pub validate_timeout_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            load_media_content: true,
            done_timeout_ms: 30_000,
            validate_poll_interval_ms: 100,
            validate_timeout_ms: 10_000,
        }
    }
}

impl RendererConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InitializationError(format!("Invalid renderer config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.validate_poll_interval_ms == 0 {
            return Err(Error::InitializationError(
                "validate_poll_interval_ms must be positive".into(),
            ));
        }
        if self.validate_timeout_ms == 0 || self.done_timeout_ms == 0 {
            return Err(Error::InitializationError("timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn done_timeout(&self) -> Duration {
        Duration::from_millis(self.done_timeout_ms)
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            poll_interval: Duration::from_millis(self.validate_poll_interval_ms),
            timeout: Duration::from_millis(self.validate_timeout_ms),
        }
    }
}
