//! Policies run after the done signal and before a task finalizes.

use std::time::Duration;

use log::debug;
use tokio::time::{self, Instant};

use crate::engine::{self, EngineAdapter, ScriptValue};
use crate::{Error, Result};

/// What to do once the page signals it has loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Hold completion for a fixed duration
    Wait(Duration),
    /// Re-evaluate a script until it returns a truthy value
    Validate(String),
}

impl PostAction {
    pub fn wait_ms(ms: u64) -> Self {
        PostAction::Wait(Duration::from_millis(ms))
    }

    pub fn validate(script: impl Into<String>) -> Self {
        PostAction::Validate(script.into())
    }

    /// Run the policy against the engine's current page.
    ///
    /// `Wait` cannot fail. `Validate` fails with `ValidationTimeout` once
    /// `policy.timeout` is spent, or with the engine's error as soon as one
    /// evaluation fails.
    pub async fn run(&self, engine: &mut dyn EngineAdapter, policy: &ValidationPolicy) -> Result<()> {
        match self {
            PostAction::Wait(duration) => {
                debug!("post-action: waiting {:?}", duration);
                time::sleep(*duration).await;
                Ok(())
            }
            PostAction::Validate(script) => validate(engine, script, policy).await,
        }
    }
}

/// Poll schedule for `Validate` post-actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_millis(10_000),
        }
    }
}

async fn validate(engine: &mut dyn EngineAdapter, script: &str, policy: &ValidationPolicy) -> Result<()> {
    let timeout_ms = policy.timeout.as_millis() as u64;
    let deadline = Instant::now() + policy.timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let value = time::timeout_at(deadline, engine::evaluate(engine, script))
            .await
            .map_err(|_| Error::ValidationTimeout(timeout_ms))??;

        if is_truthy(&value) {
            debug!("post-action: validation passed after {} attempt(s)", attempts);
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            debug!("post-action: validation gave up after {} attempt(s)", attempts);
            return Err(Error::ValidationTimeout(timeout_ms));
        }
        time::sleep(policy.poll_interval.min(deadline - now)).await;
    }
}

/// JavaScript truthiness of an evaluated value.
pub fn is_truthy(value: &ScriptValue) -> bool {
    match value {
        ScriptValue::Null => false,
        ScriptValue::Bool(b) => *b,
        ScriptValue::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        ScriptValue::String(s) => !s.is_empty(),
        ScriptValue::Array(_) | ScriptValue::Object(_) => true,
    }
}
