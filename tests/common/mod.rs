//! Scripted in-memory engine shared by the integration tests.
//!
//! Records every attach, detach, navigation and evaluation in order, with
//! the (tokio) time it happened, and counts attaches that land while another
//! listener is still installed.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rfrender::engine::CAPTURE_DOCUMENT_SCRIPT;
use rfrender::{
    EngineAdapter, EngineListener, Error, EvalCallback, NavigationRequest, ResponseMetadata, Result,
    ScriptValue, DONE_MESSAGE,
};
use serde_json::json;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Attach,
    Detach,
    Navigate(String),
    Evaluate(String),
    Done(String),
}

#[derive(Default)]
pub struct EngineLog {
    pub events: Vec<(Instant, Event)>,
    pub attached: bool,
    pub overlaps: usize,
    pub done_signal: Option<String>,
}

impl EngineLog {
    pub fn kinds(&self) -> Vec<Event> {
        self.events.iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|(_, e)| match e {
                Event::Navigate(url) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_done_at(&self) -> Option<Instant> {
        self.events
            .iter()
            .rev()
            .find(|(_, e)| matches!(e, Event::Done(_)))
            .map(|(at, _)| *at)
    }
}

pub type SharedLog = Arc<Mutex<EngineLog>>;

struct State {
    log: SharedLog,
    pages: HashMap<String, String>,
    current: Option<String>,
    ready_at: Option<Instant>,
    finishes: bool,
}

/// Serves `pages` (url -> markup). Unknown URLs fail to load.
pub struct MockEngine {
    state: Arc<Mutex<State>>,
    listener: Option<Arc<dyn EngineListener>>,
    load_delay: Duration,
}

impl MockEngine {
    pub fn new() -> (Self, SharedLog) {
        let log: SharedLog = Arc::new(Mutex::new(EngineLog::default()));
        let state = State {
            log: log.clone(),
            pages: HashMap::new(),
            current: None,
            ready_at: None,
            finishes: true,
        };
        let engine = Self {
            state: Arc::new(Mutex::new(state)),
            listener: None,
            load_delay: Duration::ZERO,
        };
        (engine, log)
    }

    pub fn page(self, url: &str, title: &str) -> Self {
        let markup = format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            title, url
        );
        self.state.lock().unwrap().pages.insert(url.to_string(), markup);
        self
    }

    /// Start on `url` as if it had already been loaded
    pub fn loaded(self, url: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.current = state.pages.get(url).cloned();
        }
        self
    }

    /// Deliver load events this long after `navigate`
    pub fn load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Only post the done message; never report navigation-finished
    pub fn without_navigation_finished(self) -> Self {
        self.state.lock().unwrap().finishes = false;
        self
    }

    /// `window.ready` turns truthy at this instant
    pub fn ready_at(self, at: Instant) -> Self {
        self.state.lock().unwrap().ready_at = Some(at);
        self
    }

    fn record(state: &State, event: Event) {
        state.log.lock().unwrap().events.push((Instant::now(), event));
    }

    fn start_load(&self, url: String) {
        let Some(listener) = self.listener.clone() else {
            return;
        };
        let state = self.state.clone();
        let delay = self.load_delay;
        if delay.is_zero() {
            deliver_load(&state, listener.as_ref(), &url);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                deliver_load(&state, listener.as_ref(), &url);
            });
        }
    }
}

fn deliver_load(state: &Mutex<State>, listener: &dyn EngineListener, url: &str) {
    let (markup, finishes) = {
        let mut state = state.lock().unwrap();
        let markup = state.pages.get(url).cloned();
        if markup.is_some() {
            state.current = markup.clone();
            MockEngine::record(&state, Event::Done(url.to_string()));
        }
        (markup, state.finishes)
    };

    match markup {
        Some(markup) => {
            listener.on_response(&ResponseMetadata {
                url: url.to_string(),
                status: Some(200),
                mime_type: Some("text/html".into()),
                headers: HashMap::new(),
            });
            listener.on_injected_message(DONE_MESSAGE, &markup);
            if finishes {
                listener.on_navigation_finished();
            }
        }
        None => listener.on_navigation_failed(&format!("404 for {}", url)),
    }
}

fn title_of(markup: &str) -> Option<String> {
    let start = markup.find("<title>")? + "<title>".len();
    let end = markup[start..].find("</title>")? + start;
    Some(markup[start..end].to_string())
}

impl EngineAdapter for MockEngine {
    fn install_done_signal(&mut self, message_name: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        state.log.lock().unwrap().done_signal = Some(message_name.to_string());
        Ok(())
    }

    fn register_listener(&mut self, listener: Arc<dyn EngineListener>) {
        let state = self.state.lock().unwrap();
        {
            let mut log = state.log.lock().unwrap();
            if log.attached {
                log.overlaps += 1;
            }
            log.attached = true;
        }
        Self::record(&state, Event::Attach);
        self.listener = Some(listener);
    }

    fn unregister_listener(&mut self) {
        let state = self.state.lock().unwrap();
        state.log.lock().unwrap().attached = false;
        Self::record(&state, Event::Detach);
        self.listener = None;
    }

    fn navigate(&mut self, request: &NavigationRequest) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            Self::record(&state, Event::Navigate(request.url.clone()));
        }
        self.start_load(request.url.clone());
        Ok(())
    }

    fn evaluate(&mut self, script: &str, reply: EvalCallback) {
        let outcome = {
            let state = self.state.lock().unwrap();
            Self::record(&state, Event::Evaluate(script.to_string()));
            match script {
                CAPTURE_DOCUMENT_SCRIPT => Ok(state.current.clone().map(ScriptValue::String).unwrap_or(ScriptValue::Null)),
                "document.title" => Ok(state
                    .current
                    .as_deref()
                    .and_then(title_of)
                    .map(ScriptValue::String)
                    .unwrap_or(ScriptValue::Null)),
                "window.ready" => Ok(json!(state.ready_at.map_or(false, |at| Instant::now() >= at))),
                "never" => Ok(json!(false)),
                "numbers" => Ok(json!([1, 2, 3])),
                "throw" => Err(Error::EvaluationFailed("Error: thrown".into())),
                other => match other.strip_prefix("go:") {
                    Some(url) => Ok(ScriptValue::String(url.to_string())),
                    None => Ok(ScriptValue::String(other.to_string())),
                },
            }
        };

        // `go:<url>` scripts start a navigation of their own
        let follow = script.strip_prefix("go:").map(str::to_string);
        reply(outcome);
        if let Some(url) = follow {
            {
                let state = self.state.lock().unwrap();
                Self::record(&state, Event::Navigate(url.clone()));
            }
            self.start_load(url);
        }
    }
}

/// Engine whose every navigation fails to produce any event
pub struct SilentEngine;

impl EngineAdapter for SilentEngine {
    fn install_done_signal(&mut self, _message_name: &str) -> Result<()> {
        Ok(())
    }
    fn register_listener(&mut self, _listener: Arc<dyn EngineListener>) {}
    fn unregister_listener(&mut self) {}
    fn navigate(&mut self, _request: &NavigationRequest) -> Result<()> {
        Ok(())
    }
    fn evaluate(&mut self, _script: &str, reply: EvalCallback) {
        reply(Ok(ScriptValue::Null));
    }
}
