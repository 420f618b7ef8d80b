//! Chrome DevTools Protocol engine adapter

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use headless_chrome::browser::tab::Tab;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};

use crate::engine::{EngineAdapter, EngineListener, EvalCallback, ScriptValue, CAPTURE_DOCUMENT_SCRIPT};
use crate::{Error, NavigationRequest, ResponseMetadata, Result};

/// [`EngineAdapter`] over a single headless Chrome tab (uses the `headless_chrome` crate)
///
/// CDP offers no message bridge equivalent to a user-script handler, so the
/// done signal is emulated: once the tab reports the load complete the
/// adapter captures the document and posts it to the listener under the
/// installed message name, then reports navigation-finished.
///
/// `headless_chrome` calls block, so navigation and evaluation are awaited on
/// helper threads and reported back through the listener or eval callback.
/// Helpers only touch the tab while holding the listener generation they were
/// started under; detaching bumps it, so once `unregister_listener` returns no
/// helper of the previous task reaches the tab again.
pub struct CdpEngine {
    _browser: Browser,
    tab: Arc<Tab>,
    generation: Arc<Mutex<u64>>,
    listener: Option<Arc<dyn EngineListener>>,
    done_message: Option<String>,
    watch_next_eval: bool,
}

impl CdpEngine {
    /// Launch headless Chrome with a 1280x720 window
    pub fn launch() -> Result<Self> {
        Self::launch_with_window(1280, 720)
    }

    pub fn launch_with_window(width: u32, height: u32) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((width, height)))
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;

        Ok(Self {
            _browser: browser,
            tab,
            generation: Arc::new(Mutex::new(0)),
            listener: None,
            done_message: None,
            watch_next_eval: false,
        })
    }
}

/// Generation of the registered listener, held while a helper uses the tab
fn claim(generation: &Mutex<u64>, started: u64) -> Option<MutexGuard<'_, u64>> {
    let current = generation.lock().unwrap_or_else(PoisonError::into_inner);
    (*current == started).then_some(current)
}

// Runs on a helper thread
fn report_load(
    tab: Arc<Tab>,
    listener: Arc<dyn EngineListener>,
    done_message: Option<String>,
    generation: Arc<Mutex<u64>>,
    started: u64,
) {
    let navigated = tab.wait_until_navigated().map(|_| ());
    let Some(_current) = claim(&generation, started) else {
        debug!("listener detached before load completed, dropping report");
        return;
    };

    if let Err(e) = navigated {
        listener.on_navigation_failed(&format!("Wait for navigation failed: {}", e));
        return;
    }

    listener.on_response(&ResponseMetadata {
        url: tab.get_url(),
        ..Default::default()
    });

    if let Some(name) = done_message {
        match tab.evaluate(CAPTURE_DOCUMENT_SCRIPT, false) {
            Ok(remote) => match remote.value {
                Some(ScriptValue::String(markup)) => listener.on_injected_message(&name, &markup),
                other => debug!("document capture returned {:?}", other),
            },
            Err(e) => warn!("document capture failed: {}", e),
        }
    }

    listener.on_navigation_finished();
}

impl CdpEngine {
    fn current_generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EngineAdapter for CdpEngine {
    fn install_done_signal(&mut self, message_name: &str) -> Result<()> {
        self.done_message = Some(message_name.to_string());
        Ok(())
    }

    fn register_listener(&mut self, listener: Arc<dyn EngineListener>) {
        self.listener = Some(listener);
    }

    fn unregister_listener(&mut self) {
        // Waits out a helper currently using the tab
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.listener = None;
        self.watch_next_eval = false;
    }

    fn navigate(&mut self, request: &NavigationRequest) -> Result<()> {
        if !request.headers.is_empty() {
            // headless_chrome expects a HashMap<&str, &str>
            let headers: HashMap<&str, &str> = request
                .headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            self.tab
                .set_extra_http_headers(headers)
                .map_err(|e| Error::NavigationFailed(format!("Failed to set headers: {}", e)))?;
        }

        self.tab
            .navigate_to(&request.url)
            .map_err(|e| Error::NavigationFailed(format!("Navigation failed: {}", e)))?;

        if let Some(listener) = self.listener.clone() {
            let tab = self.tab.clone();
            let done_message = self.done_message.clone();
            let generation = self.generation.clone();
            let started = self.current_generation();
            thread::spawn(move || report_load(tab, listener, done_message, generation, started));
        }
        Ok(())
    }

    fn evaluate(&mut self, script: &str, reply: EvalCallback) {
        let tab = self.tab.clone();
        let script = script.to_string();
        let generation = self.generation.clone();
        let started = self.current_generation();
        let follow = if std::mem::take(&mut self.watch_next_eval) {
            self.listener
                .clone()
                .map(|listener| (listener, self.done_message.clone()))
        } else {
            None
        };

        thread::spawn(move || {
            let res = match claim(&generation, started) {
                Some(_current) => tab
                    .evaluate(&script, true)
                    .map(|remote| remote.value.unwrap_or(ScriptValue::Null))
                    .map_err(|e| Error::EvaluationFailed(e.to_string())),
                None => Err(Error::EngineUnavailable),
            };
            let succeeded = res.is_ok();
            reply(res);

            if let (true, Some((listener, done_message))) = (succeeded, follow) {
                report_load(tab, listener, done_message, generation, started);
            }
        });
    }

    fn watch_navigation(&mut self) {
        self.watch_next_eval = true;
    }
}
