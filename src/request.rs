//! Request and result types exchanged with the dispatcher.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A page load: the URL plus any extra HTTP headers to send with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    /// Target URL
    pub url: String,
    /// Extra request headers
    pub headers: HashMap<String, String>,
}

impl NavigationRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    /// Add a request header (builder style)
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Parse the URL, reporting a malformed one as a navigation failure.
    pub fn parsed_url(&self) -> Result<url::Url> {
        url::Url::parse(&self.url)
            .map_err(|e| Error::NavigationFailed(format!("invalid url '{}': {}", self.url, e)))
    }
}

/// What a render task should do once it owns the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderRequest {
    /// Navigate to a URL and capture the rendered document
    Navigate(NavigationRequest),
    /// Evaluate a script.
    ///
    /// With `runs_on_loaded_page` the script is expected to drive a fresh
    /// navigation and the task captures the resulting document. Without it the
    /// script runs against the current page and its value is the result.
    Script {
        script: String,
        runs_on_loaded_page: bool,
    },
}

impl RenderRequest {
    pub fn navigate(url: impl Into<String>) -> Self {
        RenderRequest::Navigate(NavigationRequest::new(url))
    }

    pub fn script(script: impl Into<String>, runs_on_loaded_page: bool) -> Self {
        RenderRequest::Script {
            script: script.into(),
            runs_on_loaded_page,
        }
    }

    /// Label used in logs
    pub fn name(&self) -> String {
        match self {
            RenderRequest::Navigate(nav) => format!("Request : {}", nav.url),
            RenderRequest::Script { script, .. } => format!("Script : {}", script),
        }
    }

    /// Whether the task ends by capturing the page document (as opposed to a
    /// script value).
    pub fn captures_document(&self) -> bool {
        match self {
            RenderRequest::Navigate(_) => true,
            RenderRequest::Script {
                runs_on_loaded_page,
                ..
            } => *runs_on_loaded_page,
        }
    }
}

impl From<NavigationRequest> for RenderRequest {
    fn from(nav: NavigationRequest) -> Self {
        RenderRequest::Navigate(nav)
    }
}

/// Response details reported by the engine for the main document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status code, when the engine exposes it
    pub status: Option<u16>,
    /// MIME type of the main document
    pub mime_type: Option<String>,
    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// The `(result, response, error)` triple delivered on task completion.
///
/// A missing result with no error other than `EngineUnavailable` is a soft
/// failure: the task never reached the engine.
#[derive(Debug, Default)]
pub struct RenderOutput {
    /// Rendered document or script value as bytes
    pub result: Option<Vec<u8>>,
    /// Main document response, if one was observed
    pub response: Option<ResponseMetadata>,
    /// Error captured by the task
    pub error: Option<Error>,
}

impl RenderOutput {
    /// Result decoded as UTF-8, if present and valid.
    pub fn text(&self) -> Option<&str> {
        self.result
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn is_soft_failure(&self) -> bool {
        self.result.is_none() && matches!(self.error, None | Some(Error::EngineUnavailable))
    }

    /// Collapse into a `Result`, dropping partial content on error.
    pub fn into_result(self) -> Result<Vec<u8>> {
        match (self.error, self.result) {
            (Some(err), _) => Err(err),
            (None, Some(bytes)) => Ok(bytes),
            (None, None) => Err(Error::EngineUnavailable),
        }
    }
}
