use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;

use super::{FetchError, FetchErrorKind, PageFetcher, RawPage, RenderOptions};

/// What a [`ScriptedFetcher`] does when asked for a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResponse {
    Page { status: u16, html: String },
    Error(FetchErrorKind),
    /// Never completes; only a caller-side timeout gets past it.
    Hang,
}

#[derive(Debug, Default)]
struct Script {
    responses: HashMap<String, VecDeque<ScriptedResponse>>,
    calls: HashMap<String, usize>,
    latency: Duration,
}

/// A [`PageFetcher`] that replays canned responses, for tests and demos.
///
/// Responses queued for a URL are served in order; the last one repeats.
/// URLs without a script fail with `NetworkError`. Clones share the script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFetcher {
    script: Arc<Mutex<Script>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page<S: Into<String>>(self, url: &str, html: S) -> Self {
        self.with_response(
            url,
            ScriptedResponse::Page {
                status: 200,
                html: html.into(),
            },
        )
    }

    pub fn with_error(self, url: &str, kind: FetchErrorKind) -> Self {
        self.with_response(url, ScriptedResponse::Error(kind))
    }

    pub fn with_response(self, url: &str, response: ScriptedResponse) -> Self {
        self.lock()
            .responses
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Simulated render time added before every response.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.lock().calls.get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_response(&self, url: &str) -> (Option<ScriptedResponse>, Duration) {
        let mut script = self.lock();
        *script.calls.entry(url.to_string()).or_default() += 1;
        let latency = script.latency;
        let response = script.responses.get_mut(url).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        (response, latency)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    async fn render_and_fetch(
        &self,
        url: &str,
        _options: &RenderOptions,
    ) -> Result<RawPage, FetchError> {
        let (response, latency) = self.next_response(url);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match response {
            Some(ScriptedResponse::Page { status, html }) => Ok(RawPage {
                url: url.to_string(),
                status,
                html,
            }),
            Some(ScriptedResponse::Error(kind)) => {
                Err(FetchError::new(kind, format!("scripted failure for {}", url)))
            }
            Some(ScriptedResponse::Hang) => std::future::pending().await,
            None => Err(FetchError::network(format!("no script for {}", url))),
        }
    }
}
