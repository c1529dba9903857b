//! The page-fetch capability the pipeline is built around.
//!
//! Rendering (a real browser, a plain HTTP client, a test script) lives
//! behind [`PageFetcher`]; everything above it only sees [`RawPage`] or a
//! classified [`FetchError`].

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod http;
mod scripted;

pub use http::HttpFetcher;
pub use scripted::{ScriptedFetcher, ScriptedResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchErrorKind {
    /// The target did not respond within the timeout.
    Timeout,
    /// The target could not be reached.
    NetworkError,
    /// The target responded but denied access.
    Blocked,
    /// The page rendered but carried no usable product data.
    UnparsablePage,
}

impl FetchErrorKind {
    /// Only network failures are worth another attempt within the same run.
    pub fn is_retryable(self) -> bool {
        matches!(self, FetchErrorKind::NetworkError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FetchErrorKind::Timeout => "Timeout",
            FetchErrorKind::NetworkError => "NetworkError",
            FetchErrorKind::Blocked => "Blocked",
            FetchErrorKind::UnparsablePage => "UnparsablePage",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new<S: Into<String>>(kind: FetchErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::new(FetchErrorKind::NetworkError, message)
    }
    pub fn blocked<S: Into<String>>(message: S) -> Self {
        Self::new(FetchErrorKind::Blocked, message)
    }
    pub fn unparsable<S: Into<String>>(message: S) -> Self {
        Self::new(FetchErrorKind::UnparsablePage, message)
    }
}

/// A rendered page as handed back by a [`PageFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub url: String,
    pub status: u16,
    pub html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub timeout: Duration,
    pub headless: bool,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn name(&self) -> String;
    async fn render_and_fetch(
        &self,
        url: &str,
        options: &RenderOptions,
    ) -> Result<RawPage, FetchError>;
}

/// Creates one fetcher per chunk, so any resource a fetcher holds lives
/// exactly as long as one chunk's processing.
#[async_trait]
pub trait FetcherFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn PageFetcher>, FetchError>;
}

/// Hands out clones of a single prototype fetcher.
#[derive(Debug, Clone)]
pub struct CloningFactory<P>(P);

impl<P> CloningFactory<P> {
    pub fn new(prototype: P) -> Self {
        Self(prototype)
    }
}

#[async_trait]
impl<P> FetcherFactory for CloningFactory<P>
where
    P: PageFetcher + Clone + 'static,
{
    async fn create(&self) -> Result<Box<dyn PageFetcher>, FetchError> {
        Ok(Box::new(self.0.clone()))
    }
}

/// Decides whether a page that did render is really an access-denied page.
pub trait BlockDetector: Send + Sync + fmt::Debug {
    fn is_blocked(&self, page: &RawPage) -> bool;
}

/// Flags pages by HTTP status or by well-known robot-check markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerBlockDetector {
    statuses: Vec<u16>,
    markers: Vec<String>,
}

impl MarkerBlockDetector {
    pub fn new(statuses: Vec<u16>, markers: Vec<String>) -> Self {
        let markers = markers.into_iter().map(|m| m.to_lowercase()).collect();
        Self { statuses, markers }
    }
}

impl Default for MarkerBlockDetector {
    fn default() -> Self {
        Self::new(
            vec![401, 403, 429, 503],
            vec![
                "/errors/validateCaptcha".into(),
                "Enter the characters you see below".into(),
                "api-services-support@amazon.com".into(),
                "<title>Robot Check</title>".into(),
                "automated access to amazon data".into(),
            ],
        )
    }
}

impl BlockDetector for MarkerBlockDetector {
    fn is_blocked(&self, page: &RawPage) -> bool {
        if self.statuses.contains(&page.status) {
            return true;
        }
        let html = page.html.to_lowercase();
        self.markers.iter().any(|marker| html.contains(marker))
    }
}
