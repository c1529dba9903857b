//! Job input: the URL list and the knobs that drive one pipeline run.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    extractor::{ExtractionRules, Extractor},
    worker::FetchOptions,
};

pub const DEFAULT_CHUNK_SIZE: i64 = 1;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DELAY_MS: u64 = 2_000;
pub const DEFAULT_MAX_NETWORK_RETRIES: u32 = 1;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// A single target URL. Only `http` and `https` URLs are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UrlSpec(String);

impl UrlSpec {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let malformed = |reason: String| ConfigError::MalformedUrl {
            url: raw.to_string(),
            reason,
        };
        if trimmed.is_empty() {
            return Err(malformed("empty url".into()));
        }
        let parsed = url::Url::parse(trimmed).map_err(|err| malformed(err.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => Ok(Self(trimmed.to_string())),
            scheme => Err(malformed(format!("unsupported scheme '{}'", scheme))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.0)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
    }

    /// True when the host equals `allowed` or is one of its subdomains.
    pub fn matches_host(&self, allowed: &str) -> bool {
        let allowed = allowed.trim().trim_start_matches('.').to_ascii_lowercase();
        match self.host() {
            Some(host) => host == allowed || host.ends_with(&format!(".{}", allowed)),
            None => false,
        }
    }
}

impl TryFrom<String> for UrlSpec {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UrlSpec> for String {
    fn from(value: UrlSpec) -> Self {
        value.0
    }
}

impl fmt::Display for UrlSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job input as submitted, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_max_network_retries")]
    pub max_network_retries: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub job_timeout_ms: Option<u64>,
    /// Hosts to keep; an empty list keeps everything.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default)]
    pub rules: Option<ExtractionRules>,
}

fn default_chunk_size() -> i64 {
    DEFAULT_CHUNK_SIZE
}
fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_headless() -> bool {
    true
}
fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}
fn default_max_network_retries() -> u32 {
    DEFAULT_MAX_NETWORK_RETRIES
}
fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            headless: true,
            delay_ms: DEFAULT_DELAY_MS,
            max_network_retries: DEFAULT_MAX_NETWORK_RETRIES,
            concurrency: DEFAULT_CONCURRENCY,
            job_timeout_ms: None,
            allowed_hosts: Vec::new(),
            rules: None,
        }
    }
}

/// A validated job, ready to be partitioned and run.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub urls: Vec<UrlSpec>,
    pub chunk_size: usize,
    pub options: FetchOptions,
    pub concurrency: usize,
    pub job_timeout: Option<Duration>,
    pub extractor: Extractor,
}

impl JobSpec {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|err| ConfigError::MalformedJob(err.to_string()))
    }

    pub fn validate(&self) -> Result<JobConfig, ConfigError> {
        if self.chunk_size < 1 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        let chunk_size = usize::try_from(self.chunk_size)
            .map_err(|_| ConfigError::InvalidChunkSize(self.chunk_size))?;
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }

        let mut urls = Vec::with_capacity(self.urls.len());
        for raw in &self.urls {
            let url = UrlSpec::parse(raw)?;
            if !self.allowed_hosts.is_empty()
                && !self.allowed_hosts.iter().any(|host| url.matches_host(host))
            {
                tracing::warn!(url = url.as_str(), "dropping url outside allowed hosts");
                continue;
            }
            urls.push(url);
        }
        tracing::debug!(
            submitted = self.urls.len(),
            accepted = urls.len(),
            "validated job urls"
        );

        let extractor = match &self.rules {
            Some(rules) => Extractor::new(rules)?,
            None => Extractor::new(&ExtractionRules::default())?,
        };

        Ok(JobConfig {
            urls,
            chunk_size,
            options: FetchOptions {
                timeout: Duration::from_millis(self.timeout_ms),
                headless: self.headless,
                delay: Duration::from_millis(self.delay_ms),
                max_network_retries: self.max_network_retries,
            },
            concurrency: self.concurrency,
            job_timeout: self.job_timeout_ms.map(Duration::from_millis),
            extractor,
        })
    }
}

/// Reads URLs out of a source file.
///
/// Accepts a JSON array of strings, a JSON object with a `urls` array, or
/// plain text with one `http` URL per line.
pub fn parse_url_source(content: &str) -> Vec<String> {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Array(items)) => strings_of(&items),
        Ok(serde_json::Value::Object(map)) => match map.get("urls") {
            Some(serde_json::Value::Array(items)) => strings_of(items),
            _ => Vec::new(),
        },
        Ok(_) => Vec::new(),
        Err(_) => content
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("http"))
            .map(String::from)
            .collect(),
    }
}

fn strings_of(items: &[serde_json::Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.as_str())
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect()
}
