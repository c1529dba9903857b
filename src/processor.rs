use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    partition::Chunk,
    worker::{FetchWorker, ScrapeOutcome, ScrapedItem},
};

/// The outcomes of one chunk, in the chunk's URL order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSet {
    chunk_index: usize,
    outcomes: Vec<ScrapeOutcome>,
    /// Set when processing stopped early; `outcomes` then covers a prefix
    /// of the chunk.
    cancelled: bool,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl ResultSet {
    pub fn new(chunk_index: usize, outcomes: Vec<ScrapeOutcome>) -> Self {
        let now = Utc::now();
        Self {
            chunk_index,
            outcomes,
            cancelled: false,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    pub fn outcomes(&self) -> &[ScrapeOutcome] {
        &self.outcomes
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn successes(&self) -> impl Iterator<Item = &ScrapedItem> {
        self.outcomes.iter().filter_map(ScrapeOutcome::item)
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }
}

/// Runs one chunk through a [`FetchWorker`], one URL at a time.
///
/// Consumed by [`process`](Self::process), so the worker's fetcher is
/// released as soon as the chunk is done, however it ends.
pub struct ChunkProcessor {
    worker: FetchWorker,
}

impl ChunkProcessor {
    pub fn new(worker: FetchWorker) -> Self {
        Self { worker }
    }

    pub async fn process(self, chunk: Chunk) -> ResultSet {
        self.process_until(chunk, &CancellationToken::new()).await
    }

    /// Processes `chunk` until done or until `token` is cancelled. On
    /// cancellation the outcomes collected so far are kept and the URL in
    /// flight is dropped.
    pub async fn process_until(self, chunk: Chunk, token: &CancellationToken) -> ResultSet {
        let started_at = Utc::now();
        let mut outcomes = Vec::with_capacity(chunk.len());
        let mut cancelled = false;
        tracing::info!(chunk = chunk.index(), urls = chunk.len(), "processing chunk");

        for url in chunk.urls() {
            if token.is_cancelled() {
                cancelled = true;
                break;
            }
            tracing::info!(chunk = chunk.index(), url = url.as_str(), "scraping");
            match self.worker.fetch_one_until(url, token).await {
                Some(outcome) => outcomes.push(outcome),
                None => {
                    cancelled = true;
                    break;
                }
            }
        }

        let result_set = ResultSet {
            chunk_index: chunk.index(),
            outcomes,
            cancelled,
            started_at,
            finished_at: Utc::now(),
        };
        if cancelled {
            tracing::warn!(
                chunk = chunk.index(),
                completed = result_set.outcomes.len(),
                total = chunk.len(),
                "chunk cancelled, keeping completed outcomes"
            );
        }
        tracing::info!(
            chunk = chunk.index(),
            successes = result_set.success_count(),
            failures = result_set.failure_count(),
            "chunk done"
        );
        result_set
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        extractor::{ExtractionRules, Extractor},
        fetcher::{FetchErrorKind, ScriptedFetcher, ScriptedResponse},
        job::UrlSpec,
        worker::FetchOptions,
    };

    fn page(count: u64) -> String {
        format!(
            r#"<span id="productTitle">Item {0}</span>
               <span id="acrCustomerReviewText">{0} ratings</span>"#,
            count
        )
    }

    fn chunk(urls: &[&str]) -> Chunk {
        Chunk::new(
            3,
            urls.iter().map(|url| UrlSpec::parse(url).unwrap()).collect(),
        )
    }

    fn processor(fetcher: &ScriptedFetcher, delay: Duration) -> ChunkProcessor {
        let options = FetchOptions {
            timeout: Duration::from_secs(5),
            headless: true,
            delay,
            max_network_retries: 0,
        };
        let extractor = Extractor::new(&ExtractionRules::default()).unwrap();
        ChunkProcessor::new(FetchWorker::new(
            Box::new(fetcher.clone()),
            extractor,
            options,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_abort_the_chunk_and_order_is_kept() {
        let fetcher = ScriptedFetcher::new()
            .with_page("https://a.com/1", page(10))
            .with_error("https://a.com/2", FetchErrorKind::Blocked)
            .with_response("https://a.com/3", ScriptedResponse::Hang)
            .with_page("https://a.com/4", page(40));

        let result = processor(&fetcher, Duration::from_millis(100))
            .process(chunk(&[
                "https://a.com/1",
                "https://a.com/2",
                "https://a.com/3",
                "https://a.com/4",
            ]))
            .await;

        assert_eq!(result.chunk_index(), 3);
        assert!(!result.cancelled());
        let urls: Vec<&str> = result.outcomes().iter().map(ScrapeOutcome::url).collect();
        assert_eq!(
            urls,
            vec!["https://a.com/1", "https://a.com/2", "https://a.com/3", "https://a.com/4"]
        );
        assert_eq!(result.success_count(), 2);
        assert_eq!(result.failure_count(), 2);
        assert_eq!(
            result.outcomes()[2],
            ScrapeOutcome::Failure {
                url: "https://a.com/3".into(),
                reason: FetchErrorKind::Timeout,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_are_sequential() {
        let fetcher = ScriptedFetcher::new()
            .with_latency(Duration::from_secs(1))
            .with_page("https://a.com/1", page(1))
            .with_page("https://a.com/2", page(2))
            .with_page("https://a.com/3", page(3));

        let started = tokio::time::Instant::now();
        processor(&fetcher, Duration::from_secs(2))
            .process(chunk(&["https://a.com/1", "https://a.com/2", "https://a.com/3"]))
            .await;
        assert!(started.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_keeps_collected_outcomes() {
        let fetcher = ScriptedFetcher::new()
            .with_page("https://a.com/1", page(1))
            .with_response("https://a.com/2", ScriptedResponse::Hang)
            .with_page("https://a.com/3", page(3));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            canceller.cancel();
        });

        let result = processor(&fetcher, Duration::from_millis(500))
            .process_until(
                chunk(&["https://a.com/1", "https://a.com/2", "https://a.com/3"]),
                &token,
            )
            .await;

        assert!(result.cancelled());
        assert_eq!(result.outcomes().len(), 1);
        assert!(result.outcomes()[0].is_success());
        assert_eq!(fetcher.calls("https://a.com/3"), 0);
    }

    #[tokio::test]
    async fn already_cancelled_token_fetches_nothing() {
        let fetcher = ScriptedFetcher::new().with_page("https://a.com/1", page(1));
        let token = CancellationToken::new();
        token.cancel();
        let result = processor(&fetcher, Duration::ZERO)
            .process_until(chunk(&["https://a.com/1"]), &token)
            .await;
        assert!(result.cancelled());
        assert!(result.outcomes().is_empty());
        assert_eq!(fetcher.total_calls(), 0);
    }
}
