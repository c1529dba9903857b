use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    extractor::{Extracted, Extractor},
    fetcher::{
        BlockDetector, FetchError, FetchErrorKind, MarkerBlockDetector, PageFetcher,
        RenderOptions,
    },
    job::UrlSpec,
    pipeline::Statistics,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub headless: bool,
    /// Pause after every fetch attempt, successful or not.
    pub delay: Duration,
    pub max_network_retries: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(crate::job::DEFAULT_TIMEOUT_MS),
            headless: true,
            delay: Duration::from_millis(crate::job::DEFAULT_DELAY_MS),
            max_network_retries: crate::job::DEFAULT_MAX_NETWORK_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub title: String,
    pub price: String,
    pub buyer_count: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ScrapeOutcome {
    Success(ScrapedItem),
    Failure { url: String, reason: FetchErrorKind },
}

impl ScrapeOutcome {
    pub fn url(&self) -> &str {
        match self {
            ScrapeOutcome::Success(item) => &item.url,
            ScrapeOutcome::Failure { url, .. } => url,
        }
    }

    pub fn item(&self) -> Option<&ScrapedItem> {
        match self {
            ScrapeOutcome::Success(item) => Some(item),
            ScrapeOutcome::Failure { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ScrapeOutcome::Success(_))
    }
}

impl Extracted {
    /// A page only counts when its buyer count was actually read.
    fn into_item(self, url: &UrlSpec) -> Option<ScrapedItem> {
        let buyer_count = self.buyer_count?;
        Some(ScrapedItem {
            title: self.title.unwrap_or_default(),
            price: self.price.unwrap_or_default(),
            buyer_count,
            url: url.to_string(),
        })
    }
}

/// Fetches single URLs with timeout, retry and delay policy applied.
pub struct FetchWorker {
    fetcher: Box<dyn PageFetcher>,
    extractor: Extractor,
    detector: Arc<dyn BlockDetector>,
    options: FetchOptions,
    statistics: Statistics,
}

impl FetchWorker {
    pub fn new(fetcher: Box<dyn PageFetcher>, extractor: Extractor, options: FetchOptions) -> Self {
        Self {
            fetcher,
            extractor,
            detector: Arc::new(MarkerBlockDetector::default()),
            options,
            statistics: Statistics::default(),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn BlockDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Reports into `statistics` instead of a private counter set.
    pub fn with_statistics(mut self, statistics: Statistics) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub async fn fetch_one(&self, url: &UrlSpec) -> ScrapeOutcome {
        let outcome = self.fetch_with_retries(url).await;
        sleep(self.options.delay).await;
        outcome
    }

    /// Like [`fetch_one`](Self::fetch_one), but gives up on the in-flight
    /// fetch once `token` is cancelled. An outcome already obtained is still
    /// returned, with the trailing delay cut short.
    pub async fn fetch_one_until(
        &self,
        url: &UrlSpec,
        token: &CancellationToken,
    ) -> Option<ScrapeOutcome> {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            outcome = self.fetch_with_retries(url) => outcome,
        };
        tokio::select! {
            _ = token.cancelled() => {}
            _ = sleep(self.options.delay) => {}
        }
        Some(outcome)
    }

    async fn fetch_with_retries(&self, url: &UrlSpec) -> ScrapeOutcome {
        let mut retries = 0;
        let outcome = loop {
            match self.attempt(url).await {
                Ok(item) => break ScrapeOutcome::Success(item),
                Err(err)
                    if err.kind.is_retryable() && retries < self.options.max_network_retries =>
                {
                    retries += 1;
                    self.statistics.record_retry();
                    tracing::warn!(url = url.as_str(), retry = retries, "{}", err);
                    sleep(self.options.delay).await;
                }
                Err(err) => {
                    tracing::error!(url = url.as_str(), "scraping error: {}", err);
                    break ScrapeOutcome::Failure {
                        url: url.to_string(),
                        reason: err.kind,
                    };
                }
            }
        };
        self.statistics.record(&outcome);
        outcome
    }

    async fn attempt(&self, url: &UrlSpec) -> Result<ScrapedItem, FetchError> {
        tracing::debug!(url = url.as_str(), fetcher = %self.fetcher.name(), "fetching");
        let render = RenderOptions {
            timeout: self.options.timeout,
            headless: self.options.headless,
        };
        let page = timeout(
            self.options.timeout,
            self.fetcher.render_and_fetch(url.as_str(), &render),
        )
        .await
        .map_err(|_| {
            FetchError::timeout(format!("no response within {:?}", self.options.timeout))
        })??;

        if self.detector.is_blocked(&page) {
            return Err(FetchError::blocked(format!(
                "access denied (status {})",
                page.status
            )));
        }

        let extracted = self.extractor.extract(&page.html);
        tracing::debug!(url = url.as_str(), ?extracted, "extracted");
        extracted
            .into_item(url)
            .ok_or_else(|| FetchError::unparsable("no buyer count on page"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        extractor::ExtractionRules,
        fetcher::{ScriptedFetcher, ScriptedResponse},
    };
    use tokio::time::Instant;

    const URL: &str = "https://www.amazon.com/dp/B0TEST";

    fn product(title: &str, count: &str) -> String {
        format!(
            r#"<span id="productTitle">{}</span>
               <span class="a-price"><span class="a-offscreen">$19.99</span></span>
               <span id="acrCustomerReviewText">{}</span>"#,
            title, count
        )
    }

    fn options(delay_ms: u64) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_millis(500),
            headless: true,
            delay: Duration::from_millis(delay_ms),
            max_network_retries: 1,
        }
    }

    fn worker(fetcher: &ScriptedFetcher, options: FetchOptions) -> FetchWorker {
        let extractor = Extractor::new(&ExtractionRules::default()).unwrap();
        FetchWorker::new(Box::new(fetcher.clone()), extractor, options)
    }

    fn url() -> UrlSpec {
        UrlSpec::parse(URL).unwrap()
    }

    fn failure(reason: FetchErrorKind) -> ScrapeOutcome {
        ScrapeOutcome::Failure {
            url: URL.into(),
            reason,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn successful_fetch_yields_item() {
        let fetcher = ScriptedFetcher::new().with_page(URL, product("Echo Dot", "12,345 ratings"));
        let outcome = worker(&fetcher, options(0)).fetch_one(&url()).await;
        assert_eq!(
            outcome,
            ScrapeOutcome::Success(ScrapedItem {
                title: "Echo Dot".into(),
                price: "$19.99".into(),
                buyer_count: 12_345,
                url: URL.into(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_fetch_times_out() {
        let fetcher = ScriptedFetcher::new().with_response(URL, ScriptedResponse::Hang);
        let outcome = worker(&fetcher, options(0)).fetch_one(&url()).await;
        assert_eq!(outcome, failure(FetchErrorKind::Timeout));
        assert_eq!(fetcher.calls(URL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_is_retried_once() {
        let fetcher = ScriptedFetcher::new()
            .with_error(URL, FetchErrorKind::NetworkError)
            .with_page(URL, product("Echo Dot", "7 ratings"));
        let worker = worker(&fetcher, options(10));
        let outcome = worker.fetch_one(&url()).await;
        assert!(outcome.is_success());
        assert_eq!(fetcher.calls(URL), 2);
        assert_eq!(worker.statistics().snapshot().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_network_error_gives_up_after_retry_budget() {
        let fetcher = ScriptedFetcher::new().with_error(URL, FetchErrorKind::NetworkError);
        let outcome = worker(&fetcher, options(0)).fetch_one(&url()).await;
        assert_eq!(outcome, failure(FetchErrorKind::NetworkError));
        assert_eq!(fetcher.calls(URL), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_is_not_retried() {
        let fetcher = ScriptedFetcher::new().with_error(URL, FetchErrorKind::Blocked);
        let outcome = worker(&fetcher, options(0)).fetch_one(&url()).await;
        assert_eq!(outcome, failure(FetchErrorKind::Blocked));
        assert_eq!(fetcher.calls(URL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn captcha_page_is_classified_as_blocked() {
        let fetcher = ScriptedFetcher::new().with_page(
            URL,
            "<form action=\"/errors/validateCaptcha\">Enter the characters you see below</form>",
        );
        let outcome = worker(&fetcher, options(0)).fetch_one(&url()).await;
        assert_eq!(outcome, failure(FetchErrorKind::Blocked));
    }

    #[tokio::test(start_paused = true)]
    async fn page_without_title_or_count_is_unparsable() {
        let fetcher = ScriptedFetcher::new().with_page(URL, "<html><body>Sorry</body></html>");
        let outcome = worker(&fetcher, options(0)).fetch_one(&url()).await;
        assert_eq!(outcome, failure(FetchErrorKind::UnparsablePage));
    }

    #[tokio::test(start_paused = true)]
    async fn title_without_count_is_unparsable() {
        let fetcher = ScriptedFetcher::new()
            .with_page(URL, r#"<span id="productTitle">Echo Dot</span>"#);
        let outcome = worker(&fetcher, options(0)).fetch_one(&url()).await;
        assert_eq!(outcome, failure(FetchErrorKind::UnparsablePage));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_honored_after_success_and_failure() {
        let fetcher = ScriptedFetcher::new()
            .with_page(URL, product("Echo", "1 rating"))
            .with_error("https://www.amazon.com/dp/FAIL", FetchErrorKind::Blocked);
        let worker = worker(&fetcher, options(2_000));

        let started = Instant::now();
        worker.fetch_one(&url()).await;
        assert!(started.elapsed() >= Duration::from_millis(2_000));

        let started = Instant::now();
        worker
            .fetch_one(&UrlSpec::parse("https://www.amazon.com/dp/FAIL").unwrap())
            .await;
        assert!(started.elapsed() >= Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_in_flight_fetch() {
        let fetcher = ScriptedFetcher::new().with_response(URL, ScriptedResponse::Hang);
        let mut options = options(0);
        options.timeout = Duration::from_secs(3_600);
        let worker = worker(&fetcher, options);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        assert_eq!(worker.fetch_one_until(&url(), &token).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn statistics_count_outcomes_by_kind() {
        let fetcher = ScriptedFetcher::new()
            .with_page(URL, product("Echo", "5 ratings"))
            .with_error("https://a.com/blocked", FetchErrorKind::Blocked);
        let worker = worker(&fetcher, options(0));
        worker.fetch_one(&url()).await;
        worker
            .fetch_one(&UrlSpec::parse("https://a.com/blocked").unwrap())
            .await;
        let snapshot = worker.statistics().snapshot();
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.blocked, 1);
        assert_eq!(snapshot.failures(), 1);
    }

    #[test]
    fn outcomes_serialize_as_tagged_records() {
        let json = serde_json::to_value(failure(FetchErrorKind::Timeout)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "Failure", "url": URL, "reason": "Timeout"})
        );
    }
}
