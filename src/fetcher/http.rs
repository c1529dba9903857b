use async_trait::async_trait;

use super::{FetchError, PageFetcher, RawPage, RenderOptions};

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// A non-rendering fetcher for pages that do not need JavaScript.
///
/// `headless` is meaningless here and ignored.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| FetchError::network(format!("building http client: {}", err)))?;
        Ok(Self { client })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::timeout(err.to_string())
    } else {
        FetchError::network(err.to_string())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    fn name(&self) -> String {
        "http".to_string()
    }

    async fn render_and_fetch(
        &self,
        url: &str,
        options: &RenderOptions,
    ) -> Result<RawPage, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        // 503 passes through to block detection: robot checks are served with it.
        if status.is_server_error() && status.as_u16() != 503 {
            return Err(FetchError::network(format!("server error {}", status)));
        }

        let html = response.text().await.map_err(classify)?;
        Ok(RawPage {
            url: url.to_string(),
            status: status.as_u16(),
            html,
        })
    }
}
