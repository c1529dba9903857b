use std::sync::Arc;

use popscrape::{fetcher::CloningFactory, JobSpec, Pipeline};
use tokio::signal;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    println!("starting fake_pipeline");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("debug"))
                .expect("telemetry: Creating EnvFilter"),
        )
        .init();

    let job = JobSpec {
        urls: fake_store::URLS.iter().map(|url| url.to_string()).collect(),
        chunk_size: 1,
        delay_ms: 500,
        ..JobSpec::default()
    };
    let config = job.validate().expect("fake job is valid");
    let factory = Arc::new(CloningFactory::new(fake_store::fetcher()));

    let report = Pipeline::new(config, factory)
        .run_until(signal::ctrl_c())
        .await
        .expect("fake pipeline runs");
    println!(
        "{}",
        serde_json::to_string_pretty(&report).expect("report serializes")
    );
}

pub mod fake_store {
    use std::time::Duration;

    use popscrape::{fetcher::ScriptedFetcher, FetchErrorKind};

    pub const URLS: [&str; 3] = [
        "https://store.example/echo-dot",
        "https://store.example/slow-kindle",
        "https://store.example/fire-stick",
    ];

    fn product(title: &str, price: &str, ratings: &str) -> String {
        format!(
            r#"<html><body>
                 <span id="productTitle">{}</span>
                 <span class="a-price"><span class="a-offscreen">{}</span></span>
                 <span id="acrCustomerReviewText">{}</span>
               </body></html>"#,
            title, price, ratings
        )
    }

    pub fn fetcher() -> ScriptedFetcher {
        ScriptedFetcher::new()
            .with_latency(Duration::from_millis(300))
            .with_page(URLS[0], product("Echo Dot (5th Gen)", "$49.99", "100 ratings"))
            .with_error(URLS[1], FetchErrorKind::Timeout)
            .with_page(URLS[2], product("Fire TV Stick 4K", "$39.99", "500 ratings"))
    }
}
