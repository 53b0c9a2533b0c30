//! Simulated web fetch for URLs found in tweets
//!
//! No network access happens: after a configurable delay the page body is
//! picked from a fixed set by substring match on the URL.

use super::status;
use crate::config::FetcherSection;
use crate::protocol::{Record, UrlInfo, WebContent, WEB_CONTENT_QUEUE};
use crate::relay::{Classifier, RouteDecision};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// Mock page bodies keyed by a URL substring; first match wins
const MOCK_PAGES: [(&str, &str); 5] = [
    ("xyz", "This page discusses the $XYZ project in detail. Huge potential!"),
    (
        "abc-partner",
        "Breaking news: the $ABC coin partnership is confirmed. Price is soaring.",
    ),
    ("web3", "An introduction to Web 3.0 concepts."),
    ("market", "General market analysis with no specific token mentioned."),
    ("def", "Analysis suggests $DEF may be undervalued."),
];

const GENERIC_PAGE: &str = "Some generic web content was found here.";

/// Mock HTML content for a URL
pub fn mock_content(url: &str) -> String {
    let body = MOCK_PAGES
        .iter()
        .find(|(needle, _)| url.contains(*needle))
        .map_or(GENERIC_PAGE, |(_, body)| *body);
    format!("<html><body>Mock content for {url}. {body}</body></html>")
}

/// Turns `url_queue` records into `web_content_queue` records
///
/// The output depends only on the input record, so a redelivered message
/// yields the same `web_content_queue` record.
#[derive(Debug, Clone)]
pub struct UrlFetcherSimulator {
    latency: Duration,
}

impl UrlFetcherSimulator {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    pub fn from_config(config: &FetcherSection) -> Self {
        Self::new(Duration::from_millis(config.simulated_latency_ms))
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }
}

#[async_trait]
impl Classifier for UrlFetcherSimulator {
    fn name(&self) -> &str {
        "url-fetcher"
    }

    fn output_queues(&self) -> Vec<&'static str> {
        vec![WEB_CONTENT_QUEUE]
    }

    async fn classify(&self, record: &Record) -> RouteDecision {
        let info = UrlInfo::from_record(record);
        if info.url.trim().is_empty() {
            // Still fetched: the generic page is published for it
            warn!(tweet_id = %info.source_tweet_id, "URL record has no url");
        }

        info!(tweet_id = %info.source_tweet_id, url = %info.url, "Simulating fetch");
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let content = WebContent {
            fetched_content: mock_content(&info.url),
            source_tweet_id: info.source_tweet_id,
            original_url: info.url,
            status: status::CONTENT_FETCHED.to_string(),
        };
        info!(tweet_id = %content.source_tweet_id, "Simulated fetch complete");
        RouteDecision::route(WEB_CONTENT_QUEUE, content)
    }
}
