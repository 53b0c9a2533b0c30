//! Web content classifier: token in fetched page, or an extraction failure

use super::patterns::find_token;
use super::status;
use crate::protocol::{
    content_snippet, ExtractionFailure, Record, TokenInfo, WebContent, ERROR_QUEUE, TOKEN_QUEUE,
};
use crate::relay::{Classifier, RouteDecision};
use async_trait::async_trait;
use tracing::{info, warn};

/// Characters of page content quoted in an extraction failure
pub const SNIPPET_CHARS: usize = 100;

/// Error text of an extraction failure
pub const EXTRACTION_FAILED: &str = "Could not extract a token from the web content.";

#[derive(Debug, Default, Clone)]
pub struct WebContentClassifier;

impl WebContentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn decide(content: &WebContent) -> RouteDecision {
        let url = &content.original_url;

        match find_token(&content.fetched_content) {
            Some(token) => {
                info!(
                    tweet_id = %content.source_tweet_id,
                    token = %token,
                    url = %url,
                    "Found token in web content"
                );
                RouteDecision::route(
                    TOKEN_QUEUE,
                    TokenInfo {
                        source_tweet_id: content.source_tweet_id.clone(),
                        original_url: Some(url.clone()),
                        token_symbol: token.to_string(),
                        status: status::EXTRACTED_FROM_WEB_CONTENT.to_string(),
                        details: format!("Found {token} in content fetched from {url}."),
                    },
                )
            }
            None => {
                warn!(tweet_id = %content.source_tweet_id, url = %url, "No token in web content");
                RouteDecision::route(
                    ERROR_QUEUE,
                    ExtractionFailure {
                        source_tweet_id: content.source_tweet_id.clone(),
                        original_url: url.clone(),
                        error: EXTRACTION_FAILED.to_string(),
                        content_snippet: content_snippet(&content.fetched_content, SNIPPET_CHARS),
                    },
                )
            }
        }
    }
}

#[async_trait]
impl Classifier for WebContentClassifier {
    fn name(&self) -> &str {
        "web-classifier"
    }

    fn output_queues(&self) -> Vec<&'static str> {
        vec![TOKEN_QUEUE, ERROR_QUEUE]
    }

    async fn classify(&self, record: &Record) -> RouteDecision {
        Self::decide(&WebContent::from_record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(text: &str) -> Record {
        WebContent {
            source_tweet_id: "t4".to_string(),
            original_url: "https://myblog.com/market".to_string(),
            fetched_content: text.to_string(),
            status: "content fetched".to_string(),
        }
        .into()
    }

    #[tokio::test]
    async fn test_token_in_content_goes_to_token_queue() {
        let decision = WebContentClassifier::new()
            .classify(&content("Analysis suggests $DEF may be undervalued."))
            .await;

        match decision {
            RouteDecision::Route { queue, output } => {
                assert_eq!(queue, TOKEN_QUEUE);
                assert_eq!(output.get_str("token_symbol"), Some("$DEF"));
                assert_eq!(
                    output.get_str("original_url"),
                    Some("https://myblog.com/market")
                );
                assert_eq!(output.get_str("status"), Some("extracted from web content"));
            }
            other => panic!("expected route, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_token_goes_to_error_queue_with_snippet() {
        let text = "a".repeat(250);
        let decision = WebContentClassifier::new().classify(&content(&text)).await;

        match decision {
            RouteDecision::Route { queue, output } => {
                assert_eq!(queue, ERROR_QUEUE);
                assert_eq!(output.get_str("error"), Some(EXTRACTION_FAILED));
                let snippet = output.get_str("content_snippet").unwrap();
                assert_eq!(snippet, format!("{}...", "a".repeat(100)));
            }
            other => panic!("expected route, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_short_content_snippet_still_gets_ellipsis() {
        let decision = WebContentClassifier::new().classify(&content("tiny")).await;
        match decision {
            RouteDecision::Route { output, .. } => {
                assert_eq!(output.get_str("content_snippet"), Some("tiny..."));
            }
            other => panic!("expected route, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_record_routes_to_error_queue() {
        let decision = WebContentClassifier::new().classify(&Record::new()).await;
        match decision {
            RouteDecision::Route { queue, output } => {
                assert_eq!(queue, ERROR_QUEUE);
                assert_eq!(output.get_str("source_tweet_id"), Some("unknown"));
                assert_eq!(output.get_str("original_url"), Some("unknown"));
                assert_eq!(output.get_str("content_snippet"), Some("..."));
            }
            other => panic!("expected route, got {other:?}"),
        }
    }
}
