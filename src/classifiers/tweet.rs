//! Tweet classifier: token first, then URL, otherwise drop

use super::patterns::{find_token, find_url};
use super::status;
use crate::protocol::{Record, TokenInfo, Tweet, UrlInfo, TOKEN_QUEUE, URL_QUEUE};
use crate::relay::{Classifier, RouteDecision};
use async_trait::async_trait;
use tracing::{info, warn};

/// Routes tweets carrying a token symbol to `token_queue` and tweets carrying
/// only a URL to `url_queue`
#[derive(Debug, Default, Clone)]
pub struct TweetClassifier;

impl TweetClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Pure routing decision for one tweet
    pub fn decide(tweet: &Tweet) -> RouteDecision {
        if let Some(token) = find_token(&tweet.text) {
            info!(tweet_id = %tweet.id, token = %token, "Found token in tweet");
            return RouteDecision::route(
                TOKEN_QUEUE,
                TokenInfo {
                    source_tweet_id: tweet.id.clone(),
                    original_url: None,
                    token_symbol: token.to_string(),
                    status: status::EXTRACTED_FROM_TWEET.to_string(),
                    details: format!("Found {token} in the tweet text."),
                },
            );
        }

        if let Some(url) = find_url(&tweet.text) {
            info!(tweet_id = %tweet.id, url = %url, "No token in tweet, found URL");
            return RouteDecision::route(
                URL_QUEUE,
                UrlInfo {
                    source_tweet_id: tweet.id.clone(),
                    url: url.to_string(),
                },
            );
        }

        warn!(tweet_id = %tweet.id, "No token or URL in tweet");
        RouteDecision::dropped("no token or URL in tweet")
    }
}

#[async_trait]
impl Classifier for TweetClassifier {
    fn name(&self) -> &str {
        "tweet-classifier"
    }

    fn output_queues(&self) -> Vec<&'static str> {
        vec![TOKEN_QUEUE, URL_QUEUE]
    }

    async fn classify(&self, record: &Record) -> RouteDecision {
        Self::decide(&Tweet::from_record(record))
    }
}
