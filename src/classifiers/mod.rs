//! Stage classifiers for the tweet pipeline
//!
//! - [`TweetClassifier`] - `tweet_queue` to `token_queue` or `url_queue`
//! - [`UrlFetcherSimulator`] - `url_queue` to `web_content_queue`
//! - [`WebContentClassifier`] - `web_content_queue` to `token_queue` or `error_queue`

pub mod patterns;
pub mod tweet;
pub mod url_fetcher;
pub mod web_content;

pub use tweet::TweetClassifier;
pub use url_fetcher::{mock_content, UrlFetcherSimulator};
pub use web_content::WebContentClassifier;

/// `status` values written by the classifiers
pub mod status {
    pub const EXTRACTED_FROM_TWEET: &str = "extracted from tweet";
    pub const EXTRACTED_FROM_WEB_CONTENT: &str = "extracted from web content";
    pub const CONTENT_FETCHED: &str = "content fetched";
}
