//! Static pipeline topology
//!
//! Each stage consumes one queue and is started as its own process with
//! `tweet-relay run <stage>`.

use crate::classifiers::{TweetClassifier, UrlFetcherSimulator, WebContentClassifier};
use crate::config::RelayConfig;
use crate::protocol::{TWEET_QUEUE, URL_QUEUE, WEB_CONTENT_QUEUE};
use crate::relay::{Classifier, RelayWorker};
use crate::transport::Broker;
use clap::ValueEnum;
use std::fmt;
use std::sync::Arc;

/// Relay stages of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    /// `tweet_queue` to `token_queue` / `url_queue`
    TweetClassifier,
    /// `url_queue` to `web_content_queue`
    UrlFetcher,
    /// `web_content_queue` to `token_queue` / `error_queue`
    WebClassifier,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::TweetClassifier, Stage::UrlFetcher, Stage::WebClassifier];

    pub fn name(self) -> &'static str {
        match self {
            Stage::TweetClassifier => "tweet-classifier",
            Stage::UrlFetcher => "url-fetcher",
            Stage::WebClassifier => "web-classifier",
        }
    }

    pub fn input_queue(self) -> &'static str {
        match self {
            Stage::TweetClassifier => TWEET_QUEUE,
            Stage::UrlFetcher => URL_QUEUE,
            Stage::WebClassifier => WEB_CONTENT_QUEUE,
        }
    }

    pub fn classifier(self, config: &RelayConfig) -> Arc<dyn Classifier> {
        match self {
            Stage::TweetClassifier => Arc::new(TweetClassifier::new()),
            Stage::UrlFetcher => Arc::new(UrlFetcherSimulator::from_config(&config.fetcher)),
            Stage::WebClassifier => Arc::new(WebContentClassifier::new()),
        }
    }

    /// Build the relay worker for this stage on the given broker
    pub fn worker<B: Broker>(self, broker: B, config: &RelayConfig) -> RelayWorker<B> {
        RelayWorker::new(
            broker,
            self.classifier(config),
            self.input_queue(),
            &config.worker,
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
