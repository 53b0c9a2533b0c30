//! Mock crawler: publishes a fixed set of tweets to `tweet_queue`

use crate::config::CrawlerSection;
use crate::error::{RelayError, RelayResult};
use crate::protocol::{Record, Tweet, TWEET_QUEUE};
use crate::transport::{Broker, PublishRecordError};
use std::time::Duration;
use tracing::{error, info, warn, Instrument, Span};

/// The five tweets the crawler publishes
pub fn mock_tweets() -> Vec<Tweet> {
    vec![
        Tweet::new(
            "tweet_1",
            "Check out the new $XYZ token, it's going to the moon! Info: https://example.com/xyz",
        ),
        Tweet::new(
            "tweet_2",
            "Just read an interesting article about web3. Link: https://anothersite.org/web3",
        ),
        Tweet::new(
            "tweet_3",
            "Rumours about a $ABC coin partnership. More details: https://news.com/abc-partner",
        ),
        Tweet::new(
            "tweet_4",
            "My take on current market trends. Visit https://myblog.com/market",
        ),
        Tweet::new(
            "tweet_5",
            "Is $DEF the next big thing? Read the analysis here: https://cryptoanalysis.io/def",
        ),
    ]
}

/// Result of one crawl run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub published: usize,
    /// Tweets that could not be encoded
    pub skipped: usize,
    /// True when a broker failure cut the run short
    pub aborted: bool,
}

/// Producer publishing tweets on its own broker connection
pub struct MockCrawler<B: Broker> {
    broker: B,
    interval: Duration,
    span: Span,
}

impl<B: Broker> MockCrawler<B> {
    pub fn new(broker: B, config: &CrawlerSection) -> Self {
        Self {
            broker,
            interval: Duration::from_millis(config.publish_interval_ms),
            span: crate::broker_span!(operation = "crawl", queue = TWEET_QUEUE),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Connect, publish `tweets`, close.
    ///
    /// An unencodable tweet is skipped; the first broker failure stops the run.
    pub async fn run(&mut self, tweets: &[Tweet]) -> RelayResult<CrawlReport> {
        let span = self.span.clone();
        self.crawl(tweets).instrument(span).await
    }

    async fn crawl(&mut self, tweets: &[Tweet]) -> RelayResult<CrawlReport> {
        self.broker.connect().await.map_err(RelayError::connection)?;
        if let Err(e) = self.broker.declare_queue(TWEET_QUEUE).await {
            warn!(error = %e, "Queue declaration failed, continuing");
        }

        info!(count = tweets.len(), "Publishing mock tweets");
        let report = self.publish_all(tweets).await;

        if let Err(e) = self.broker.close().await {
            error!(error = %e, "Failed to close broker connection");
        }
        info!(
            published = report.published,
            skipped = report.skipped,
            aborted = report.aborted,
            "Mock tweet publishing finished"
        );
        Ok(report)
    }

    async fn publish_all(&self, tweets: &[Tweet]) -> CrawlReport {
        let mut report = CrawlReport::default();

        for tweet in tweets {
            let mut record = Record::from(tweet.clone());
            record.stamp(None);

            match self.broker.publish_record(TWEET_QUEUE, &record).await {
                Ok(()) => {
                    info!(tweet_id = %tweet.id, "Published tweet");
                    report.published += 1;
                }
                Err(PublishRecordError::Encode(e)) => {
                    error!(tweet_id = %tweet.id, error = %e, "Could not encode tweet, skipping");
                    report.skipped += 1;
                    continue;
                }
                Err(PublishRecordError::Broker(e)) => {
                    error!(tweet_id = %tweet.id, error = %e, "Publishing tweet failed, stopping");
                    report.aborted = true;
                    break;
                }
            }

            if !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::InMemoryBroker;

    fn no_delay() -> CrawlerSection {
        CrawlerSection {
            publish_interval_ms: 0,
        }
    }

    #[test]
    fn test_mock_tweets() {
        let tweets = mock_tweets();
        assert_eq!(tweets.len(), 5);
        assert_eq!(tweets[0].id, "tweet_1");
        assert!(tweets[0].text.contains("$XYZ"));
        assert!(tweets[4].text.contains("https://cryptoanalysis.io/def"));
    }

    #[tokio::test]
    async fn test_crawl_publishes_all_tweets_in_order() {
        let broker = InMemoryBroker::new();
        let mut crawler = MockCrawler::new(broker.clone(), &no_delay());

        let report = crawler.run(&mock_tweets()).await.unwrap();

        assert_eq!(
            report,
            CrawlReport {
                published: 5,
                skipped: 0,
                aborted: false
            }
        );
        let records = broker.records_in(TWEET_QUEUE).await;
        let ids: Vec<_> = records.iter().filter_map(|r| r.get_str("id")).collect();
        assert_eq!(ids, vec!["tweet_1", "tweet_2", "tweet_3", "tweet_4", "tweet_5"]);
        assert!(records.iter().all(|r| r.schema_version() == Some(1)));
        assert_eq!(broker.close_calls().await, 1);
    }

    #[tokio::test]
    async fn test_crawl_stops_at_first_publish_failure() {
        let broker = InMemoryBroker::new();
        broker.fail_publish(TWEET_QUEUE).await;
        let mut crawler = MockCrawler::new(broker.clone(), &no_delay());

        let report = crawler.run(&mock_tweets()).await.unwrap();

        assert_eq!(report.published, 0);
        assert!(report.aborted);
        assert_eq!(broker.close_calls().await, 1);
    }

    #[tokio::test]
    async fn test_crawl_continues_when_declare_fails() {
        // Queue exists already, so the failed redeclaration is harmless
        let broker = InMemoryBroker::new();
        broker
            .enqueue_record(TWEET_QUEUE, &Tweet::new("earlier", "gm").into())
            .await;
        broker.fail_declare(TWEET_QUEUE).await;
        let mut crawler = MockCrawler::new(broker.clone(), &no_delay());

        let tweet = Tweet::new("manual_1", "Watching $QRS closely");
        let report = crawler.run(&[tweet]).await.unwrap();

        assert_eq!(report.published, 1);
        assert!(!report.aborted);
        assert!(broker.declared_queues().await.is_empty());
        let records = broker.records_in(TWEET_QUEUE).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get_str("id"), Some("manual_1"));
    }

    #[tokio::test]
    async fn test_crawl_fails_when_broker_unreachable() {
        let mut crawler = MockCrawler::new(InMemoryBroker::unreachable(), &no_delay());
        let err = crawler.run(&mock_tweets()).await.unwrap_err();
        assert!(matches!(err, RelayError::Connection(_)));
    }
}
