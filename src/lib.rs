//! Tweet Relay - at-least-once queue relays for a mock tweet pipeline
//!
//! A mock crawler publishes tweets to `tweet_queue`. Three relay stages then
//! carry each tweet through RabbitMQ:
//!
//! - `tweet-classifier`: finds a `$TOKEN` or a URL in the tweet text
//! - `url-fetcher`: turns a URL into simulated web content
//! - `web-classifier`: looks for a token in that content
//!
//! Every stage is a [`relay::RelayWorker`] driving a [`relay::Classifier`]
//! over a [`transport::Broker`]. A delivery is acknowledged only after its
//! derived record has been published.
//!
//! # Quick Start
//!
//! ```rust
//! use tweet_relay::classifiers::TweetClassifier;
//! use tweet_relay::protocol::{Record, Tweet, TOKEN_QUEUE};
//! use tweet_relay::relay::{Classifier, RouteDecision};
//!
//! let classifier = TweetClassifier::new();
//! let tweet = Record::from(Tweet::new("tweet_1", "Buying $XYZ today"));
//!
//! let decision = tokio_test::block_on(classifier.classify(&tweet));
//! match decision {
//!     RouteDecision::Route { queue, output } => {
//!         assert_eq!(queue, TOKEN_QUEUE);
//!         assert_eq!(output.get_str("token_symbol"), Some("$XYZ"));
//!     }
//!     RouteDecision::Drop { .. } => unreachable!(),
//! }
//! ```

pub mod classifiers;
pub mod config;
pub mod crawler;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod protocol;
pub mod relay;
pub mod testing;
pub mod transport;

pub use config::*;
pub use crawler::{mock_tweets, CrawlReport, MockCrawler};
pub use error::{RelayError, RelayResult};
pub use pipeline::Stage;
pub use protocol::*;
pub use relay::{Classifier, DeliveryOutcome, RelayWorker, RouteDecision};
pub use transport::{amqp::AmqpClient, Broker, Delivery};
