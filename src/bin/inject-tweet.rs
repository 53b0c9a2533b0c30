//! Tweet injection utility
//!
//! Publishes one hand-written tweet to `tweet_queue`, for poking a running
//! pipeline without the crawler.
//!
//! ## Usage
//!
//! ```bash
//! # Tweet with a token
//! inject-tweet --id manual_1 --text 'Watching $QRS closely'
//!
//! # Tweet with only a URL, against a remote broker
//! inject-tweet --id manual_2 --text "Read https://example.com/post" --host rabbit --port 5672
//! ```

use clap::Parser;
use std::process;
use tracing::{error, info, Instrument};
use tweet_relay::config::{CrawlerSection, RelayConfig, HOST_ENV, PORT_ENV};
use tweet_relay::crawler::MockCrawler;
use tweet_relay::observability::init_default_logging;
use tweet_relay::protocol::{Tweet, TWEET_QUEUE};
use tweet_relay::transport::AmqpTransport;

#[derive(Parser)]
#[command(
    name = "inject-tweet",
    about = "Publish a single tweet to tweet_queue"
)]
struct Args {
    /// Tweet id
    #[arg(long, required = true)]
    id: String,

    /// Tweet text
    #[arg(long, required = true)]
    text: String,

    /// Broker host
    #[arg(long, env = HOST_ENV, default_value = "localhost")]
    host: String,

    /// Broker port
    #[arg(long, env = PORT_ENV, default_value = "5672")]
    port: u16,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_default_logging(0);

    let span = tweet_relay::broker_span!(operation = "inject", queue = TWEET_QUEUE);
    if let Err(e) = inject(args).instrument(span).await {
        error!("Injection failed: {}", e);
        process::exit(1);
    }
}

async fn inject(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = RelayConfig::default();
    config.broker.host = args.host;
    config.broker.port = args.port;
    config.validate()?;

    // Same path as a one-tweet crawl: a failed declaration is only logged
    let broker = AmqpTransport::new(config.broker);
    let no_delay = CrawlerSection {
        publish_interval_ms: 0,
    };
    let span = tracing::Span::current();
    let mut crawler = MockCrawler::new(broker, &no_delay).with_span(span);

    let report = crawler.run(&[Tweet::new(args.id.clone(), args.text)]).await?;
    if report.published != 1 {
        return Err(format!("tweet {} was not published", args.id).into());
    }

    info!(tweet_id = %args.id, "Tweet published");
    Ok(())
}
