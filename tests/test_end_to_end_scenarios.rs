//! End-to-end pipeline scenarios over the in-memory broker
//!
//! Each scenario runs the real stage classifiers inside relay workers and
//! inspects what lands on the downstream queues.


use std::sync::Arc;
use std::time::Duration;
use test_helpers::{spawn_worker, worker_config, RunningWorker, WAIT};
use tokio::sync::watch;
use tweet_relay::classifiers::{status, web_content::EXTRACTION_FAILED};
use tweet_relay::config::{CrawlerSection, FetcherSection, RelayConfig};
use tweet_relay::crawler::{mock_tweets, MockCrawler};
use tweet_relay::pipeline::Stage;
use tweet_relay::protocol::{
    Record, Tweet, DEAD_LETTER_QUEUE, ERROR_QUEUE, TOKEN_QUEUE, TWEET_QUEUE, URL_QUEUE,
    WEB_CONTENT_QUEUE,
};
use tweet_relay::testing::{InMemoryBroker, StaticClassifier};

fn pipeline_config() -> RelayConfig {
    RelayConfig {
        worker: worker_config(),
        fetcher: FetcherSection {
            simulated_latency_ms: 0,
        },
        ..Default::default()
    }
}

async fn spawn_stage(broker: &InMemoryBroker, stage: Stage) -> RunningWorker {
    let config = pipeline_config();
    spawn_worker(
        broker,
        stage.classifier(&config),
        stage.input_queue(),
        &config.worker,
    )
    .await
}

#[tokio::test]
async fn test_scenario_token_takes_priority_over_url() {
    let broker = InMemoryBroker::new();
    broker
        .enqueue_record(
            TWEET_QUEUE,
            &Tweet::new("t1", "$XYZ to the moon https://example.com/xyz").into(),
        )
        .await;

    let worker = spawn_stage(&broker, Stage::TweetClassifier).await;
    assert!(broker.wait_until_drained(TWEET_QUEUE, WAIT).await);
    worker.shutdown().await.unwrap();

    let tokens = broker.records_in(TOKEN_QUEUE).await;
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].get_str("source_tweet_id"), Some("t1"));
    assert_eq!(tokens[0].get_str("token_symbol"), Some("$XYZ"));
    assert_eq!(tokens[0].get_str("status"), Some(status::EXTRACTED_FROM_TWEET));
    assert_eq!(tokens[0].schema_version(), Some(1));
    assert_eq!(broker.queue_len(URL_QUEUE).await, 0);
    assert_eq!(broker.acked().await.len(), 1);
}

#[tokio::test]
async fn test_scenario_url_without_token_goes_to_url_queue() {
    let broker = InMemoryBroker::new();
    broker
        .enqueue_record(
            TWEET_QUEUE,
            &Tweet::new("t2", "interesting article https://site.org/x").into(),
        )
        .await;

    let worker = spawn_stage(&broker, Stage::TweetClassifier).await;
    assert!(broker.wait_until_drained(TWEET_QUEUE, WAIT).await);
    worker.shutdown().await.unwrap();

    let urls = broker.records_in(URL_QUEUE).await;
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].get_str("source_tweet_id"), Some("t2"));
    assert_eq!(urls[0].get_str("url"), Some("https://site.org/x"));
    assert_eq!(broker.queue_len(TOKEN_QUEUE).await, 0);
}

#[tokio::test]
async fn test_scenario_numeric_tweet_id_is_carried_downstream() {
    let broker = InMemoryBroker::new();
    broker
        .enqueue(TWEET_QUEUE, br#"{"id": 42, "text": "buy $XYZ"}"#)
        .await;

    let worker = spawn_stage(&broker, Stage::TweetClassifier).await;
    assert!(broker.wait_until_drained(TWEET_QUEUE, WAIT).await);
    worker.shutdown().await.unwrap();

    let tokens = broker.records_in(TOKEN_QUEUE).await;
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].get_str("source_tweet_id"), Some("42"));
    assert_eq!(tokens[0].get_str("token_symbol"), Some("$XYZ"));
}

#[tokio::test]
async fn test_scenario_plain_tweet_is_dropped_and_acked() {
    let broker = InMemoryBroker::new();
    broker
        .enqueue_record(TWEET_QUEUE, &Tweet::new("t3", "no token no link").into())
        .await;

    let worker = spawn_stage(&broker, Stage::TweetClassifier).await;
    assert!(broker.wait_until_drained(TWEET_QUEUE, WAIT).await);
    worker.shutdown().await.unwrap();

    assert_eq!(broker.acked().await.len(), 1);
    assert!(broker.rejected().await.is_empty());
    for queue in [TOKEN_QUEUE, URL_QUEUE, DEAD_LETTER_QUEUE] {
        assert_eq!(broker.queue_len(queue).await, 0, "{queue} should be empty");
    }
}

#[tokio::test]
async fn test_scenario_web_content_routing() {
    let broker = InMemoryBroker::new();
    let with_token = Record::new()
        .with("source_tweet_id", "t5")
        .with("original_url", "https://cryptoanalysis.io/def")
        .with("fetched_content", "Analysis suggests $DEF may be undervalued.")
        .with("status", status::CONTENT_FETCHED);
    let long_text = "No symbols in here at all. ".repeat(10);
    let without_token = Record::new()
        .with("source_tweet_id", "t4")
        .with("original_url", "https://myblog.com/market")
        .with("fetched_content", long_text.as_str())
        .with("status", status::CONTENT_FETCHED);
    broker.enqueue_record(WEB_CONTENT_QUEUE, &with_token).await;
    broker.enqueue_record(WEB_CONTENT_QUEUE, &without_token).await;

    let worker = spawn_stage(&broker, Stage::WebClassifier).await;
    assert!(broker.wait_until_drained(WEB_CONTENT_QUEUE, WAIT).await);
    worker.shutdown().await.unwrap();

    let tokens = broker.records_in(TOKEN_QUEUE).await;
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].get_str("token_symbol"), Some("$DEF"));
    assert_eq!(
        tokens[0].get_str("original_url"),
        Some("https://cryptoanalysis.io/def")
    );
    assert_eq!(
        tokens[0].get_str("status"),
        Some(status::EXTRACTED_FROM_WEB_CONTENT)
    );

    let errors = broker.records_in(ERROR_QUEUE).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].get_str("source_tweet_id"), Some("t4"));
    assert_eq!(errors[0].get_str("error"), Some(EXTRACTION_FAILED));
    let expected_snippet = format!("{}...", &long_text[..100]);
    assert_eq!(
        errors[0].get_str("content_snippet"),
        Some(expected_snippet.as_str())
    );
}

#[tokio::test]
async fn test_malformed_body_is_rejected_without_requeue() {
    let broker = InMemoryBroker::new();
    broker.enqueue(TWEET_QUEUE, b"{\"id\": \"t1\", ").await;
    broker.enqueue(TWEET_QUEUE, b"[1, 2, 3]").await;

    let worker = spawn_stage(&broker, Stage::TweetClassifier).await;
    assert!(broker.wait_until_drained(TWEET_QUEUE, WAIT).await);
    worker.shutdown().await.unwrap();

    let rejected = broker.rejected().await;
    assert_eq!(rejected.len(), 2);
    assert!(rejected.iter().all(|r| !r.requeue));
    assert_eq!(broker.queue_len(TWEET_QUEUE).await, 0);
    assert_eq!(broker.queue_len(TOKEN_QUEUE).await, 0);
    assert_eq!(broker.queue_len(URL_QUEUE).await, 0);

    let dead = broker.records_in(DEAD_LETTER_QUEUE).await;
    assert_eq!(dead.len(), 2);
    assert_eq!(dead[0].get_str("rejected_from"), Some(TWEET_QUEUE));
    assert_eq!(dead[1].get_str("original_body"), Some("[1, 2, 3]"));
}

#[tokio::test]
async fn test_malformed_body_is_discarded_when_dead_lettering_is_disabled() {
    let broker = InMemoryBroker::new();
    broker.enqueue(TWEET_QUEUE, b"not json").await;

    let mut config = pipeline_config();
    config.worker.dead_letter_queue = String::new();
    let stage = Stage::TweetClassifier;
    let worker = spawn_worker(
        &broker,
        stage.classifier(&config),
        stage.input_queue(),
        &config.worker,
    )
    .await;
    assert!(broker.wait_until_drained(TWEET_QUEUE, WAIT).await);
    worker.shutdown().await.unwrap();

    assert_eq!(broker.rejected().await.len(), 1);
    assert!(!broker
        .declared_queues()
        .await
        .contains(&DEAD_LETTER_QUEUE.to_string()));
    assert!(broker.unroutable().await.is_empty());
}

#[tokio::test]
async fn test_publish_failure_rejects_instead_of_acking() {
    let broker = InMemoryBroker::new();
    broker.fail_publish(TOKEN_QUEUE).await;
    broker
        .enqueue_record(TWEET_QUEUE, &Tweet::new("t1", "buy $XYZ").into())
        .await;

    let worker = spawn_stage(&broker, Stage::TweetClassifier).await;
    assert!(broker.wait_until_drained(TWEET_QUEUE, WAIT).await);
    worker.shutdown().await.unwrap();

    assert!(broker.acked().await.is_empty());
    let rejected = broker.rejected().await;
    assert_eq!(rejected.len(), 1);
    assert!(!rejected[0].requeue);

    let dead = broker.records_in(DEAD_LETTER_QUEUE).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].get_str("source_tweet_id"), Some("t1"));
    let reason = dead[0].get_str("reject_reason").unwrap_or_default();
    assert!(reason.starts_with("processing failed"), "reason was {reason}");
    assert!(reason.contains(TOKEN_QUEUE));
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_delivery() {
    let broker = InMemoryBroker::new();
    broker
        .enqueue_record(TWEET_QUEUE, &Tweet::new("t1", "first").into())
        .await;
    broker
        .enqueue_record(TWEET_QUEUE, &Tweet::new("t2", "second").into())
        .await;

    let classifier =
        Arc::new(StaticClassifier::routing(TOKEN_QUEUE).with_delay(Duration::from_millis(300)));
    let worker = spawn_worker(&broker, classifier.clone(), TWEET_QUEUE, &worker_config()).await;

    // Wait for the first delivery to be taken, then ask to stop mid-flight
    let deadline = tokio::time::Instant::now() + WAIT;
    while broker.unacked_count().await == 0 {
        assert!(tokio::time::Instant::now() < deadline, "no delivery taken");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    worker.shutdown().await.unwrap();

    assert_eq!(classifier.calls(), 1);
    assert_eq!(broker.acked().await.len(), 1);
    assert_eq!(broker.queue_len(TOKEN_QUEUE).await, 1);
    assert_eq!(broker.queue_len(TWEET_QUEUE).await, 1);
    assert_eq!(broker.unacked_count().await, 0);
    assert_eq!(broker.cancel_calls().await, 1);
    assert_eq!(broker.close_calls().await, 1);
}

#[tokio::test]
async fn test_full_pipeline_from_crawler_to_sinks() {
    let broker = InMemoryBroker::new();

    let workers = vec![
        spawn_stage(&broker, Stage::TweetClassifier).await,
        spawn_stage(&broker, Stage::UrlFetcher).await,
        spawn_stage(&broker, Stage::WebClassifier).await,
    ];

    let mut crawler = MockCrawler::new(
        broker.clone(),
        &CrawlerSection {
            publish_interval_ms: 0,
        },
    );
    let report = crawler.run(&mock_tweets()).await.unwrap();
    assert_eq!(report.published, 5);

    for queue in [TWEET_QUEUE, URL_QUEUE, WEB_CONTENT_QUEUE] {
        assert!(broker.wait_until_drained(queue, WAIT).await, "{queue} not drained");
    }
    for worker in workers {
        worker.shutdown().await.unwrap();
    }

    let mut token_sources: Vec<String> = broker
        .records_in(TOKEN_QUEUE)
        .await
        .iter()
        .filter_map(|r| r.get_str("source_tweet_id").map(str::to_string))
        .collect();
    token_sources.sort();
    assert_eq!(token_sources, vec!["tweet_1", "tweet_3", "tweet_5"]);

    let mut error_sources: Vec<String> = broker
        .records_in(ERROR_QUEUE)
        .await
        .iter()
        .filter_map(|r| r.get_str("source_tweet_id").map(str::to_string))
        .collect();
    error_sources.sort();
    assert_eq!(error_sources, vec!["tweet_2", "tweet_4"]);

    assert!(broker.rejected().await.is_empty());
    assert_eq!(broker.queue_len(DEAD_LETTER_QUEUE).await, 0);
}

#[tokio::test]
async fn test_stop_requested_before_any_delivery() {
    let broker = InMemoryBroker::new();
    broker
        .enqueue_record(TWEET_QUEUE, &Tweet::new("t1", "$XYZ").into())
        .await;

    let config = pipeline_config();
    let mut worker = Stage::TweetClassifier.worker(broker.clone(), &config);
    worker.start().await.unwrap();

    let (_stop, stop_rx) = watch::channel(true);
    worker.run(stop_rx).await.unwrap();

    assert_eq!(broker.queue_len(TWEET_QUEUE).await, 1);
    assert!(broker.acked().await.is_empty());
}
