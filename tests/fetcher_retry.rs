//! Fetcher retry/classification behavior against a mocked HTTP server.

use std::time::Duration;

use httpmock::prelude::*;
use ragline::config::CrawlConfig;
use ragline::ingestion::PageFetcher;
use ragline::types::FetchFailure;
use url::Url;

fn crawl_config() -> CrawlConfig {
    CrawlConfig {
        request_timeout: Duration::from_secs(5),
        request_delay: Duration::ZERO,
        max_retries: 2,
        max_concurrent_fetches: 3,
        user_agent: "ragline-test/0".to_string(),
    }
}

#[tokio::test]
async fn successful_fetch_carries_body_and_status() {
    let server = MockServer::start_async().await;
    let page = server
        .mock_async(|when, then| {
            when.method(GET).path("/docs/ch01");
            then.status(200).body("<html><body><p>hello</p></body></html>");
        })
        .await;

    let fetcher = PageFetcher::new(&crawl_config()).unwrap();
    let url = Url::parse(&server.url("/docs/ch01")).unwrap();
    let result = fetcher.fetch(&url).await;

    assert!(result.success);
    assert_eq!(result.http_status, Some(200));
    assert!(result.raw_content.contains("hello"));
    assert_eq!(page.hits_async().await, 1);
}

#[tokio::test]
async fn retryable_status_exhausts_attempts() {
    let server = MockServer::start_async().await;
    let page = server
        .mock_async(|when, then| {
            when.method(GET).path("/docs/busy");
            then.status(503).body("try later");
        })
        .await;

    // max_retries = 2 means three attempts total; keep backoff fast by
    // shrinking the policy through a tiny retry count instead.
    let mut config = crawl_config();
    config.max_retries = 1;
    let fetcher = PageFetcher::new(&config).unwrap();
    let url = Url::parse(&server.url("/docs/busy")).unwrap();
    let result = fetcher.fetch(&url).await;

    assert!(!result.success);
    assert_eq!(result.http_status, Some(503));
    match result.error {
        Some(FetchFailure::RetriesExhausted {
            attempts,
            last_status,
        }) => {
            assert_eq!(attempts, 2);
            assert_eq!(last_status, Some(503));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(page.hits_async().await, 2);
}

#[tokio::test]
async fn non_retryable_status_fails_immediately() {
    let server = MockServer::start_async().await;
    let page = server
        .mock_async(|when, then| {
            when.method(GET).path("/docs/missing");
            then.status(404).body("no such page");
        })
        .await;

    let fetcher = PageFetcher::new(&crawl_config()).unwrap();
    let url = Url::parse(&server.url("/docs/missing")).unwrap();
    let result = fetcher.fetch(&url).await;

    assert!(!result.success);
    assert_eq!(result.error, Some(FetchFailure::Status(404)));
    // A 404 is not worth a second attempt.
    assert_eq!(page.hits_async().await, 1);
}

#[tokio::test]
async fn fetch_many_keeps_order_and_records_invalid_urls() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/docs/a");
            then.status(200).body("page a");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/docs/b");
            then.status(200).body("page b");
        })
        .await;

    let fetcher = PageFetcher::new(&crawl_config()).unwrap();
    let urls = vec![
        server.url("/docs/a"),
        "not a url at all".to_string(),
        server.url("/docs/b"),
    ];
    let results = fetcher.fetch_many(&urls).await;

    assert_eq!(results.len(), 3);
    assert!(results[0].success);
    assert_eq!(results[0].raw_content, "page a");
    assert!(!results[1].success);
    assert!(matches!(
        results[1].error,
        Some(FetchFailure::InvalidUrl(_))
    ));
    assert!(results[2].success);
    assert_eq!(results[2].raw_content, "page b");
}

#[tokio::test]
async fn user_agent_header_is_sent() {
    let server = MockServer::start_async().await;
    let page = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/docs/ua")
                .header("user-agent", "ragline-test/0");
            then.status(200).body("ok");
        })
        .await;

    let fetcher = PageFetcher::new(&crawl_config()).unwrap();
    let url = Url::parse(&server.url("/docs/ua")).unwrap();
    let result = fetcher.fetch(&url).await;

    assert!(result.success);
    page.assert_async().await;
}
