use std::time::Duration;

use common::SearchConfig;
use mockito::Matcher;
use studynews::search::{FeedSearchSource, NewsSource, SearchQuery};

const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>"volcanoes" - News</title>
<item>
  <title>Volcano erupts in Iceland</title>
  <link>https://news.example.com/iceland</link>
  <description>&lt;p&gt;Lava flows reached the coast overnight.&lt;/p&gt;</description>
  <pubDate>Tue, 07 Jan 2025 08:30:00 GMT</pubDate>
</item>
<item>
  <title>How magma chambers work</title>
  <link>https://science.example.org/magma</link>
  <description>A short explainer.</description>
</item>
<item>
  <title>Ash cloud grounds flights</title>
  <link>https://news.example.com/ash</link>
</item>
</channel></rss>"#;

fn source(server: &mockito::ServerGuard) -> FeedSearchSource {
    let config = SearchConfig {
        feed_url_template: format!("{}/rss/search?q={{query}}", server.url()),
        timeout_seconds: 5,
        max_candidates: 20,
    };
    FeedSearchSource::new(&config, "studynews-test")
        .unwrap()
        .with_backoff(Duration::from_millis(10))
}

fn query(topic: &str, limit: usize) -> SearchQuery {
    SearchQuery {
        topic: topic.to_string(),
        category: Some("earth science".to_string()),
        limit,
    }
}

#[tokio::test]
async fn search_maps_feed_entries() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/rss/search")
        .match_query(Matcher::UrlEncoded("q".into(), "volcanoes earth science".into()))
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(RSS)
        .create_async()
        .await;

    let candidates = source(&server).search(&query("volcanoes", 2)).await.unwrap();

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].url, "https://news.example.com/iceland");
    assert_eq!(candidates[0].snippet, "Lava flows reached the coast overnight.");
    assert_eq!(candidates[0].source.as_deref(), Some("news.example.com"));
    assert!(candidates[0].published_at.is_some());
    assert_eq!(candidates[1].title, "How magma chambers work");
    mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retried_then_fail() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/rss/search")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let err = source(&server).search(&query("volcanoes", 5)).await.unwrap_err();
    assert!(err.to_string().contains("503"));
    mock.assert_async().await;
}

#[tokio::test]
async fn client_errors_fail_immediately() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/rss/search")
        .match_query(Matcher::Any)
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    assert!(source(&server).search(&query("volcanoes", 5)).await.is_err());
    mock.assert_async().await;
}
