use std::sync::Arc;
use std::time::Duration;

use mockito::Matcher;
use serde_json::json;
use studynews::scraping::{ContentFetcher, ParsedArticle, ParserServiceExtractor, ReadabilityExtractor};
use studynews::tools::{FetchArticleTool, Tool};
use studynews::validation::ArticleUrl;

const ARTICLE_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Coral reefs under pressure</title></head>
<body>
<nav><a href="/">Home</a> <a href="/science">Science</a></nav>
<article>
  <h1>Coral reefs under pressure</h1>
  <p>Marine biologists report that rising ocean temperatures have triggered another mass bleaching event across the reef, affecting large stretches of shallow water coral.</p>
  <p>Bleaching happens when corals expel the algae living in their tissues, which leaves them white and far more vulnerable to disease and starvation over the following months.</p>
  <p>Researchers say recovery is possible if temperatures fall quickly, but repeated events leave less and less time for the ecosystem to rebuild itself between heatwaves.</p>
</article>
<footer>Copyright Example News</footer>
</body></html>"#;

fn readability_fetcher() -> ContentFetcher {
    let extractor = ReadabilityExtractor::new("studynews-test").unwrap();
    ContentFetcher::new(Arc::new(extractor), Duration::from_secs(5))
}

#[tokio::test]
async fn readability_extracts_article_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/science/coral")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(ARTICLE_PAGE)
        .create_async()
        .await;

    let url = ArticleUrl::parse(&format!("{}/science/coral", server.url())).unwrap();
    let parsed = readability_fetcher().fetch(&url).await;

    let content = parsed.into_content().expect("article content");
    assert!(content.contains("mass bleaching event"));
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_page_is_unavailable_not_error() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/gone")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let url = ArticleUrl::parse(&format!("{}/gone", server.url())).unwrap();
    let parsed = readability_fetcher().fetch(&url).await;

    assert!(matches!(parsed, ParsedArticle::Unavailable { .. }));
    // Only timeouts are retried
    mock.assert_async().await;
}

#[tokio::test]
async fn invalid_url_is_rejected_before_network() {
    let fetcher = readability_fetcher();
    assert!(fetcher.fetch_str("not a url").await.is_err());
    assert!(fetcher.fetch_str("ftp://example.com/file").await.is_err());
}

#[tokio::test]
async fn parser_service_content_passes_through_unchanged() {
    let mut server = mockito::Server::new_async().await;
    let article = "https://example.com/a";
    let mock = server
        .mock("GET", "/parse")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("url".into(), article.into()),
            Matcher::UrlEncoded("contentType".into(), "html".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"content": "<p>Full text</p>", "title": "A", "word_count": 2}"#)
        .create_async()
        .await;

    let extractor = ParserServiceExtractor::new(&format!("{}/parse", server.url()), "studynews-test").unwrap();
    let fetcher = ContentFetcher::new(Arc::new(extractor), Duration::from_secs(5));
    let tool = FetchArticleTool::new(Arc::new(fetcher));

    let out = tool.invoke(json!({ "url": article })).await.unwrap();
    assert_eq!(out, json!({ "content": "<p>Full text</p>" }));
    mock.assert_async().await;
}

#[tokio::test]
async fn parser_service_garbage_becomes_null_content() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/parse")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("<html>definitely not json</html>")
        .create_async()
        .await;

    let extractor = ParserServiceExtractor::new(&format!("{}/parse", server.url()), "studynews-test").unwrap();
    let fetcher = ContentFetcher::new(Arc::new(extractor), Duration::from_secs(5));
    let tool = FetchArticleTool::new(Arc::new(fetcher));

    let out = tool.invoke(json!({ "url": "https://example.com/b" })).await.unwrap();
    assert_eq!(out, json!({ "content": null }));
}
