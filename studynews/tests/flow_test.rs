use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::SearchConfig;
use mockito::{Matcher, Mock, Server, ServerGuard};
use studynews::flow::{Enrichment, FlowError, NewsFlow};
use studynews::llm::planner::{EnrichAll, EnrichmentPlanner};
use studynews::scraping::{ContentFetcher, Extraction, ExtractionError, ExtractionProvider, ParserServiceExtractor};
use studynews::search::{Candidate, FeedSearchSource, NewsSource, SearchQuery};
use studynews::validation::ArticleUrl;
use studynews::tools::{FetchArticleTool, ToolRegistry};

fn rss(items: &[(String, String)]) -> String {
    let mut body = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Search</title>"#);
    for (title, link) in items {
        body.push_str(&format!(
            "<item><title>{title}</title><link>{link}</link><description>Snippet for {title}</description></item>"
        ));
    }
    body.push_str("</channel></rss>");
    body
}

fn article_url(n: usize) -> String {
    format!("https://news.example.com/story-{n}")
}

async fn flow(server: &ServerGuard, planner: Arc<dyn EnrichmentPlanner>) -> NewsFlow {
    let search = SearchConfig {
        feed_url_template: format!("{}/rss?q={{query}}", server.url()),
        timeout_seconds: 5,
        max_candidates: 20,
    };
    let source = FeedSearchSource::new(&search, "studynews-test")
        .unwrap()
        .with_backoff(Duration::from_millis(10));

    let extractor = ParserServiceExtractor::new(&format!("{}/parse", server.url()), "studynews-test").unwrap();
    let fetcher = ContentFetcher::new(Arc::new(extractor), Duration::from_secs(5));
    let tools = ToolRegistry::new().with(Arc::new(FetchArticleTool::new(Arc::new(fetcher))));

    NewsFlow::new(Arc::new(source), tools, planner).with_max_concurrent(3)
}

fn query(limit: usize) -> SearchQuery {
    SearchQuery {
        topic: "plate tectonics".to_string(),
        category: None,
        limit,
    }
}

#[tokio::test]
async fn partial_enrichment_failures_fall_back_to_snippets() {
    let mut server = Server::new_async().await;

    let items: Vec<(String, String)> = (0..5).map(|n| (format!("Story {n}"), article_url(n))).collect();
    let _feed = server
        .mock("GET", "/rss")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(rss(&items))
        .create_async()
        .await;

    let mut mocks = Vec::new();
    for n in 0..5 {
        let mock = server
            .mock("GET", "/parse")
            .match_query(Matcher::UrlEncoded("url".into(), article_url(n)));
        let mock = match n {
            1 => mock.with_status(500),
            3 => mock.with_status(200).with_body(r#"{"content": null}"#),
            _ => mock
                .with_status(200)
                .with_body(format!(r#"{{"content": "<p>Full story {n}</p>"}}"#)),
        };
        mocks.push(mock.create_async().await);
    }

    let articles = flow(&server, Arc::new(EnrichAll)).await.run(&query(10)).await.unwrap();

    assert_eq!(articles.len(), 5);
    let full: Vec<_> = articles.iter().filter(|a| a.enrichment == Enrichment::Full).collect();
    let fallback: Vec<_> = articles.iter().filter(|a| a.enrichment == Enrichment::Snippet).collect();
    assert_eq!(full.len(), 3);
    assert_eq!(fallback.len(), 2);

    for a in &fallback {
        assert!(a.content.is_none());
        assert_eq!(a.snippet, format!("Snippet for {}", a.title));
    }
    assert_eq!(articles[0].content.as_deref(), Some("<p>Full story 0</p>"));

    // Acquisition order is kept when the planner does not reorder
    let urls: Vec<String> = articles.iter().map(|a| a.url.clone()).collect();
    assert_eq!(urls, (0..5).map(article_url).collect::<Vec<_>>());

    for mock in mocks {
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn acquisition_failure_is_an_error_not_an_empty_brief() {
    let mut server = Server::new_async().await;
    let _feed = server
        .mock("GET", "/rss")
        .match_query(Matcher::Any)
        .with_status(403)
        .create_async()
        .await;

    let result = flow(&server, Arc::new(EnrichAll)).await.run(&query(10)).await;
    assert!(matches!(result, Err(FlowError::Acquisition(_))));
}

#[tokio::test]
async fn zero_candidates_is_an_empty_success() {
    let mut server = Server::new_async().await;
    let _feed = server
        .mock("GET", "/rss")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(rss(&[]))
        .create_async()
        .await;
    let parse = server.mock("GET", "/parse").match_query(Matcher::Any).expect(0).create_async().await;

    let articles = flow(&server, Arc::new(EnrichAll)).await.run(&query(10)).await.unwrap();
    assert!(articles.is_empty());
    parse.assert_async().await;
}

/// Planner that proposes URLs outside the candidate set and misbehaves on select.
struct Fabricator;

#[async_trait::async_trait]
impl EnrichmentPlanner for Fabricator {
    fn name(&self) -> &str {
        "fabricator"
    }

    async fn select(&self, _topic: &str, candidates: &[Candidate]) -> anyhow::Result<Vec<usize>> {
        Ok(vec![candidates.len() + 7, 0])
    }

    async fn rank(&self, _topic: &str, _articles: &[studynews::flow::EnrichedArticle]) -> anyhow::Result<Vec<String>> {
        Ok(vec![
            "https://invented.example/fake".to_string(),
            article_url(2),
            article_url(2),
        ])
    }
}

struct Broken;

#[async_trait::async_trait]
impl EnrichmentPlanner for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn select(&self, _topic: &str, _candidates: &[Candidate]) -> anyhow::Result<Vec<usize>> {
        anyhow::bail!("model unavailable")
    }

    async fn rank(&self, _topic: &str, _articles: &[studynews::flow::EnrichedArticle]) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("model unavailable")
    }
}

async fn three_story_server() -> (ServerGuard, Vec<Mock>) {
    let mut server = Server::new_async().await;
    let mut items: Vec<(String, String)> = (0..3).map(|n| (format!("Story {n}"), article_url(n))).collect();
    // Duplicate link in the feed collapses to its first occurrence
    items.push(("Story 0 again".to_string(), article_url(0)));
    let feed = server
        .mock("GET", "/rss")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(rss(&items))
        .create_async()
        .await;
    let parse = server
        .mock("GET", "/parse")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"content": "<p>body</p>"}"#)
        .create_async()
        .await;
    (server, vec![feed, parse])
}

#[tokio::test]
async fn output_never_contains_invented_or_duplicate_articles() {
    let (server, _mocks) = three_story_server().await;

    let articles = flow(&server, Arc::new(Fabricator)).await.run(&query(10)).await.unwrap();

    let urls: Vec<String> = articles.iter().map(|a| a.url.clone()).collect();
    assert_eq!(urls, vec![article_url(2), article_url(0), article_url(1)]);
    assert_eq!(urls.iter().collect::<HashSet<_>>().len(), urls.len());

    // Only index 0 was a valid selection
    let enriched: Vec<_> = articles.iter().filter(|a| a.enrichment == Enrichment::Full).collect();
    assert_eq!(enriched.len(), 1);
    assert_eq!(enriched[0].url, article_url(0));
    assert_eq!(enriched[0].title, "Story 0");
}

#[tokio::test]
async fn planner_failures_degrade_to_snippets_in_acquisition_order() {
    let (server, _mocks) = three_story_server().await;

    let articles = flow(&server, Arc::new(Broken)).await.run(&query(2)).await.unwrap();

    assert_eq!(articles.len(), 2);
    assert_eq!(articles[0].url, article_url(0));
    assert_eq!(articles[1].url, article_url(1));
    assert!(articles.iter().all(|a| a.enrichment == Enrichment::NotRequested));
}

struct FiveStories;

#[async_trait::async_trait]
impl NewsSource for FiveStories {
    async fn search(&self, _query: &SearchQuery) -> anyhow::Result<Vec<Candidate>> {
        Ok((0..5)
            .map(|n| Candidate {
                title: format!("Story {n}"),
                url: article_url(n),
                snippet: format!("Snippet for Story {n}"),
                published_at: None,
                source: None,
            })
            .collect())
    }
}

/// Story 0 never answers, story 3 fails, the rest finish in reverse order.
struct UnevenExtractor;

#[async_trait::async_trait]
impl ExtractionProvider for UnevenExtractor {
    fn name(&self) -> &str {
        "uneven"
    }

    async fn extract(&self, url: &ArticleUrl) -> Result<Extraction, ExtractionError> {
        let n: u64 = url.as_str().rsplit('-').next().and_then(|s| s.parse().ok()).unwrap();
        match n {
            0 => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Extraction::default())
            }
            3 => Err(ExtractionError::Status(502)),
            _ => {
                tokio::time::sleep(Duration::from_millis((5 - n) * 40)).await;
                Ok(Extraction {
                    content: Some(format!("<p>Full story {n}</p>")),
                })
            }
        }
    }
}

#[tokio::test]
async fn slow_and_failing_fetches_do_not_hold_up_the_others() {
    let fetcher = ContentFetcher::new(Arc::new(UnevenExtractor), Duration::from_millis(300))
        .with_retry_on_timeout(false);
    let tools = ToolRegistry::new().with(Arc::new(FetchArticleTool::new(Arc::new(fetcher))));
    let flow = NewsFlow::new(Arc::new(FiveStories), tools, Arc::new(EnrichAll)).with_max_concurrent(5);

    let started = Instant::now();
    let articles = flow.run(&query(10)).await.unwrap();
    let elapsed = started.elapsed();

    // One fetch timeout, not the 60 s hang and not the sum of all fetches
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");

    let outcome: Vec<(String, Enrichment)> = articles.iter().map(|a| (a.url.clone(), a.enrichment)).collect();
    assert_eq!(
        outcome,
        vec![
            (article_url(0), Enrichment::Snippet),
            (article_url(1), Enrichment::Full),
            (article_url(2), Enrichment::Full),
            (article_url(3), Enrichment::Snippet),
            (article_url(4), Enrichment::Full),
        ]
    );
    assert_eq!(articles[0].snippet, "Snippet for Story 0");
    assert_eq!(articles[4].content.as_deref(), Some("<p>Full story 4</p>"));
}
