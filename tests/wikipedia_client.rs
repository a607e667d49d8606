mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use wiki_podcast::config::WikipediaConfig;
use wiki_podcast::usage::{CallContext, ContextTag, MemoryUsageLog, UsageKind};
use wiki_podcast::wikipedia::{ArticleSource, WikipediaClient};

use common::{Hits, CORNBREAD_EXTRACT};

async fn client(base_url: String, usage: Arc<MemoryUsageLog>) -> WikipediaClient {
    let config = WikipediaConfig {
        base_url,
        ..WikipediaConfig::default()
    };
    WikipediaClient::new(&config, Duration::from_secs(5), usage).unwrap()
}

#[tokio::test]
async fn existing_and_missing_pages() {
    let hits = Hits::default();
    let url = common::serve(common::mediawiki(hits.clone())).await;
    let usage = Arc::new(MemoryUsageLog::default());
    let wiki = client(url, usage.clone()).await;

    assert!(wiki.page_exists("cornbread").await.unwrap());
    assert!(!wiki.page_exists("Nonexistent Topic Xyz").await.unwrap());
    assert_eq!(hits.all(), vec!["wiki:Cornbread", "wiki:Nonexistent Topic Xyz"]);
    // Existence lookups are not billed.
    assert!(usage.records().is_empty());
}

#[tokio::test]
async fn fetch_cleans_extract_and_records_usage() {
    let url = common::serve(common::mediawiki(Hits::default())).await;
    let usage = Arc::new(MemoryUsageLog::default());
    let wiki = client(url, usage.clone()).await;

    let article = wiki
        .fetch_article("cornbread", &CallContext::test("cornbread"))
        .await
        .unwrap();

    assert!(article.exists);
    assert_eq!(article.topic, "Cornbread");
    assert!(CORNBREAD_EXTRACT.contains("== See also =="));
    assert_eq!(
        article.raw_text,
        "Cornbread is a quick bread made with cornmeal. It became a staple by 1945 [3]. \
Recipes vary widely; some add sugar.\n\nHistory.\n\nNative peoples ground maize long before \
settlers arrived. Settlers adopted the grain quickly.\n\nRegional styles.\n\n\
Southern cornbread is rarely sweet."
    );

    let records = usage.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, UsageKind::Fetch);
    assert_eq!(records[0].quantity, article.raw_text.chars().count() as u64);
    assert_eq!(records[0].cost, 0.0);
    assert_eq!(records[0].context, ContextTag::Test);
}

#[tokio::test]
async fn fetching_missing_page_is_not_found() {
    let url = common::serve(common::mediawiki(Hits::default())).await;
    let usage = Arc::new(MemoryUsageLog::default());
    let wiki = client(url, usage.clone()).await;

    let err = wiki
        .fetch_article("Nonexistent Topic Xyz", &CallContext::test("x"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "NotFoundError");
    assert!(usage.records().is_empty());
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let wiki = client(common::dead_url().await, Arc::default()).await;
    let err = wiki.page_exists("Cornbread").await.unwrap_err();
    assert_eq!(err.kind(), "NetworkError");
}
