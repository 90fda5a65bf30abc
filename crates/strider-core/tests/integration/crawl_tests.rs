use std::sync::Arc;
use std::time::Duration;

use strider_core::testutil::{MockDownloader, mid};
use strider_core::{
    Analysis, CrawlerError, Downloader, ErrorKind, HttpRequest, Item, Module, Status,
};

use crate::integration::common::{child, setup_crawl, wait_until_idle};

const SEED: &str = "http://example.com/";

fn seed() -> HttpRequest {
    HttpRequest::parse(SEED).unwrap()
}

fn item(url: &str) -> Item {
    let mut item = Item::new();
    item.insert("url".into(), serde_json::json!(url));
    item
}

#[tokio::test]
async fn crawl_fetches_child_once_and_persists_item_once() {
    let crawl = setup_crawl(&["example.com"], 1, |response| {
        let mut analysis = Analysis::default();
        let url = response.http_resp().unwrap().url.to_string();
        if url == SEED {
            analysis.push(child("http://example.com/a", 1));
            analysis.push(item(&url));
        }
        // links back to already-seen pages are dropped by admission
        analysis.push(child(SEED, response.depth() + 1));
        analysis
    });

    crawl.scheduler.start(seed()).unwrap();
    wait_until_idle(&crawl.scheduler).await;

    assert_eq!(
        crawl.downloader.requested(),
        vec![SEED.to_string(), "http://example.com/a".to_string()]
    );
    assert_eq!(crawl.pipeline.items(), vec![item(SEED)]);
    assert_eq!(crawl.analyzer.analyzed().len(), 2);

    let summary = crawl.scheduler.summary();
    assert_eq!(summary.url_number, 2);
    assert_eq!(summary.downloaders[0].completed, 2);
    assert_eq!(summary.pipelines[0].accepted, 1);

    crawl.scheduler.stop().unwrap();
    assert_eq!(crawl.scheduler.status(), Status::Stopped);
}

#[tokio::test]
async fn crawl_respects_max_depth() {
    let crawl = setup_crawl(&["example.com"], 2, |response| {
        let mut analysis = Analysis::default();
        let depth = response.depth() + 1;
        analysis.push(child(&format!("http://example.com/level{depth}"), depth));
        analysis
    });

    crawl.scheduler.start(seed()).unwrap();
    wait_until_idle(&crawl.scheduler).await;

    assert_eq!(
        crawl.downloader.requested(),
        vec![
            SEED.to_string(),
            "http://example.com/level1".to_string(),
            "http://example.com/level2".to_string(),
        ]
    );
    crawl.scheduler.stop().unwrap();
}

#[tokio::test]
async fn crawl_stays_within_accepted_domains() {
    let crawl = setup_crawl(&["example.com"], 3, |response| {
        let mut analysis = Analysis::default();
        if response.depth() == 0 {
            analysis.push(child("http://elsewhere.org/", 1));
            analysis.push(child("https://blog.example.com/post", 1));
            analysis.push(child("mailto:someone@example.com", 1));
        }
        analysis
    });

    crawl.scheduler.start(seed()).unwrap();
    wait_until_idle(&crawl.scheduler).await;

    let requested = crawl.downloader.requested();
    assert_eq!(requested.len(), 2);
    assert!(requested.contains(&"https://blog.example.com/post".to_string()));
    crawl.scheduler.stop().unwrap();
}

#[tokio::test]
async fn analyzer_errors_reach_error_stream_tagged() {
    let crawl = setup_crawl(&["example.com"], 1, |_| {
        let mut analysis = Analysis::default();
        analysis.push_error(CrawlerError::illegal_parameter("unparseable body"));
        analysis
    });
    let mut errors = crawl.scheduler.error_chan().unwrap();

    crawl.scheduler.start(seed()).unwrap();
    let error = tokio::time::timeout(Duration::from_secs(2), errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(error.kind(), Some(ErrorKind::Analyzer));
    assert!(error.to_string().contains("unparseable body"));

    crawl.scheduler.stop().unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(1), errors.recv())
        .await
        .unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
async fn scheduler_can_be_reinitialized_after_stop() {
    let crawl = setup_crawl(&["example.com"], 0, |_| Analysis::default());
    crawl.scheduler.start(seed()).unwrap();
    wait_until_idle(&crawl.scheduler).await;
    crawl.scheduler.stop().unwrap();

    assert_eq!(crawl.downloader.handling_number(), 0);
    assert_eq!(crawl.scheduler.summary().url_number, 1);

    // init resets the seen URLs, so the seed is fetched again
    crawl
        .scheduler
        .init(crawl.policy.clone(), crawl.buffers, crawl.modules())
        .unwrap();
    crawl.scheduler.start(seed()).unwrap();
    wait_until_idle(&crawl.scheduler).await;
    assert_eq!(
        crawl.downloader.requested(),
        vec![SEED.to_string(), SEED.to_string()]
    );
    crawl.scheduler.stop().unwrap();
}

#[tokio::test]
async fn restart_without_init_keeps_seen_urls() {
    let crawl = setup_crawl(&["example.com"], 0, |_| Analysis::default());
    crawl.scheduler.start(seed()).unwrap();
    wait_until_idle(&crawl.scheduler).await;
    crawl.scheduler.stop().unwrap();

    crawl.scheduler.start(seed()).unwrap();
    wait_until_idle(&crawl.scheduler).await;
    assert_eq!(crawl.downloader.requested(), vec![SEED.to_string()]);
    crawl.scheduler.stop().unwrap();
}

#[tokio::test]
async fn fetches_are_spread_over_registered_downloaders() {
    let crawl = setup_crawl(&["example.com"], 1, |response| {
        let mut analysis = Analysis::default();
        if response.depth() == 0 {
            for n in 0..20 {
                analysis.push(child(&format!("http://example.com/{n}"), 1));
            }
        }
        analysis
    });
    let second = Arc::new(MockDownloader::new(mid("D2")));
    let mut modules = crawl.modules();
    modules
        .downloaders
        .push(Arc::clone(&second) as Arc<dyn Downloader>);
    crawl
        .scheduler
        .init(crawl.policy.clone(), crawl.buffers, modules)
        .unwrap();

    crawl.scheduler.start(seed()).unwrap();
    wait_until_idle(&crawl.scheduler).await;

    let (first_calls, second_calls) = (crawl.downloader.called_count(), second.called_count());
    assert_eq!(first_calls + second_calls, 21);
    assert!(first_calls > 0, "D1 never selected");
    assert!(second_calls > 0, "D2 never selected");
    crawl.scheduler.stop().unwrap();
}
