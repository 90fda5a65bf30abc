use std::sync::Arc;

use axum::Router;
use strider_core::testutil::{MockAnalyzer, MockDownloader, MockPipeline, mid};
use strider_core::traits::{Analyzer, Downloader, Pipeline};
use strider_core::{BufferPolicy, HttpRequest, ModuleSet, RequestPolicy, Scheduler};

use strider_server::routes;
use strider_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

pub struct TestApp {
    pub router: Router,
    pub scheduler: Scheduler,
}

/// A scheduler crawling `http://example.com/` with mock modules.
pub fn started_scheduler() -> Scheduler {
    let downloader: Arc<dyn Downloader> = Arc::new(MockDownloader::new(mid("D1")));
    let analyzer: Arc<dyn Analyzer> = Arc::new(MockAnalyzer::new(mid("A2")));
    let pipeline: Arc<dyn Pipeline> = Arc::new(MockPipeline::new(mid("P3")));

    let scheduler = Scheduler::new();
    scheduler
        .init(
            RequestPolicy {
                accepted_domains: vec!["example.com".to_string()],
                max_depth: 0,
            },
            BufferPolicy::default(),
            ModuleSet {
                downloaders: vec![downloader],
                analyzers: vec![analyzer],
                pipelines: vec![pipeline],
            },
        )
        .expect("Failed to init scheduler");
    scheduler
        .start(HttpRequest::parse("http://example.com/").unwrap())
        .expect("Failed to start scheduler");
    scheduler
}

pub fn setup_test_app() -> TestApp {
    build(Some(TEST_API_KEY.to_string()))
}

/// App without an API key: every `/v1` endpoint is disabled.
pub fn setup_test_app_no_auth() -> TestApp {
    build(None)
}

fn build(api_key: Option<String>) -> TestApp {
    let scheduler = started_scheduler();
    let state = Arc::new(AppState {
        scheduler: scheduler.clone(),
        api_key,
    });
    TestApp {
        router: routes::router(state),
        scheduler,
    }
}
