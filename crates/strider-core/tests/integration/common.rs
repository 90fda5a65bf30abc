use std::sync::Arc;
use std::time::Duration;

use strider_core::testutil::{MockAnalyzer, MockDownloader, MockPipeline, mid};
use strider_core::{
    Analysis, Analyzer, BufferPolicy, Downloader, HttpRequest, ModuleSet, Pipeline, Request,
    RequestPolicy, Response, Scheduler,
};

/// Mocks of one crawl, kept so tests can inspect what each stage saw.
pub struct TestCrawl {
    pub scheduler: Scheduler,
    pub downloader: Arc<MockDownloader>,
    pub analyzer: Arc<MockAnalyzer>,
    pub pipeline: Arc<MockPipeline>,
    pub policy: RequestPolicy,
    pub buffers: BufferPolicy,
}

impl TestCrawl {
    /// The same mocks, ready to hand to another `init`.
    pub fn modules(&self) -> ModuleSet {
        ModuleSet {
            downloaders: vec![Arc::clone(&self.downloader) as Arc<dyn Downloader>],
            analyzers: vec![Arc::clone(&self.analyzer) as Arc<dyn Analyzer>],
            pipelines: vec![Arc::clone(&self.pipeline) as Arc<dyn Pipeline>],
        }
    }
}

/// Builds and initializes a scheduler whose analyzer runs `handler`.
pub fn setup_crawl<F>(domains: &[&str], max_depth: u32, handler: F) -> TestCrawl
where
    F: Fn(&Response) -> Analysis + Send + Sync + 'static,
{
    let downloader = Arc::new(MockDownloader::new(mid("D1")));
    let analyzer = Arc::new(MockAnalyzer::with_handler(mid("A1"), handler));
    let pipeline = Arc::new(MockPipeline::new(mid("P1")));

    let policy = RequestPolicy {
        accepted_domains: domains.iter().map(|d| d.to_string()).collect(),
        max_depth,
    };
    let small_buffers = BufferPolicy {
        req_buffer_cap: 2,
        req_max_buffer_number: 8,
        resp_buffer_cap: 2,
        resp_max_buffer_number: 8,
        item_buffer_cap: 2,
        item_max_buffer_number: 8,
        error_buffer_cap: 4,
        error_max_buffer_number: 2,
    };

    let crawl = TestCrawl {
        scheduler: Scheduler::new(),
        downloader,
        analyzer,
        pipeline,
        policy,
        buffers: small_buffers,
    };
    crawl
        .scheduler
        .init(crawl.policy.clone(), crawl.buffers, crawl.modules())
        .unwrap();
    crawl
}

pub fn child(url: &str, depth: u32) -> Request {
    Request::new(HttpRequest::parse(url).unwrap(), depth)
}

/// Waits until the scheduler stays idle for several consecutive checks.
pub async fn wait_until_idle(scheduler: &Scheduler) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut consecutive = 0;
    while consecutive < 5 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "crawl did not go idle: {}",
            scheduler.summary()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        consecutive = if scheduler.idle() { consecutive + 1 } else { 0 };
    }
}
