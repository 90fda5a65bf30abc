//! Test utilities: mock implementations of the module traits.
//!
//! Handwritten mocks for the scheduler and registry tests. All mocks use
//! `Arc<Mutex<_>>` for recorded calls so tests can assert on them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::base::{ModuleBase, calculate_score_simple};
use crate::error::CrawlerError;
use crate::mid::Mid;
use crate::models::{HttpRequest, HttpResponse, Item, Request, Response};
use crate::module::{Module, ModuleSummary};
use crate::traits::{Analysis, Analyzer, DownloadOutcome, Downloader, Pipeline};

/// Parses a MID, panicking on malformed input.
pub fn mid(s: &str) -> Mid {
    s.parse().unwrap()
}

/// A `GET` request for `url` at `depth`.
pub fn request(url: &str, depth: u32) -> Request {
    Request::new(HttpRequest::parse(url).unwrap(), depth)
}

/// An HTML response for `url` at `depth`.
pub fn response(url: &str, status: u16, body: &str, depth: u32) -> Response {
    let http = HttpResponse::new(Url::parse(url).unwrap(), status, body)
        .with_header("content-type", "text/html");
    Response::new(http, depth)
}

// ---------------------------------------------------------------------------
// MockDownloader
// ---------------------------------------------------------------------------

/// Answers every request with a fixed body, or with a fixed error.
pub struct MockDownloader {
    base: ModuleBase,
    body: String,
    error: Option<CrawlerError>,
    delay: Duration,
    requested: Arc<Mutex<Vec<String>>>,
}

impl MockDownloader {
    pub fn new(id: Mid) -> Self {
        Self {
            base: ModuleBase::new(id, Some(calculate_score_simple)),
            body: "<html><body>default</body></html>".to_string(),
            error: None,
            delay: Duration::ZERO,
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn with_error(mut self, error: CrawlerError) -> Self {
        self.error = Some(error);
        self
    }

    /// Holds every call open for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// URLs downloaded so far, in call order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl Module for MockDownloader {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, request: Request) -> DownloadOutcome {
        let call = self.base.begin();
        let Some(url) = request.url().cloned() else {
            return DownloadOutcome::failed(CrawlerError::illegal_parameter("nil HTTP request"));
        };
        call.accept();
        self.requested.lock().unwrap().push(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = &self.error {
            return DownloadOutcome::failed(error.clone());
        }
        call.complete();
        let http = HttpResponse::new(url, 200, self.body.as_bytes())
            .with_header("content-type", "text/html");
        DownloadOutcome::ok(Response::new(http, request.depth()))
    }
}

// ---------------------------------------------------------------------------
// MockAnalyzer
// ---------------------------------------------------------------------------

type AnalyzeFn = dyn Fn(&Response) -> Analysis + Send + Sync;

/// Runs a caller-supplied closure over every response.
pub struct MockAnalyzer {
    base: ModuleBase,
    handler: Arc<AnalyzeFn>,
    analyzed: Arc<Mutex<Vec<String>>>,
}

impl MockAnalyzer {
    /// An analyzer that produces nothing.
    pub fn new(id: Mid) -> Self {
        Self::with_handler(id, |_| Analysis::default())
    }

    pub fn with_handler<F>(id: Mid, handler: F) -> Self
    where
        F: Fn(&Response) -> Analysis + Send + Sync + 'static,
    {
        Self {
            base: ModuleBase::new(id, Some(calculate_score_simple)),
            handler: Arc::new(handler),
            analyzed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// URLs of the responses analyzed so far.
    pub fn analyzed(&self) -> Vec<String> {
        self.analyzed.lock().unwrap().clone()
    }
}

impl Module for MockAnalyzer {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(&self, response: Response) -> Analysis {
        let call = self.base.begin();
        let Some(http) = response.http_resp() else {
            let mut analysis = Analysis::default();
            analysis.push_error(CrawlerError::illegal_parameter("nil HTTP response"));
            return analysis;
        };
        call.accept();
        self.analyzed.lock().unwrap().push(http.url.to_string());
        let analysis = (self.handler)(&response);
        call.complete();
        analysis
    }
}

// ---------------------------------------------------------------------------
// MockPipeline
// ---------------------------------------------------------------------------

/// Records every item and optionally reports a fixed error for each.
pub struct MockPipeline {
    base: ModuleBase,
    error: Option<CrawlerError>,
    fail_fast: AtomicBool,
    items: Arc<Mutex<Vec<Item>>>,
}

impl MockPipeline {
    pub fn new(id: Mid) -> Self {
        Self {
            base: ModuleBase::new(id, Some(calculate_score_simple)),
            error: None,
            fail_fast: AtomicBool::new(false),
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_error(mut self, error: CrawlerError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn items(&self) -> Vec<Item> {
        self.items.lock().unwrap().clone()
    }
}

impl Module for MockPipeline {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn summary(&self) -> ModuleSummary {
        self.base.summary(Some(serde_json::json!({
            "fail_fast": self.fail_fast(),
        })))
    }
}

#[async_trait]
impl Pipeline for MockPipeline {
    async fn send(&self, item: Item) -> Vec<CrawlerError> {
        let call = self.base.begin();
        call.accept();
        self.items.lock().unwrap().push(item);
        match &self.error {
            Some(error) => vec![error.clone()],
            None => {
                call.complete();
                Vec::new()
            }
        }
    }

    fn fail_fast(&self) -> bool {
        self.fail_fast.load(Ordering::Relaxed)
    }

    fn set_fail_fast(&self, fail_fast: bool) {
        self.fail_fast.store(fail_fast, Ordering::Relaxed);
    }
}
