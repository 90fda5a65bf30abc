use async_trait::async_trait;

use crate::error::CrawlerError;
use crate::models::{Data, Item, Request, Response};
use crate::module::Module;

/// What a [`Downloader`] produced for one request.
///
/// Both fields may be set: a response that came back with an error status
/// is still forwarded while the error is reported.
#[derive(Debug, Default)]
pub struct DownloadOutcome {
    pub response: Option<Response>,
    pub error: Option<CrawlerError>,
}

impl DownloadOutcome {
    pub fn ok(response: Response) -> Self {
        Self {
            response: Some(response),
            error: None,
        }
    }

    pub fn failed(error: CrawlerError) -> Self {
        Self {
            response: None,
            error: Some(error),
        }
    }

    pub fn partial(response: Response, error: CrawlerError) -> Self {
        Self {
            response: Some(response),
            error: Some(error),
        }
    }
}

/// What an [`Analyzer`] produced for one response.
#[derive(Debug, Default)]
pub struct Analysis {
    pub data: Vec<Data>,
    pub errors: Vec<CrawlerError>,
}

impl Analysis {
    pub fn push(&mut self, data: impl Into<Data>) {
        self.data.push(data.into());
    }

    pub fn push_error(&mut self, error: CrawlerError) {
        self.errors.push(error);
    }
}

/// Turns a request into a response.
#[async_trait]
pub trait Downloader: Module {
    async fn download(&self, request: Request) -> DownloadOutcome;
}

/// Extracts new requests and items from a response.
#[async_trait]
pub trait Analyzer: Module {
    async fn analyze(&self, response: Response) -> Analysis;
}

/// Consumes items.
#[async_trait]
pub trait Pipeline: Module {
    /// Runs the item through every processing step, returning all step errors.
    async fn send(&self, item: Item) -> Vec<CrawlerError>;

    /// When set, processing of an item stops at its first step error.
    fn fail_fast(&self) -> bool;

    fn set_fail_fast(&self, fail_fast: bool);
}
