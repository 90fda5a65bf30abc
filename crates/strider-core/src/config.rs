use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CrawlerError;
use crate::traits::{Analyzer, Downloader, Pipeline};

/// Admission rules for new requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestPolicy {
    /// Primary domains requests may target. The seed's primary domain is
    /// added at start.
    pub accepted_domains: Vec<String>,
    /// Deepest request depth admitted; the seed has depth 0.
    pub max_depth: u32,
}

impl RequestPolicy {
    pub fn check(&self) -> Result<(), CrawlerError> {
        if self.accepted_domains.is_empty() {
            return Err(CrawlerError::illegal_parameter(
                "empty accepted primary domain list",
            ));
        }
        Ok(())
    }
}

/// Sizing of the four scheduler pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPolicy {
    pub req_buffer_cap: u32,
    pub req_max_buffer_number: u32,
    pub resp_buffer_cap: u32,
    pub resp_max_buffer_number: u32,
    pub item_buffer_cap: u32,
    pub item_max_buffer_number: u32,
    pub error_buffer_cap: u32,
    pub error_max_buffer_number: u32,
}

impl BufferPolicy {
    pub fn check(&self) -> Result<(), CrawlerError> {
        let fields = [
            (self.req_buffer_cap, "zero request buffer capacity"),
            (self.req_max_buffer_number, "zero request max buffer number"),
            (self.resp_buffer_cap, "zero response buffer capacity"),
            (self.resp_max_buffer_number, "zero response max buffer number"),
            (self.item_buffer_cap, "zero item buffer capacity"),
            (self.item_max_buffer_number, "zero item max buffer number"),
            (self.error_buffer_cap, "zero error buffer capacity"),
            (self.error_max_buffer_number, "zero error max buffer number"),
        ];
        match fields.iter().find(|(value, _)| *value == 0) {
            Some((_, message)) => Err(CrawlerError::illegal_parameter(message)),
            None => Ok(()),
        }
    }
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            req_buffer_cap: 50,
            req_max_buffer_number: 1000,
            resp_buffer_cap: 50,
            resp_max_buffer_number: 10,
            item_buffer_cap: 50,
            item_max_buffer_number: 100,
            error_buffer_cap: 50,
            error_max_buffer_number: 1,
        }
    }
}

/// The worker modules handed to [`crate::Scheduler::init`].
#[derive(Clone, Default)]
pub struct ModuleSet {
    pub downloaders: Vec<Arc<dyn Downloader>>,
    pub analyzers: Vec<Arc<dyn Analyzer>>,
    pub pipelines: Vec<Arc<dyn Pipeline>>,
}

impl ModuleSet {
    pub fn check(&self) -> Result<(), CrawlerError> {
        if self.downloaders.is_empty() {
            return Err(CrawlerError::illegal_parameter("empty downloader list"));
        }
        if self.analyzers.is_empty() {
            return Err(CrawlerError::illegal_parameter("empty analyzer list"));
        }
        if self.pipelines.is_empty() {
            return Err(CrawlerError::illegal_parameter("empty pipeline list"));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.downloaders.len() + self.analyzers.len() + self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ModuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSet")
            .field("downloaders", &self.downloaders.len())
            .field("analyzers", &self.analyzers.len())
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}

/// Settings for the default HTTP downloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub user_agent: Option<String>,
    pub timeout_secs: u64,
    /// Minimum delay between two requests to the same host; 0 disables it.
    pub politeness_delay_ms: u64,
    pub allow_private_urls: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: 30,
            politeness_delay_ms: 0,
            allow_private_urls: false,
        }
    }
}

/// Everything needed to set up one crawl, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub request: RequestPolicy,
    pub buffers: BufferPolicy,
    pub fetch: FetchSettings,
    pub downloaders: usize,
    pub analyzers: usize,
    pub pipelines: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            request: RequestPolicy::default(),
            buffers: BufferPolicy::default(),
            fetch: FetchSettings::default(),
            downloaders: 1,
            analyzers: 1,
            pipelines: 1,
        }
    }
}

impl CrawlConfig {
    pub fn from_json_str(json: &str) -> Result<Self, CrawlerError> {
        serde_json::from_str(json)
            .map_err(|e| CrawlerError::illegal_parameter(format!("invalid crawl config: {e}")))
    }

    pub fn from_path(path: &Path) -> Result<Self, CrawlerError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CrawlerError::illegal_parameter(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Validates everything except the accepted domains, which may still
    /// come from the seed or the command line.
    pub fn check(&self) -> Result<(), CrawlerError> {
        self.buffers.check()?;
        for (count, name) in [
            (self.downloaders, "downloader"),
            (self.analyzers, "analyzer"),
            (self.pipelines, "pipeline"),
        ] {
            if count == 0 {
                return Err(CrawlerError::illegal_parameter(format!(
                    "zero {name} count"
                )));
            }
        }
        Ok(())
    }
}
