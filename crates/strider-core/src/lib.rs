pub mod base;
pub mod buffer;
pub mod config;
pub mod domain;
pub mod error;
pub mod mid;
pub mod models;
pub mod module;
pub mod monitor;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod sn;
pub mod status;
pub mod summary;
mod sync;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod traits;

pub use base::{HandlingGuard, ModuleBase, ScoreCalculator, calculate_score_simple};
pub use config::{BufferPolicy, CrawlConfig, FetchSettings, ModuleSet, RequestPolicy};
pub use domain::{DefaultDomainResolver, DomainResolver};
pub use error::{CrawlerError, ErrorKind};
pub use mid::{Mid, MidParts, legal_mid};
pub use models::{Data, HttpRequest, HttpResponse, Item, Request, Response};
pub use module::{Counts, Module, ModuleInstance, ModuleSummary, ModuleType};
pub use monitor::{Monitor, MonitorConfig, MonitorEvent, MonitorReporter, TracingMonitorReporter};
pub use pool::{BufferPool, PoolStats};
pub use registry::{LeastLoaded, ModuleRegistry, SelectionStrategy};
pub use scheduler::Scheduler;
pub use sn::SnGenerator;
pub use status::Status;
pub use summary::{ModuleCounts, SchedulerSummary};
pub use traits::{Analysis, Analyzer, DownloadOutcome, Downloader, Pipeline};
