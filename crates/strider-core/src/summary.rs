use std::fmt;

use serde::Serialize;

use crate::config::{BufferPolicy, RequestPolicy};
use crate::module::ModuleSummary;
use crate::pool::PoolStats;

/// Number of modules handed to `init`, per type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModuleCounts {
    pub downloaders: usize,
    pub analyzers: usize,
    pub pipelines: usize,
}

/// Snapshot of a scheduler: configuration, lifecycle state, modules and pools.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerSummary {
    pub request_policy: Option<RequestPolicy>,
    pub buffer_policy: Option<BufferPolicy>,
    pub module_counts: ModuleCounts,
    pub status: String,
    pub downloaders: Vec<ModuleSummary>,
    pub analyzers: Vec<ModuleSummary>,
    pub pipelines: Vec<ModuleSummary>,
    pub request_pool: Option<PoolStats>,
    pub response_pool: Option<PoolStats>,
    pub item_pool: Option<PoolStats>,
    pub error_pool: Option<PoolStats>,
    /// URLs admitted since the last `init`.
    pub url_number: usize,
    /// Detached sends that never reached their pool.
    pub dropped_sends: u64,
}

impl fmt::Display for SchedulerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string_pretty(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
