//! The contract every worker module shares, and the sealed set of
//! capabilities a module can be registered with.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::base::{ModuleBase, ScoreCalculator};
use crate::error::CrawlerError;
use crate::mid::Mid;
use crate::traits::{Analyzer, Downloader, Pipeline};

/// Kind of worker module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Downloader,
    Analyzer,
    Pipeline,
}

impl ModuleType {
    pub const ALL: [ModuleType; 3] = [
        ModuleType::Downloader,
        ModuleType::Analyzer,
        ModuleType::Pipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Downloader => "downloader",
            ModuleType::Analyzer => "analyzer",
            ModuleType::Pipeline => "pipeline",
        }
    }

    /// The letter used in MIDs.
    pub fn letter(&self) -> char {
        match self {
            ModuleType::Downloader => 'D',
            ModuleType::Analyzer => 'A',
            ModuleType::Pipeline => 'P',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'D' => Some(ModuleType::Downloader),
            'A' => Some(ModuleType::Analyzer),
            'P' => Some(ModuleType::Pipeline),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleType {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "downloader" => Ok(ModuleType::Downloader),
            "analyzer" => Ok(ModuleType::Analyzer),
            "pipeline" => Ok(ModuleType::Pipeline),
            _ => Err(CrawlerError::illegal_parameter(format!(
                "illegal module type: {s}"
            ))),
        }
    }
}

/// Snapshot of a module's call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub called: u64,
    pub accepted: u64,
    pub completed: u64,
    pub handling: u64,
}

/// Structured summary of one module, as exposed by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSummary {
    pub id: Mid,
    pub called: u64,
    pub accepted: u64,
    pub completed: u64,
    pub handling: u64,
    pub score: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Identity, score and counters shared by every module.
///
/// Implementors only provide [`Module::base`]; everything else defaults to
/// the embedded [`ModuleBase`]. Implementations must be safe to call from
/// several stage loops at once.
pub trait Module: Send + Sync {
    fn base(&self) -> &ModuleBase;

    fn id(&self) -> &Mid {
        self.base().id()
    }

    fn addr(&self) -> Option<SocketAddr> {
        self.base().addr()
    }

    fn score(&self) -> u64 {
        self.base().score()
    }

    fn set_score(&self, score: u64) {
        self.base().set_score(score);
    }

    fn score_calculator(&self) -> Option<ScoreCalculator> {
        self.base().score_calculator()
    }

    fn called_count(&self) -> u64 {
        self.base().counts().called
    }

    fn accepted_count(&self) -> u64 {
        self.base().counts().accepted
    }

    fn completed_count(&self) -> u64 {
        self.base().counts().completed
    }

    fn handling_number(&self) -> u64 {
        self.base().handling_number()
    }

    fn counts(&self) -> Counts {
        self.base().counts()
    }

    fn summary(&self) -> ModuleSummary {
        self.base().summary(None)
    }
}

/// A module tagged with the capability it is registered for.
#[derive(Clone)]
pub enum ModuleInstance {
    Downloader(Arc<dyn Downloader>),
    Analyzer(Arc<dyn Analyzer>),
    Pipeline(Arc<dyn Pipeline>),
}

impl ModuleInstance {
    /// The capability this instance provides.
    pub fn module_type(&self) -> ModuleType {
        match self {
            ModuleInstance::Downloader(_) => ModuleType::Downloader,
            ModuleInstance::Analyzer(_) => ModuleType::Analyzer,
            ModuleInstance::Pipeline(_) => ModuleType::Pipeline,
        }
    }

    pub fn module(&self) -> &dyn Module {
        match self {
            ModuleInstance::Downloader(d) => d.as_ref(),
            ModuleInstance::Analyzer(a) => a.as_ref(),
            ModuleInstance::Pipeline(p) => p.as_ref(),
        }
    }

    pub fn id(&self) -> &Mid {
        self.module().id()
    }

    pub fn into_downloader(self) -> Result<Arc<dyn Downloader>, CrawlerError> {
        match self {
            ModuleInstance::Downloader(d) => Ok(d),
            other => Err(other.mismatch(ModuleType::Downloader)),
        }
    }

    pub fn into_analyzer(self) -> Result<Arc<dyn Analyzer>, CrawlerError> {
        match self {
            ModuleInstance::Analyzer(a) => Ok(a),
            other => Err(other.mismatch(ModuleType::Analyzer)),
        }
    }

    pub fn into_pipeline(self) -> Result<Arc<dyn Pipeline>, CrawlerError> {
        match self {
            ModuleInstance::Pipeline(p) => Ok(p),
            other => Err(other.mismatch(ModuleType::Pipeline)),
        }
    }

    fn mismatch(&self, wanted: ModuleType) -> CrawlerError {
        CrawlerError::TypeMismatch(format!(
            "module {} is a {}, not a {wanted}",
            self.id(),
            self.module_type()
        ))
    }

    pub fn as_downloader(&self) -> Option<&Arc<dyn Downloader>> {
        match self {
            ModuleInstance::Downloader(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_analyzer(&self) -> Option<&Arc<dyn Analyzer>> {
        match self {
            ModuleInstance::Analyzer(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_pipeline(&self) -> Option<&Arc<dyn Pipeline>> {
        match self {
            ModuleInstance::Pipeline(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("type", &self.module_type())
            .field("id", self.id())
            .finish()
    }
}

impl From<Arc<dyn Downloader>> for ModuleInstance {
    fn from(downloader: Arc<dyn Downloader>) -> Self {
        ModuleInstance::Downloader(downloader)
    }
}

impl From<Arc<dyn Analyzer>> for ModuleInstance {
    fn from(analyzer: Arc<dyn Analyzer>) -> Self {
        ModuleInstance::Analyzer(analyzer)
    }
}

impl From<Arc<dyn Pipeline>> for ModuleInstance {
    fn from(pipeline: Arc<dyn Pipeline>) -> Self {
        ModuleInstance::Pipeline(pipeline)
    }
}
