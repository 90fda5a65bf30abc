use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::mid::Mid;
use crate::module::ModuleType;

/// Subsystem an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Downloader,
    Analyzer,
    Pipeline,
    Scheduler,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Downloader => "downloader error",
            ErrorKind::Analyzer => "analyzer error",
            ErrorKind::Pipeline => "pipeline error",
            ErrorKind::Scheduler => "scheduler error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ModuleType> for ErrorKind {
    fn from(module_type: ModuleType) -> Self {
        match module_type {
            ModuleType::Downloader => ErrorKind::Downloader,
            ModuleType::Analyzer => ErrorKind::Analyzer,
            ModuleType::Pipeline => ErrorKind::Pipeline,
        }
    }
}

/// Crawler-wide error type.
///
/// Values travel through the error buffer pool, hence `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrawlerError {
    /// Failure raised inside one of the crawler subsystems.
    #[error("crawler error: {kind}: {message}")]
    Domain { kind: ErrorKind, message: String },

    /// Invalid configuration or malformed identifier.
    #[error("illegal parameter: {0}")]
    IllegalParameter(String),

    /// A single member buffer has been closed.
    #[error("closed buffer")]
    ClosedBuffer,

    /// The whole buffer pool has been closed.
    #[error("closed buffer pool")]
    ClosedBufferPool,

    /// No registered module of the requested type.
    #[error("not found module instance (type: {0})")]
    ModuleNotFound(ModuleType),

    /// A module's declared type does not match its capability.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

impl CrawlerError {
    pub fn downloader(message: impl Into<String>) -> Self {
        Self::domain(ErrorKind::Downloader, message)
    }

    pub fn analyzer(message: impl Into<String>) -> Self {
        Self::domain(ErrorKind::Analyzer, message)
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::domain(ErrorKind::Pipeline, message)
    }

    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::domain(ErrorKind::Scheduler, message)
    }

    pub fn illegal_parameter(message: impl AsRef<str>) -> Self {
        Self::IllegalParameter(message.as_ref().trim().to_string())
    }

    fn domain(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Domain {
            kind,
            message: message.into(),
        }
    }

    /// The subsystem tag, if this is a domain error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CrawlerError::Domain { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true for closed-buffer and closed-pool errors.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            CrawlerError::ClosedBuffer | CrawlerError::ClosedBufferPool
        )
    }

    /// Normalises any error into a tagged domain error.
    ///
    /// Domain errors are kept as-is. Everything else is tagged with the
    /// subsystem encoded in `mid`, or the scheduler when there is none.
    pub fn tag_with(self, mid: Option<&Mid>) -> Self {
        if self.kind().is_some() {
            return self;
        }
        let kind = mid
            .map(|mid| ErrorKind::from(mid.module_type()))
            .unwrap_or(ErrorKind::Scheduler);
        Self::domain(kind, self.to_string())
    }
}
