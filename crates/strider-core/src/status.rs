use std::fmt;

use serde::Serialize;

use crate::error::CrawlerError;

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Uninitialized,
        Status::Initializing,
        Status::Initialized,
        Status::Starting,
        Status::Started,
        Status::Stopping,
        Status::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Uninitialized => "uninitialized",
            Status::Initializing => "initializing",
            Status::Initialized => "initialized",
            Status::Starting => "starting",
            Status::Started => "started",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
        }
    }

    /// True for the three states an operation is in progress.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Status::Initializing | Status::Starting | Status::Stopping
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks whether the scheduler may move from `current` to `wanted`.
///
/// Only the transitional states can be requested; the settled states are
/// reached by committing the operation that requested them.
pub fn check_status(current: Status, wanted: Status) -> Result<(), CrawlerError> {
    if current.is_transitional() {
        return Err(CrawlerError::scheduler(format!(
            "the scheduler is being {}",
            match current {
                Status::Initializing => "initialized",
                Status::Starting => "started",
                _ => "stopped",
            }
        )));
    }
    match (current, wanted) {
        (Status::Uninitialized, Status::Starting | Status::Stopping) => {
            Err(CrawlerError::scheduler("the scheduler has not yet been initialized"))
        }
        (Status::Started, Status::Initializing | Status::Starting) => {
            Err(CrawlerError::scheduler("the scheduler has been started"))
        }
        (_, Status::Stopping) if current != Status::Started => {
            Err(CrawlerError::scheduler("the scheduler has not been started"))
        }
        (_, Status::Initializing | Status::Starting | Status::Stopping) => Ok(()),
        (_, wanted) => Err(CrawlerError::scheduler(format!(
            "unsupported wanted status for check: {wanted}"
        ))),
    }
}
