use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::CrawlerError;
use crate::scheduler::Scheduler;
use crate::status::Status;
use crate::summary::SchedulerSummary;

/// Events emitted by the monitor for logging.
#[derive(Debug, Clone)]
pub enum MonitorEvent<'a> {
    Started {
        check_interval: Duration,
        max_idle_count: u32,
    },
    Checked {
        check: u64,
        idle: bool,
        consecutive_idle: u32,
    },
    Summary {
        summary: &'a SchedulerSummary,
    },
    IdleLimitReached {
        checks: u64,
    },
    Stopped {
        checks: u64,
    },
}

/// Receives monitor events (decoupled logging).
pub trait MonitorReporter: Send + Sync {
    fn report(&self, event: MonitorEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitorReporter;

impl MonitorReporter for TracingMonitorReporter {
    fn report(&self, event: MonitorEvent<'_>) {
        match event {
            MonitorEvent::Started {
                check_interval,
                max_idle_count,
            } => {
                tracing::info!(?check_interval, %max_idle_count, "Monitor started");
            }
            MonitorEvent::Checked {
                check,
                idle,
                consecutive_idle,
            } => {
                tracing::debug!(%check, %idle, %consecutive_idle, "Scheduler checked");
            }
            MonitorEvent::Summary { summary } => {
                tracing::info!(
                    status = %summary.status,
                    urls = summary.url_number,
                    dropped_sends = summary.dropped_sends,
                    "Scheduler summary"
                );
            }
            MonitorEvent::IdleLimitReached { checks } => {
                tracing::info!(%checks, "Scheduler idle, stopping");
            }
            MonitorEvent::Stopped { checks } => {
                tracing::info!(%checks, "Monitor stopped");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    /// Consecutive idle checks after which the crawl counts as finished.
    pub max_idle_count: u32,
    /// Report a summary every this many checks; 0 disables it.
    pub summary_every: u32,
    /// Stop the scheduler once the idle limit is reached.
    pub auto_stop: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(100),
            max_idle_count: 5,
            summary_every: 50,
            auto_stop: true,
        }
    }
}

impl MonitorConfig {
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_max_idle_count(mut self, count: u32) -> Self {
        self.max_idle_count = count;
        self
    }
}

/// Watches a running scheduler and ends the crawl once it stays idle.
pub struct Monitor {
    scheduler: Scheduler,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(scheduler: Scheduler, config: MonitorConfig) -> Self {
        Self { scheduler, config }
    }

    /// Polls until the idle limit is reached, the scheduler leaves the
    /// started state or `cancel_token` fires. Returns the number of checks.
    pub async fn run<R: MonitorReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> Result<u64, CrawlerError> {
        if self.config.max_idle_count == 0 {
            return Err(CrawlerError::illegal_parameter("zero max idle count"));
        }
        reporter.report(MonitorEvent::Started {
            check_interval: self.config.check_interval,
            max_idle_count: self.config.max_idle_count,
        });

        let mut checks = 0u64;
        let mut consecutive_idle = 0u32;
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.config.check_interval) => {}
                () = cancel_token.cancelled() => break,
            }
            if self.scheduler.status() != Status::Started {
                break;
            }

            checks += 1;
            let idle = self.scheduler.idle();
            consecutive_idle = if idle { consecutive_idle + 1 } else { 0 };
            reporter.report(MonitorEvent::Checked {
                check: checks,
                idle,
                consecutive_idle,
            });

            let every = u64::from(self.config.summary_every);
            if every > 0 && checks.is_multiple_of(every) {
                let summary = self.scheduler.summary();
                reporter.report(MonitorEvent::Summary { summary: &summary });
            }

            if consecutive_idle >= self.config.max_idle_count {
                reporter.report(MonitorEvent::IdleLimitReached { checks });
                if self.config.auto_stop {
                    self.scheduler.stop()?;
                }
                break;
            }
        }

        reporter.report(MonitorEvent::Stopped { checks });
        Ok(checks)
    }
}
