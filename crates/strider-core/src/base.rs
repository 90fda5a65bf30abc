//! Reusable identity, score and counter block for module implementations.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::mid::Mid;
use crate::module::{Counts, ModuleSummary};

/// Computes a module's score from its counters.
pub type ScoreCalculator = fn(&Counts) -> u64;

/// Default score: `called + 2*accepted + 4*completed + 16*handling`.
pub fn calculate_score_simple(counts: &Counts) -> u64 {
    counts
        .called
        .saturating_add(counts.accepted.saturating_mul(2))
        .saturating_add(counts.completed.saturating_mul(4))
        .saturating_add(counts.handling.saturating_mul(16))
}

/// State every module embeds and exposes through [`crate::Module::base`].
#[derive(Debug)]
pub struct ModuleBase {
    id: Mid,
    score: AtomicU64,
    score_calculator: Option<ScoreCalculator>,
    called: AtomicU64,
    accepted: AtomicU64,
    completed: AtomicU64,
    handling: AtomicU64,
}

impl ModuleBase {
    pub fn new(id: Mid, score_calculator: Option<ScoreCalculator>) -> Self {
        Self {
            id,
            score: AtomicU64::new(0),
            score_calculator,
            called: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            handling: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &Mid {
        &self.id
    }

    /// Network address carried by the MID, if any.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.id.addr()
    }

    pub fn score(&self) -> u64 {
        self.score.load(Ordering::Relaxed)
    }

    pub fn set_score(&self, score: u64) {
        self.score.store(score, Ordering::Relaxed);
    }

    pub fn score_calculator(&self) -> Option<ScoreCalculator> {
        self.score_calculator
    }

    pub fn handling_number(&self) -> u64 {
        self.handling.load(Ordering::Acquire)
    }

    pub fn counts(&self) -> Counts {
        Counts {
            called: self.called.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            handling: self.handling.load(Ordering::Acquire),
        }
    }

    /// Marks the start of one call: `called` and `handling` go up by one
    /// until the returned guard is dropped.
    pub fn begin(&self) -> HandlingGuard<'_> {
        self.called.fetch_add(1, Ordering::Relaxed);
        self.handling.fetch_add(1, Ordering::AcqRel);
        HandlingGuard { base: self }
    }

    /// Resets every counter to zero.
    pub fn clear(&self) {
        self.called.store(0, Ordering::Relaxed);
        self.accepted.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.handling.store(0, Ordering::Release);
    }

    /// Recomputes the score if a calculator is configured.
    pub fn refresh_score(&self) {
        if let Some(calculate) = self.score_calculator {
            self.set_score(calculate(&self.counts()));
        }
    }

    pub fn summary(&self, extra: Option<serde_json::Value>) -> ModuleSummary {
        let counts = self.counts();
        ModuleSummary {
            id: self.id.clone(),
            called: counts.called,
            accepted: counts.accepted,
            completed: counts.completed,
            handling: counts.handling,
            score: self.score(),
            extra,
        }
    }

    fn end_handling(&self) {
        // saturate: clear() may have run while a call was in flight
        let _ = self
            .handling
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.refresh_score();
    }
}

/// One in-flight call. Dropping it decrements the handling number and
/// refreshes the score.
#[must_use = "the call ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct HandlingGuard<'a> {
    base: &'a ModuleBase,
}

impl HandlingGuard<'_> {
    /// The input passed validation.
    pub fn accept(&self) {
        self.base.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// The call produced its result.
    pub fn complete(&self) {
        self.base.completed.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for HandlingGuard<'_> {
    fn drop(&mut self) {
        self.base.end_handling();
    }
}
