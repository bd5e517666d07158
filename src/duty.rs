//! # Duty-Cycle Controller
//!
//! Decides how long to sleep between cycles and when to override the
//! scheduler with a forced full repaint. Two concerns, both about the
//! long game rather than any single cycle:
//!
//! - **Backoff.** Consecutive cycle failures double the sleep interval
//!   (after a grace of a few retries at the nominal rate), capped at a
//!   configured maximum. A dead server or router should not keep the
//!   radio hot every thirty seconds all night. One success snaps the
//!   interval back to nominal.
//! - **Ghosting ceiling.** Partial waveforms leave faint residue that
//!   accumulates over hours. Independent of the partial-count rule inside
//!   the template cache, a wall-clock ceiling guarantees a full repaint at
//!   least every N minutes of successful operation.
//!
//! Time is injected (`now` parameters) so the backoff and ceiling logic is
//! testable without sleeping.

use crate::config::RefreshConfig;
use crate::scheduler::{CycleError, CycleReport};
use crate::RefreshDecision;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Failures tolerated at the nominal rate before backoff kicks in.
const BACKOFF_THRESHOLD: u32 = 3;

pub struct DutyCycleController {
    nominal: Duration,
    max_sleep: Duration,
    current_sleep: Duration,
    full_ceiling: ChronoDuration,
    consecutive_failures: u32,
    last_full: DateTime<Utc>,
}

impl DutyCycleController {
    /// `now` is the construction instant; the ceiling is armed from it, so
    /// a restarted process with intact persisted state (no cold-start Full)
    /// still gets its backstop repaint within one ceiling period.
    pub fn new(config: &RefreshConfig, now: DateTime<Utc>) -> Self {
        Self {
            nominal: config.cycle_period(),
            max_sleep: config.max_sleep(),
            current_sleep: config.cycle_period(),
            full_ceiling: ChronoDuration::minutes(config.full_ceiling_minutes),
            consecutive_failures: 0,
            last_full: now,
        }
    }

    /// Whether the next cycle must be a full repaint because too much
    /// wall-clock time passed since the last one (or since boot, before
    /// any full repaint is observed).
    pub fn force_full(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_full) >= self.full_ceiling
    }

    /// Feed the controller the outcome of a cycle.
    pub fn record_outcome(&mut self, outcome: &Result<CycleReport, CycleError>, now: DateTime<Utc>) {
        match outcome {
            Ok(report) => {
                self.consecutive_failures = 0;
                self.current_sleep = self.nominal;
                if matches!(report.decision, RefreshDecision::Full) {
                    self.last_full = now;
                }
            }
            Err(_) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= BACKOFF_THRESHOLD {
                    self.current_sleep =
                        self.current_sleep.saturating_mul(2).min(self.max_sleep);
                }
            }
        }
    }

    /// How long to sleep before the next cycle.
    pub fn next_sleep(&self) -> Duration {
        self.current_sleep
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
