//! # Refresh Scheduler
//!
//! The once-per-cycle decision and drawing pipeline. Each wake-up runs one
//! cycle: fetch a snapshot, make sure the template cache is usable, diff
//! against the committed region state, then do the *cheapest* panel work
//! that makes the glass match the data:
//!
//! - **Full** — template blit plus every region redrawn, full waveform.
//!   Chosen when the template was just (re)decoded (and stays owed until a
//!   Full actually commits), when no region state is committed yet (first
//!   cycle, or the persisted state was lost), when the partial budget is
//!   spent regardless of whether the template re-fetch succeeded, or when
//!   the duty-cycle controller forces it to clear accumulated ghosting.
//!   The repaint draws every committed region, not just the ones the
//!   current snapshot happens to carry; absent regions persist.
//! - **Partial** — only changed regions redrawn, partial waveform.
//! - **Skip** — nothing changed. The panel is bistable, so the cheapest
//!   refresh is no refresh; the cycle ends before any driver call.
//!
//! ## Commit ordering
//!
//! Region state and the cycle counter are committed *only after* the
//! driver's blocking refresh returns cleanly. A refresh that fails leaves
//! the tracker untouched, so the next cycle re-diffs against what is
//! actually on the glass and repeats the same work. That makes a cycle
//! idempotent under retry, which is what keeps a flaky SPI bus or a brown-
//! out from desynchronizing the display.

use crate::config::Config;
use crate::diff::FieldDiffTracker;
use crate::panel::{Color, DriverError, PanelDriver, RefreshMode};
use crate::source::{DataSource, FetchError};
use crate::store::{PersistentStore, KEY_CYCLE_COUNTER};
use crate::template::{Freshness, MemoryProbe, TemplateCache};
use crate::{DataSnapshot, RefreshDecision, RegionId, RegionValue};
use std::collections::BTreeMap;
use thiserror::Error;

/// A cycle that could not complete. Both variants are transient; the
/// caller backs off and retries rather than exiting.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("panel driver failed: {0}")]
    Driver(#[from] DriverError),
}

/// What one completed cycle did, for logging and duty-cycle accounting.
#[derive(Debug)]
pub struct CycleReport {
    pub decision: RefreshDecision,
    /// True when the template cache decoded a new bitmap this cycle
    pub template_fresh: bool,
}

/// Everything the scheduler carries between cycles.
pub struct EngineState {
    template: TemplateCache,
    tracker: FieldDiffTracker,
    /// Partial refreshes since the last full repaint
    cycle_counter: u32,
    /// Partial budget: at this count the next repaint is Full even when the
    /// template re-fetch keeps failing
    full_refresh_period: u32,
    /// A decoded template is waiting for its Full flush. Set when the cache
    /// reports Fresh, cleared only by a Full commit, so a failed refresh
    /// cannot strand a new background in the cache.
    full_pending: bool,
    width: u32,
    height: u32,
}

impl EngineState {
    /// Build the engine from configuration, restoring whatever survived in
    /// the store. Missing or corrupt persisted state degrades to a cold
    /// start, which just means the first cycle is a Full repaint.
    pub fn new(config: &Config, store: &dyn PersistentStore) -> Self {
        let cycle_counter = store
            .get(KEY_CYCLE_COUNTER)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);
        Self {
            template: TemplateCache::new(
                config.display.width,
                config.display.height,
                config.display.depth(),
                config.refresh.full_refresh_period,
                config.refresh.min_free_kib * 1024,
            ),
            tracker: FieldDiffTracker::load(store),
            cycle_counter,
            full_refresh_period: config.refresh.full_refresh_period,
            full_pending: false,
            width: config.display.width,
            height: config.display.height,
        }
    }

    pub fn cycle_counter(&self) -> u32 {
        self.cycle_counter
    }

    pub fn tracker(&self) -> &FieldDiffTracker {
        &self.tracker
    }

    /// Run one synchronization cycle.
    ///
    /// `force_full` is the duty-cycle controller's ghosting override; it
    /// upgrades the decision but never bypasses the fetch or the commit
    /// ordering.
    pub fn run_cycle(
        &mut self,
        source: &mut dyn DataSource,
        panel: &mut dyn PanelDriver,
        store: &mut dyn PersistentStore,
        probe: &dyn MemoryProbe,
        force_full: bool,
    ) -> Result<CycleReport, CycleError> {
        let snapshot = source.fetch_snapshot()?;

        // Inline template bytes (the server can push one with the snapshot)
        // take precedence over a second round-trip.
        let inline = snapshot.template.clone();
        let template_fresh = match self.template.ensure_fresh(
            self.cycle_counter,
            || match inline {
                Some(bytes) => Ok(bytes),
                None => source.fetch_template(),
            },
            probe,
        ) {
            Ok(Freshness::Fresh) => true,
            Ok(Freshness::Cached) => false,
            // A cache failure is not a cycle failure: with a retained stale
            // buffer (or none at all) partial updates still work.
            Err(e) => {
                eprintln!("template cache: {}", e);
                false
            }
        };
        if template_fresh {
            self.full_pending = true;
        }

        let changed = self.tracker.diff(&snapshot);

        let decision = if self.full_pending
            || self.tracker.is_unset()
            || force_full
            || self.cycle_counter >= self.full_refresh_period
        {
            RefreshDecision::Full
        } else if changed.is_empty() {
            RefreshDecision::Skip
        } else {
            RefreshDecision::Partial(changed)
        };

        match &decision {
            RefreshDecision::Skip => {
                // No driver call at all; the glass already matches.
            }
            RefreshDecision::Full => {
                match self.template.buffer() {
                    Some(buffer) => panel.blit(buffer.pixels())?,
                    None => panel.fill_rect(0, 0, self.width, self.height, Color::White)?,
                }
                self.draw_regions(&snapshot, panel)?;
                panel.refresh(RefreshMode::Full, true)?;
                self.full_pending = false;
                self.commit(&snapshot, 0, store);
            }
            RefreshDecision::Partial(regions) => {
                for region in regions {
                    let geometry = snapshot.geometry_for(region);
                    if geometry.clear {
                        panel.fill_rect(
                            geometry.x,
                            geometry.y,
                            geometry.w,
                            geometry.h,
                            Color::White,
                        )?;
                    }
                    if let Some(value) = snapshot.values.get(region) {
                        panel.draw_text(geometry.x, geometry.y, &value.display_text())?;
                    }
                }
                panel.refresh(RefreshMode::Partial, true)?;
                let next = self.cycle_counter.saturating_add(1);
                self.commit(&snapshot, next, store);
            }
        }

        eprintln!(
            "cycle {}: {} (template {})",
            self.cycle_counter,
            decision,
            if template_fresh { "fresh" } else { "cached" }
        );

        Ok(CycleReport {
            decision,
            template_fresh,
        })
    }

    /// Draw the union of the committed state and the current snapshot, with
    /// snapshot values winning. A region absent from the snapshot is
    /// untouched data, not erased data; the repaint must put its last
    /// rendered value back on the glass or `commit` would record something
    /// the glass no longer shows. Used on the Full path, where the blit (or
    /// the white fill) already gave us a clean background, so per-region
    /// clearing would be wasted work.
    fn draw_regions(
        &self,
        snapshot: &DataSnapshot,
        panel: &mut dyn PanelDriver,
    ) -> Result<(), DriverError> {
        let mut view: BTreeMap<&RegionId, &RegionValue> = self.tracker.iter().collect();
        for (region, value) in &snapshot.values {
            view.insert(region, value);
        }
        for (region, value) in view {
            let geometry = snapshot.geometry_for(region);
            panel.draw_text(geometry.x, geometry.y, &value.display_text())?;
        }
        Ok(())
    }

    /// Runs only after the blocking refresh returned cleanly. Store writes
    /// are best effort; the glass is already correct, and a lost counter
    /// only costs one extra full repaint after the next reboot.
    fn commit(&mut self, snapshot: &DataSnapshot, counter: u32, store: &mut dyn PersistentStore) {
        self.tracker.commit(snapshot);
        self.cycle_counter = counter;
        if let Err(e) = store.put(KEY_CYCLE_COUNTER, &counter.to_string()) {
            eprintln!("Warning: could not persist cycle counter: {}", e);
        }
        self.tracker.persist(store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn cycle_counter_restores_from_store() {
        let mut store = MemoryStore::new();
        store.put(KEY_CYCLE_COUNTER, "3").unwrap();
        let state = EngineState::new(&Config::default(), &store);
        assert_eq!(state.cycle_counter(), 3);
    }

    #[test]
    fn garbage_cycle_counter_degrades_to_zero() {
        let mut store = MemoryStore::new();
        store.put(KEY_CYCLE_COUNTER, "not a number").unwrap();
        let state = EngineState::new(&Config::default(), &store);
        assert_eq!(state.cycle_counter(), 0);
    }

    #[test]
    fn cold_store_means_unset_tracker() {
        let store = MemoryStore::new();
        let state = EngineState::new(&Config::default(), &store);
        assert_eq!(state.cycle_counter(), 0);
        assert!(state.tracker().is_unset());
    }
}
