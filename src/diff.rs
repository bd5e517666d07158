//! # Field Diff Tracker
//!
//! Holds the last *successfully rendered* value of every named region and
//! reports which regions a new snapshot would change. This is the half of
//! the engine that makes Skip and Partial decisions possible.
//!
//! ## Rules
//!
//! - Comparison is exact equality (string compare for text, integer compare
//!   for minutes). No normalization, no fuzz.
//! - A region absent from the snapshot is untouched: not reported, not
//!   erased.
//! - A region the firmware does not recognize ([`RegionId::Other`]) is
//!   reported changed on every cycle it appears. Unknown fields must never
//!   be invisible just because this revision predates them.
//! - [`FieldDiffTracker::commit`] runs only after the panel refresh
//!   succeeded. A failed draw leaves state untouched, so the same regions
//!   diff as changed again next cycle and the draw is retried. This is the
//!   engine's idempotence guarantee.
//!
//! State lives for the process lifetime and round-trips through the
//! persistent store, so a warm reboot resumes diffing against what is
//! physically on the glass.

use crate::store::{PersistentStore, KEY_REGION_STATE};
use crate::{DataSnapshot, RegionId, RegionValue};
use std::collections::{BTreeMap, BTreeSet};

/// Last committed value per region. The only writer is `commit`.
#[derive(Debug, Default)]
pub struct FieldDiffTracker {
    state: BTreeMap<RegionId, RegionValue>,
}

impl FieldDiffTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True until the first successful commit ever (or when persisted state
    /// was lost). Drives the mandatory Full repaint on first cycle.
    pub fn is_unset(&self) -> bool {
        self.state.is_empty()
    }

    /// Last committed value for one region, if any.
    pub fn committed(&self, region: &RegionId) -> Option<&RegionValue> {
        self.state.get(region)
    }

    /// All committed (region, value) pairs, in region order. The full
    /// repaint path draws from this so regions absent from the current
    /// snapshot survive on the glass.
    pub fn iter(&self) -> impl Iterator<Item = (&RegionId, &RegionValue)> {
        self.state.iter()
    }

    /// Regions whose snapshot value differs from the committed state.
    pub fn diff(&self, snapshot: &DataSnapshot) -> BTreeSet<RegionId> {
        let mut changed = BTreeSet::new();
        for (region, value) in &snapshot.values {
            let differs = region.is_unrecognized() || self.state.get(region) != Some(value);
            if differs {
                changed.insert(region.clone());
            }
        }
        changed
    }

    /// Record every value present in the snapshot as rendered. Only called
    /// after the panel driver reported a successful refresh.
    pub fn commit(&mut self, snapshot: &DataSnapshot) {
        for (region, value) in &snapshot.values {
            self.state.insert(region.clone(), value.clone());
        }
    }

    /// Rebuild from the persistent store; an absent or corrupt entry is the
    /// valid "unset" boot state, not an error.
    pub fn load(store: &dyn PersistentStore) -> Self {
        let state = store
            .get(KEY_REGION_STATE)
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default();
        Self { state }
    }

    /// Best-effort write-back; a failed put costs one redundant repaint
    /// after the next cold boot, nothing more.
    pub fn persist(&self, store: &mut dyn PersistentStore) {
        if let Ok(json) = serde_json::to_string(&self.state) {
            let _ = store.put(KEY_REGION_STATE, &json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn text(s: &str) -> RegionValue {
        RegionValue::Text(s.to_string())
    }

    fn departure(minutes: u16) -> RegionValue {
        RegionValue::Departure {
            minutes,
            destination: "City".into(),
        }
    }

    fn snapshot(pairs: &[(RegionId, RegionValue)]) -> DataSnapshot {
        let mut snap = DataSnapshot::new();
        for (id, value) in pairs {
            snap.values.insert(id.clone(), value.clone());
        }
        snap
    }

    #[test]
    fn everything_is_changed_before_first_commit() {
        let tracker = FieldDiffTracker::new();
        assert!(tracker.is_unset());

        let snap = snapshot(&[
            (RegionId::Time, text("10:00")),
            (RegionId::Train(1), departure(5)),
        ]);
        let changed = tracker.diff(&snap);
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn unchanged_values_diff_clean_after_commit() {
        let mut tracker = FieldDiffTracker::new();
        let snap = snapshot(&[
            (RegionId::Time, text("10:00")),
            (RegionId::Train(1), departure(5)),
        ]);
        tracker.commit(&snap);
        assert!(!tracker.is_unset());

        assert!(tracker.diff(&snap).is_empty());
    }

    #[test]
    fn only_the_changed_region_is_reported() {
        let mut tracker = FieldDiffTracker::new();
        tracker.commit(&snapshot(&[
            (RegionId::Time, text("10:00")),
            (RegionId::Train(1), departure(5)),
        ]));

        let next = snapshot(&[
            (RegionId::Time, text("10:01")),
            (RegionId::Train(1), departure(5)),
        ]);
        let changed = tracker.diff(&next);
        assert_eq!(changed.len(), 1);
        assert!(changed.contains(&RegionId::Time));
    }

    #[test]
    fn absent_regions_are_untouched() {
        let mut tracker = FieldDiffTracker::new();
        tracker.commit(&snapshot(&[
            (RegionId::Time, text("10:00")),
            (RegionId::Alert, text("Good service on all lines")),
        ]));

        // Snapshot without the alert region: no change reported, no erasure
        let next = snapshot(&[(RegionId::Time, text("10:00"))]);
        assert!(tracker.diff(&next).is_empty());
        assert_eq!(
            tracker.committed(&RegionId::Alert),
            Some(&text("Good service on all lines"))
        );
    }

    #[test]
    fn unrecognized_regions_are_always_changed() {
        let mut tracker = FieldDiffTracker::new();
        let unknown = RegionId::Other("pollen".into());
        let snap = snapshot(&[(unknown.clone(), text("high"))]);

        tracker.commit(&snap);
        // Same value again: a known region would diff clean, this must not
        let changed = tracker.diff(&snap);
        assert!(changed.contains(&unknown));
    }

    #[test]
    fn known_region_appearing_later_changes_exactly_once() {
        let mut tracker = FieldDiffTracker::new();
        tracker.commit(&snapshot(&[(RegionId::Time, text("10:00"))]));

        let with_weather = snapshot(&[
            (RegionId::Time, text("10:00")),
            (RegionId::Weather, text("22C Clear")),
        ]);
        let changed = tracker.diff(&with_weather);
        assert_eq!(changed.len(), 1);
        assert!(changed.contains(&RegionId::Weather));

        tracker.commit(&with_weather);
        assert!(tracker.diff(&with_weather).is_empty());
    }

    #[test]
    fn state_round_trips_through_store() {
        let mut store = MemoryStore::new();
        let mut tracker = FieldDiffTracker::new();
        tracker.commit(&snapshot(&[
            (RegionId::Time, text("10:00")),
            (RegionId::Train(2), departure(12)),
        ]));
        tracker.persist(&mut store);

        let reloaded = FieldDiffTracker::load(&store);
        assert!(!reloaded.is_unset());
        assert_eq!(reloaded.committed(&RegionId::Time), Some(&text("10:00")));
        assert_eq!(
            reloaded.committed(&RegionId::Train(2)),
            Some(&departure(12))
        );
    }

    #[test]
    fn empty_store_loads_as_unset() {
        let store = MemoryStore::new();
        let tracker = FieldDiffTracker::load(&store);
        assert!(tracker.is_unset());
    }
}
