//! # Transit Display Core Library
//!
//! This library is the display-synchronization engine for a battery-powered,
//! network-connected transit status display. A microcontroller-class device
//! periodically pulls a data snapshot from a companion server and renders it
//! to a bistable e-paper panel, which holds its image with zero power draw
//! between updates.
//!
//! ## Design Philosophy
//!
//! ### Redraw as little as possible
//! E-paper refreshes are slow, visible, and wear the panel. The engine keeps
//! the last-rendered value of every named screen region and, each cycle,
//! decides between three outcomes:
//! - **Full**: repaint the whole panel (clears residual charge / ghosting)
//! - **Partial**: repaint only the regions whose values actually changed
//! - **Skip**: nothing changed, touch nothing
//!
//! ### Survive everything
//! Network fetches, template decodes, and panel refreshes all fail in the
//! field. Every failure path aborts the current cycle and retains all prior
//! state, so the next cycle recomputes from the same last-known-good
//! baseline. Nothing is fatal; the only escalation is a longer sleep.
//!
//! ### Memory discipline
//! One full-screen bitmap template (a few hundred KB at most) is the largest
//! allocation the engine ever makes. It is owned by a single-slot cache,
//! reused across cycles, and only reallocated when the decoded dimensions
//! change. Free memory is checked before the decode buffer is allocated.
//!
//! ## Data Flow Per Cycle
//!
//! 1. The duty-cycle controller wakes and invokes the refresh scheduler
//! 2. The scheduler fetches a [`DataSnapshot`] from the data source
//! 3. Template cache staleness and the field diff decide Full/Partial/Skip
//! 4. Draw commands go to the panel driver; refresh mode matches the decision
//! 5. Only after the panel reports success is new state committed
//! 6. The controller re-arms sleep (with backoff after repeated failures)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// Module declarations
pub mod config;
pub mod diff;
pub mod duty;
pub mod panel;
pub mod raster;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod template;

/// A named logical field of the display.
///
/// The set is fixed by the screen layout: the clock, up to a handful of
/// train and tram departure lines, and the weather / coffee / alert /
/// location boxes. Anything else the server sends maps to [`RegionId::Other`]
/// so new fields stay visible instead of being silently dropped.
///
/// Region ids round-trip through their wire names:
///
/// ```
/// use transit_display_lib::RegionId;
///
/// assert_eq!(RegionId::from("train1"), RegionId::Train(1));
/// assert_eq!(RegionId::Train(1).to_string(), "train1");
/// assert_eq!(RegionId::from("pollen"), RegionId::Other("pollen".into()));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegionId {
    /// The clock in the header
    Time,
    /// A train departure line, 1-based from the top
    Train(u8),
    /// A tram departure line, 1-based from the top
    Tram(u8),
    /// Current weather summary
    Weather,
    /// The coffee-decision box ("time to grab one before the train?")
    Coffee,
    /// Service alert banner
    Alert,
    /// Stop / station name
    Location,
    /// Any region name this firmware revision does not know about
    Other(String),
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionId::Time => write!(f, "time"),
            RegionId::Train(n) => write!(f, "train{}", n),
            RegionId::Tram(n) => write!(f, "tram{}", n),
            RegionId::Weather => write!(f, "weather"),
            RegionId::Coffee => write!(f, "coffee"),
            RegionId::Alert => write!(f, "alert"),
            RegionId::Location => write!(f, "location"),
            RegionId::Other(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for RegionId {
    fn from(name: &str) -> Self {
        if let Some(n) = name.strip_prefix("train").and_then(|r| r.parse().ok()) {
            return RegionId::Train(n);
        }
        if let Some(n) = name.strip_prefix("tram").and_then(|r| r.parse().ok()) {
            return RegionId::Tram(n);
        }
        match name {
            "time" => RegionId::Time,
            "weather" => RegionId::Weather,
            "coffee" => RegionId::Coffee,
            "alert" => RegionId::Alert,
            "location" => RegionId::Location,
            other => RegionId::Other(other.to_string()),
        }
    }
}

impl Serialize for RegionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RegionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(RegionId::from(name.as_str()))
    }
}

impl RegionId {
    /// True for ids outside the fixed enumerated set. The diff tracker
    /// reports these as changed on every cycle they appear (conservative
    /// default: an unknown field must never be invisible).
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, RegionId::Other(_))
    }

    /// Built-in layout rectangle for this region on the 800x480 panel.
    ///
    /// The server may override any of these per snapshot; these defaults
    /// mirror the original screen layout (header clock, departures column
    /// on the left, journey box on the right, alert bar along the bottom).
    pub fn default_geometry(&self) -> RegionGeometry {
        match self {
            RegionId::Time => RegionGeometry::new(20, 10, 135, 48),
            RegionId::Train(n) => {
                let row = n.saturating_sub(1) as u32;
                RegionGeometry::new(30, 100 + row * 36, 350, 32)
            }
            RegionId::Tram(n) => {
                let row = n.saturating_sub(1) as u32;
                RegionGeometry::new(30, 250 + row * 36, 350, 32)
            }
            RegionId::Weather => RegionGeometry::new(600, 10, 180, 48),
            RegionId::Coffee => RegionGeometry::new(500, 110, 280, 140),
            RegionId::Alert => RegionGeometry::new(10, 420, 780, 40),
            RegionId::Location => RegionGeometry::new(200, 10, 240, 48),
            RegionId::Other(_) => RegionGeometry::new(10, 380, 780, 36),
        }
    }
}

/// The value rendered into one region: short free text, or a structured
/// departure (minutes until departure plus destination).
///
/// Equality is exact (string compare for text, integer compare for minutes);
/// the diff tracker relies on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionValue {
    /// Short display text ("10:42", "22C Clear", "Good service on all lines")
    Text(String),
    /// A departure line
    Departure {
        /// Minutes until departure
        minutes: u16,
        /// Destination name, possibly empty
        destination: String,
    },
}

impl RegionValue {
    /// The text actually drawn on the panel for this value.
    pub fn display_text(&self) -> String {
        match self {
            RegionValue::Text(text) => text.clone(),
            RegionValue::Departure {
                minutes,
                destination,
            } => {
                if destination.is_empty() {
                    format!("{} min", minutes)
                } else {
                    format!("{} min  {}", minutes, destination)
                }
            }
        }
    }
}

/// Placement of one region on the panel, plus whether its rectangle is
/// cleared to background before redrawing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionGeometry {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    /// Clear the rectangle to white before drawing. Defaults to true;
    /// partial updates over stale pixels are the main ghosting source.
    #[serde(default = "default_clear")]
    pub clear: bool,
}

fn default_clear() -> bool {
    true
}

impl RegionGeometry {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            clear: true,
        }
    }
}

/// One cycle's worth of data from the server, immutable once fetched.
///
/// Regions absent from `values` are untouched this cycle (no change, no
/// erasure). `template` optionally carries a freshly rendered full-screen
/// bitmap in compressed (PNG) form; when absent, the template cache fetches
/// from its own endpoint only when stale.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DataSnapshot {
    /// Current value per region
    pub values: BTreeMap<RegionId, RegionValue>,
    /// Per-region geometry overrides for this snapshot
    #[serde(default)]
    pub geometry: BTreeMap<RegionId, RegionGeometry>,
    /// Compressed full-screen template image, if the server pushed one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Vec<u8>>,
}

impl DataSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Geometry for a region: snapshot override first, layout default second.
    pub fn geometry_for(&self, region: &RegionId) -> RegionGeometry {
        self.geometry
            .get(region)
            .copied()
            .unwrap_or_else(|| region.default_geometry())
    }
}

/// What the scheduler decided to do with the panel this cycle.
/// Transient; recomputed every cycle and never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Repaint the whole panel
    Full,
    /// Repaint only these regions
    Partial(std::collections::BTreeSet<RegionId>),
    /// Nothing changed; no panel I/O at all
    Skip,
}

impl fmt::Display for RefreshDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshDecision::Full => write!(f, "full"),
            RefreshDecision::Partial(set) => write!(f, "partial({})", set.len()),
            RefreshDecision::Skip => write!(f, "skip"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_ids_round_trip_through_wire_names() {
        let ids = [
            RegionId::Time,
            RegionId::Train(1),
            RegionId::Train(3),
            RegionId::Tram(2),
            RegionId::Weather,
            RegionId::Coffee,
            RegionId::Alert,
            RegionId::Location,
            RegionId::Other("pollen".into()),
        ];
        for id in ids {
            assert_eq!(RegionId::from(id.to_string().as_str()), id);
        }
    }

    #[test]
    fn unknown_names_map_to_other() {
        assert_eq!(
            RegionId::from("uv_index"),
            RegionId::Other("uv_index".into())
        );
        assert!(RegionId::from("uv_index").is_unrecognized());
        assert!(!RegionId::Train(9).is_unrecognized());
    }

    #[test]
    fn region_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&RegionId::Tram(2)).unwrap();
        assert_eq!(json, "\"tram2\"");
        let back: RegionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RegionId::Tram(2));
    }

    #[test]
    fn departure_values_compare_exactly() {
        let a = RegionValue::Departure {
            minutes: 5,
            destination: "City".into(),
        };
        let b = RegionValue::Departure {
            minutes: 5,
            destination: "City".into(),
        };
        let c = RegionValue::Departure {
            minutes: 6,
            destination: "City".into(),
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.display_text(), "5 min  City");
    }

    #[test]
    fn snapshot_geometry_falls_back_to_layout_default() {
        let mut snapshot = DataSnapshot::new();
        assert_eq!(
            snapshot.geometry_for(&RegionId::Time),
            RegionId::Time.default_geometry()
        );

        let custom = RegionGeometry::new(0, 0, 100, 20);
        snapshot.geometry.insert(RegionId::Time, custom);
        assert_eq!(snapshot.geometry_for(&RegionId::Time), custom);
    }

    #[test]
    fn departure_rows_stack_downward() {
        let first = RegionId::Train(1).default_geometry();
        let second = RegionId::Train(2).default_geometry();
        assert!(second.y > first.y);
        assert_eq!(first.x, second.x);
    }
}
