//! # Data Source
//!
//! Fetching the per-cycle snapshot and the template image from the
//! companion server. Transport is deliberately thin and swappable: the
//! engine sees only the [`DataSource`] trait, and every failure is a
//! recoverable [`FetchError`] handled at the scheduler boundary.
//!
//! ## Wire format
//!
//! The snapshot endpoint (`/api/partial`) answers compact JSON shaped for a
//! small device:
//!
//! ```json
//! {
//!   "time": "10:42",
//!   "trains": [{"minutes": 5, "destination": "City"}, {"minutes": 15}],
//!   "trams":  [{"minutes": 3, "destination": "City"}],
//!   "weather": "22C Clear",
//!   "coffee": true, "coffeeText": "You have 8 minutes",
//!   "alert": false,
//!   "location": "Flinders St",
//!   "regions": {"time": {"x": 20, "y": 10, "w": 135, "h": 48}},
//!   "ts": 1756500000
//! }
//! ```
//!
//! Fields this firmware does not recognize are *kept*, mapped to
//! [`RegionId::Other`] so the diff tracker flags them every cycle and new
//! server-side fields show up on the glass without a firmware update.
//!
//! The template endpoint (`/api/template.png`) answers raw PNG bytes.

use crate::config::ServerConfig;
use crate::{DataSnapshot, RegionGeometry, RegionId, RegionValue};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Transient fetch failures: network, server, or payload shape.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Connection, DNS, TLS, or timeout failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("server returned HTTP {0}")]
    Status(u16),

    /// The body was not the expected JSON shape
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The two fetches a cycle can make. Both are synchronous and bounded by
/// the configured timeout; there is no cancellation mid-call.
pub trait DataSource {
    fn fetch_snapshot(&mut self) -> Result<DataSnapshot, FetchError>;
    fn fetch_template(&mut self) -> Result<Vec<u8>, FetchError>;
}

/// One departure line as the server sends it.
#[derive(Debug, Deserialize)]
struct WireDeparture {
    minutes: u16,
    #[serde(default)]
    destination: String,
}

/// Geometry override as the server sends it.
#[derive(Debug, Deserialize)]
struct WireGeometry {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    #[serde(default = "default_true")]
    clear: bool,
}

fn default_true() -> bool {
    true
}

/// The `/api/partial` payload. Unknown top-level fields land in `extra`.
#[derive(Debug, Deserialize)]
struct WireSnapshot {
    time: Option<String>,
    #[serde(default)]
    trains: Vec<WireDeparture>,
    #[serde(default)]
    trams: Vec<WireDeparture>,
    weather: Option<String>,
    coffee: Option<bool>,
    #[serde(rename = "coffeeText")]
    coffee_text: Option<String>,
    alert: Option<bool>,
    #[serde(rename = "alertText")]
    alert_text: Option<String>,
    location: Option<String>,
    #[serde(default)]
    regions: BTreeMap<String, WireGeometry>,
    /// Server-side timestamp; consumed so it does not look like a region
    #[allow(dead_code)]
    ts: Option<i64>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl WireSnapshot {
    fn into_snapshot(self) -> DataSnapshot {
        let mut snapshot = DataSnapshot::new();

        if let Some(time) = self.time {
            snapshot.values.insert(RegionId::Time, RegionValue::Text(time));
        }
        for (i, dep) in self.trains.into_iter().enumerate().take(u8::MAX as usize) {
            snapshot.values.insert(
                RegionId::Train(i as u8 + 1),
                RegionValue::Departure {
                    minutes: dep.minutes,
                    destination: dep.destination,
                },
            );
        }
        for (i, dep) in self.trams.into_iter().enumerate().take(u8::MAX as usize) {
            snapshot.values.insert(
                RegionId::Tram(i as u8 + 1),
                RegionValue::Departure {
                    minutes: dep.minutes,
                    destination: dep.destination,
                },
            );
        }
        if let Some(weather) = self.weather {
            snapshot
                .values
                .insert(RegionId::Weather, RegionValue::Text(weather));
        }
        if let Some(can_get) = self.coffee {
            let text = self.coffee_text.unwrap_or_else(|| {
                if can_get {
                    "COFFEE TIME!".to_string()
                } else {
                    "GO DIRECT".to_string()
                }
            });
            snapshot
                .values
                .insert(RegionId::Coffee, RegionValue::Text(text));
        }
        if let Some(alert) = self.alert {
            let text = if alert {
                self.alert_text
                    .unwrap_or_else(|| "Service alert".to_string())
            } else {
                "Good service on all lines".to_string()
            };
            snapshot
                .values
                .insert(RegionId::Alert, RegionValue::Text(text));
        }
        if let Some(location) = self.location {
            snapshot
                .values
                .insert(RegionId::Location, RegionValue::Text(location));
        }

        for (name, geometry) in self.regions {
            snapshot.geometry.insert(
                RegionId::from(name.as_str()),
                RegionGeometry {
                    x: geometry.x,
                    y: geometry.y,
                    w: geometry.w,
                    h: geometry.h,
                    clear: geometry.clear,
                },
            );
        }

        // Anything the server sent that this revision does not know about
        // is rendered as text rather than dropped.
        for (name, value) in self.extra {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            snapshot
                .values
                .insert(RegionId::from(name.as_str()), RegionValue::Text(text));
        }

        snapshot
    }
}

/// Blocking HTTP implementation of [`DataSource`].
pub struct HttpDataSource {
    client: reqwest::blocking::Client,
    base_url: String,
    device_id: String,
}

impl HttpDataSource {
    pub fn new(config: &ServerConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            device_id: config.device_id.clone(),
        })
    }

    fn get(&self, path: &str) -> Result<reqwest::blocking::Response, FetchError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Device-ID", &self.device_id)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

impl DataSource for HttpDataSource {
    fn fetch_snapshot(&mut self) -> Result<DataSnapshot, FetchError> {
        let body = self.get("/api/partial")?.text()?;
        let wire: WireSnapshot = serde_json::from_str(&body)?;
        Ok(wire.into_snapshot())
    }

    fn fetch_template(&mut self) -> Result<Vec<u8>, FetchError> {
        Ok(self.get("/api/template.png")?.bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_payload_maps_to_regions() {
        let json = r#"{
            "time": "10:42",
            "trains": [{"minutes": 5, "destination": "City"}, {"minutes": 15}],
            "trams": [{"minutes": 3, "destination": "West Coburg"}],
            "weather": "22C Clear",
            "coffee": true, "coffeeText": "You have 8 minutes",
            "alert": false,
            "location": "Flinders St",
            "ts": 1756500000
        }"#;
        let wire: WireSnapshot = serde_json::from_str(json).unwrap();
        let snapshot = wire.into_snapshot();

        assert_eq!(
            snapshot.values.get(&RegionId::Time),
            Some(&RegionValue::Text("10:42".into()))
        );
        assert_eq!(
            snapshot.values.get(&RegionId::Train(1)),
            Some(&RegionValue::Departure {
                minutes: 5,
                destination: "City".into()
            })
        );
        assert_eq!(
            snapshot.values.get(&RegionId::Train(2)),
            Some(&RegionValue::Departure {
                minutes: 15,
                destination: String::new()
            })
        );
        assert_eq!(
            snapshot.values.get(&RegionId::Tram(1)),
            Some(&RegionValue::Departure {
                minutes: 3,
                destination: "West Coburg".into()
            })
        );
        assert_eq!(
            snapshot.values.get(&RegionId::Coffee),
            Some(&RegionValue::Text("You have 8 minutes".into()))
        );
        // alert=false renders the all-clear banner, not nothing
        assert_eq!(
            snapshot.values.get(&RegionId::Alert),
            Some(&RegionValue::Text("Good service on all lines".into()))
        );
        // "ts" must not leak through as a region
        assert!(!snapshot
            .values
            .keys()
            .any(|k| k == &RegionId::Other("ts".into())));
    }

    #[test]
    fn alert_true_uses_alert_text() {
        let json = r#"{"alert": true, "alertText": "Buses replace trains"}"#;
        let wire: WireSnapshot = serde_json::from_str(json).unwrap();
        let snapshot = wire.into_snapshot();
        assert_eq!(
            snapshot.values.get(&RegionId::Alert),
            Some(&RegionValue::Text("Buses replace trains".into()))
        );
    }

    #[test]
    fn unknown_fields_become_other_regions() {
        let json = r#"{"time": "10:42", "pollen": "high", "uv_index": 11}"#;
        let wire: WireSnapshot = serde_json::from_str(json).unwrap();
        let snapshot = wire.into_snapshot();

        assert_eq!(
            snapshot.values.get(&RegionId::Other("pollen".into())),
            Some(&RegionValue::Text("high".into()))
        );
        assert_eq!(
            snapshot.values.get(&RegionId::Other("uv_index".into())),
            Some(&RegionValue::Text("11".into()))
        );
    }

    #[test]
    fn geometry_overrides_parse_with_default_clear() {
        let json = r#"{
            "time": "10:42",
            "regions": {
                "time": {"x": 0, "y": 0, "w": 100, "h": 30},
                "alert": {"x": 0, "y": 440, "w": 800, "h": 40, "clear": false}
            }
        }"#;
        let wire: WireSnapshot = serde_json::from_str(json).unwrap();
        let snapshot = wire.into_snapshot();

        let time = snapshot.geometry.get(&RegionId::Time).unwrap();
        assert!(time.clear, "clear should default to true");
        let alert = snapshot.geometry.get(&RegionId::Alert).unwrap();
        assert!(!alert.clear);
    }

    #[test]
    fn empty_payload_is_a_valid_empty_snapshot() {
        let wire: WireSnapshot = serde_json::from_str("{}").unwrap();
        let snapshot = wire.into_snapshot();
        assert!(snapshot.values.is_empty());
        assert!(snapshot.template.is_none());
    }
}
