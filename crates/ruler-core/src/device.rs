//! Device and sensor models used by the rules

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{Payload, PayloadError, PayloadResult, Timestamp};

/// Power status of a switch or light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    On,
    Off,
}

impl Status {
    /// The status as published on command topics
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::On => "ON",
            Status::Off => "OFF",
        }
    }

    /// Read a status report from a payload
    ///
    /// Accepts plain `ON`/`OFF` text as well as a structured report carrying
    /// a `POWER` or `state` field.
    pub fn from_payload(payload: &Payload) -> PayloadResult<Self> {
        match payload {
            Payload::Text(text) => text.parse(),
            Payload::Structured(value) => value
                .get("POWER")
                .or_else(|| value.get("state"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| PayloadError::InvalidStatus(value.to_string()))?
                .parse(),
        }
    }
}

impl FromStr for Status {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" => Ok(Status::On),
            "OFF" => Ok(Status::Off),
            _ => Err(PayloadError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Status> for Payload {
    fn from(status: Status) -> Self {
        Payload::Text(status.as_str().to_string())
    }
}

/// State held by a deadline-driven rule
///
/// Owned by exactly one rule and only changed by its reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub status: Status,
    pub deadline: Timestamp,
}

impl DeviceState {
    /// An OFF state whose deadline has already passed at `now`
    pub fn off(now: Timestamp) -> Self {
        Self {
            status: Status::Off,
            deadline: now,
        }
    }
}

/// Raw occupancy sensor report as published by zigbee2mqtt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionReading {
    pub occupancy: bool,
    #[serde(default)]
    pub illuminance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkquality: Option<f64>,
}

/// An occupancy snapshot stamped with the time the engine received it
///
/// Sensors do not timestamp reliably; `observed_at` is always assigned on
/// receipt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionEvent {
    pub occupancy: bool,
    pub illuminance: f64,
    pub observed_at: Timestamp,
}

impl MotionEvent {
    /// Stamp a sensor reading with its receipt time
    pub fn observe(reading: &MotionReading, observed_at: Timestamp) -> Self {
        Self {
            occupancy: reading.occupancy,
            illuminance: reading.illuminance,
            observed_at,
        }
    }
}

/// Last status reported for a device on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalStatus {
    pub status: Status,
    pub observed_at: Timestamp,
}

/// A command this process issued, with its issue time
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEcho {
    pub value: String,
    pub issued_at: Timestamp,
}

/// A button press report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonPress {
    /// `single`, `double`, `triple`, `quadruple`, ...
    pub click: String,
}

/// An inclusive range of local hours
///
/// `start > end` wraps past midnight, so `22..=5` covers the night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Check whether `hour` falls inside the window
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            self.start <= hour && hour <= self.end
        } else {
            hour >= self.start || hour <= self.end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_from_text() {
        assert_eq!(Status::from_payload(&Payload::from("ON")).unwrap(), Status::On);
        assert_eq!(Status::from_payload(&Payload::from("off")).unwrap(), Status::Off);
        assert!(Status::from_payload(&Payload::from("TOGGLE")).is_err());
    }

    #[test]
    fn test_status_from_structured() {
        let payload = Payload::Structured(json!({"POWER": "ON"}));
        assert_eq!(Status::from_payload(&payload).unwrap(), Status::On);

        let payload = Payload::Structured(json!({"state": "OFF", "brightness": 10}));
        assert_eq!(Status::from_payload(&payload).unwrap(), Status::Off);

        let payload = Payload::Structured(json!({"temperature": 21}));
        assert!(Status::from_payload(&payload).is_err());
    }

    #[test]
    fn test_motion_reading_ignores_extra_fields() {
        let payload = Payload::Structured(json!({
            "battery": 100,
            "voltage": 3025,
            "illuminance": 4,
            "linkquality": 60,
            "occupancy": true
        }));
        let reading: MotionReading = payload.parse().unwrap();
        assert!(reading.occupancy);
        assert_eq!(reading.illuminance, 4.0);
    }

    #[test]
    fn test_hour_window() {
        let morning = HourWindow::new(3, 7);
        assert!(!morning.contains(2));
        assert!(morning.contains(3));
        assert!(morning.contains(7));
        assert!(!morning.contains(8));

        let night = HourWindow::new(22, 5);
        assert!(night.contains(23));
        assert!(night.contains(0));
        assert!(night.contains(5));
        assert!(!night.contains(12));
    }
}
