// Protocol-neutral telemetry record
// Both codecs produce this; the store gateway is the only serializer

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Wire protocol a device speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tfms90,
    Teltonika,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tfms90 => "tfms90",
            Protocol::Teltonika => "teltonika",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trip summary carried by TFMS90 trip-end frames. These attributes are
/// promoted to top-level telemetry columns, never left in extras.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TripSummary {
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub start_fuel: Option<f64>,
    pub end_fuel: Option<f64>,
    pub distance_km: Option<f64>,
    pub start_latitude: Option<f64>,
    pub start_longitude: Option<f64>,
}

/// One parsed observation, keyed by the canonical device key.
///
/// Two disjoint regions: typed top-level attributes, and the free-form
/// `extras` bag of scalars. Extras are serialized to a single JSON
/// column and never expanded into top-level columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub device_key: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub satellites: Option<i32>,
    pub fuel_level: Option<f64>,
    pub ignition: Option<bool>,
    pub protocol: Protocol,
    pub message_type: String,
    pub trip: Option<TripSummary>,
    pub extras: BTreeMap<String, Value>,
}

impl TelemetryRecord {
    pub fn new(
        device_key: impl Into<String>,
        protocol: Protocol,
        message_type: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        TelemetryRecord {
            device_key: device_key.into(),
            timestamp,
            latitude: None,
            longitude: None,
            altitude: None,
            speed: None,
            heading: None,
            satellites: None,
            fuel_level: None,
            ignition: None,
            protocol,
            message_type: message_type.into(),
            trip: None,
            extras: BTreeMap::new(),
        }
    }

    /// Insert a scalar into the extras bag.
    pub fn extra(&mut self, key: &str, value: impl Into<Value>) {
        self.extras.insert(key.to_string(), value.into());
    }
}

/// Range-check a latitude. Out-of-range values become null; the record
/// itself is never dropped for bad coordinates.
pub fn validate_latitude(lat: f64) -> Option<f64> {
    if (-90.0..=90.0).contains(&lat) {
        Some(lat)
    } else {
        None
    }
}

/// Range-check a longitude, same policy as [`validate_latitude`].
pub fn validate_longitude(lon: f64) -> Option<f64> {
    if (-180.0..=180.0).contains(&lon) {
        Some(lon)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_validation() {
        assert_eq!(validate_latitude(13.067439), Some(13.067439));
        assert_eq!(validate_latitude(-90.0), Some(-90.0));
        assert_eq!(validate_latitude(90.1), None);
        assert_eq!(validate_latitude(-123.4), None);
        assert_eq!(validate_longitude(80.237617), Some(80.237617));
        assert_eq!(validate_longitude(180.0), Some(180.0));
        assert_eq!(validate_longitude(181.0), None);
    }

    #[test]
    fn test_extras_stay_separate() {
        let mut record = TelemetryRecord::new(
            "TFMS90_100",
            Protocol::Tfms90,
            "TD",
            Utc::now(),
        );
        record.extra("odometer", 123456.0);
        record.extra("trip_number", "1");

        assert_eq!(record.extras.len(), 2);
        assert_eq!(record.extras["odometer"], Value::from(123456.0));
        // Top-level fields are untouched by extras.
        assert_eq!(record.fuel_level, None);
    }

    #[test]
    fn test_protocol_tags() {
        assert_eq!(Protocol::Tfms90.as_str(), "tfms90");
        assert_eq!(Protocol::Teltonika.as_str(), "teltonika");
        assert_eq!(Protocol::Teltonika.to_string(), "teltonika");
    }
}
