// Device identity
// Rows in the external devices table and the registration patch applied on login

use crate::telemetry::Protocol;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One physical tracker as stored in the devices table.
///
/// Devices are created externally (pre-registration); the core only
/// binds identity on first login and touches last-seen afterwards.
#[derive(Debug, Clone)]
pub struct Device {
    /// Stable internal row identity.
    pub id: Uuid,
    /// Canonical device key: `TFMS90_<short_id>` once registration has
    /// completed, the raw IMEI before that and for Teltonika devices.
    pub device_key: String,
    pub imei: Option<String>,
    pub protocol: Protocol,
    /// Server-assigned wire id, >= 100, unique per protocol. Null until
    /// the first LG completes.
    pub short_device_id: Option<i32>,
    pub firmware_version: Option<String>,
    pub sim_iccid: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Fields rewritten on a device row when a login binds (or re-binds) it.
#[derive(Debug, Clone)]
pub struct DevicePatch {
    pub device_key: String,
    pub short_device_id: i32,
    pub firmware_version: Option<String>,
    pub sim_iccid: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
}

/// Canonical key for a registered TFMS90 device.
pub fn tfms90_key(short_id: i32) -> String {
    format!("TFMS90_{short_id}")
}
