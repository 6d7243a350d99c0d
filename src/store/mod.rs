// Store gateway
// Narrow data-access seam; the only layer that sees SQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::device::{Device, DevicePatch};
use crate::error::StoreError;
use crate::telemetry::{Protocol, TelemetryRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Data-access operations the ingestion core needs. Implementations must
/// be safe for concurrent callers; sessions hold no locks across calls.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Look up a pre-registered device by IMEI.
    async fn lookup_by_imei(&self, imei: &str) -> Result<Option<Device>, StoreError>;

    /// Look up a device by its canonical key. Sessions use this to
    /// validate a reconnect that skips the login handshake; telemetry is
    /// only ever written under a key that resolves here.
    async fn lookup_by_key(&self, device_key: &str) -> Result<Option<Device>, StoreError>;

    /// Hand out the next short id for a protocol. Ids start at 100, are
    /// strictly increasing, and are never recycled even when the
    /// follow-up registration fails.
    async fn allocate_short_id(&self, protocol: Protocol) -> Result<i32, StoreError>;

    /// Apply a registration patch to an existing device row.
    async fn register_device(&self, device_id: Uuid, patch: DevicePatch)
        -> Result<(), StoreError>;

    /// Update a device's last-seen timestamp. Callers coalesce; this is
    /// a plain write.
    async fn touch_last_seen(&self, device_key: &str, ts: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Insert one telemetry row and return its id. The extras bag is
    /// serialized into the single io_elements column; it is never
    /// expanded into top-level columns.
    async fn insert_telemetry(&self, record: &TelemetryRecord) -> Result<i64, StoreError>;

    /// IMEIs currently present in the store, used to validate greetings.
    async fn registered_imeis(&self) -> Result<HashSet<String>, StoreError>;
}
