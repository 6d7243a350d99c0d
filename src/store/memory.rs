// In-memory store gateway
// Same contract as the Postgres implementation, used by tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use super::StoreGateway;
use crate::constants::FIRST_SHORT_ID;
use crate::device::{Device, DevicePatch};
use crate::error::StoreError;
use crate::telemetry::{Protocol, TelemetryRecord};

#[derive(Default)]
struct Inner {
    devices: Vec<Device>,
    telemetry: Vec<TelemetryRecord>,
    counters: HashMap<Protocol, i32>,
    next_row_id: i64,
}

/// Mutex-guarded map store. Locks are never held across await points.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pre-register a device, as the external portal would.
    pub fn seed_device(&self, device: Device) {
        self.lock().devices.push(device);
    }

    pub fn device_by_imei(&self, imei: &str) -> Option<Device> {
        self.lock()
            .devices
            .iter()
            .find(|d| d.imei.as_deref() == Some(imei))
            .cloned()
    }

    pub fn device_by_key(&self, device_key: &str) -> Option<Device> {
        self.lock()
            .devices
            .iter()
            .find(|d| d.device_key == device_key)
            .cloned()
    }

    /// Snapshot of every inserted telemetry row, in insert order.
    pub fn telemetry(&self) -> Vec<TelemetryRecord> {
        self.lock().telemetry.clone()
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn lookup_by_imei(&self, imei: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.device_by_imei(imei))
    }

    async fn lookup_by_key(&self, device_key: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.device_by_key(device_key))
    }

    async fn allocate_short_id(&self, protocol: Protocol) -> Result<i32, StoreError> {
        let mut inner = self.lock();
        let seeded_max = inner
            .devices
            .iter()
            .filter(|d| d.protocol == protocol)
            .filter_map(|d| d.short_device_id)
            .max();
        let entry = inner
            .counters
            .entry(protocol)
            .or_insert_with(|| seeded_max.map_or(FIRST_SHORT_ID, |m| (m + 1).max(FIRST_SHORT_ID)));
        let allocated = *entry;
        *entry += 1;
        Ok(allocated)
    }

    async fn register_device(
        &self,
        device_id: Uuid,
        patch: DevicePatch,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let device = inner
            .devices
            .iter_mut()
            .find(|d| d.id == device_id)
            .ok_or_else(|| {
                StoreError::Invariant(format!("device {device_id} vanished during registration"))
            })?;
        device.device_key = patch.device_key;
        device.short_device_id = Some(patch.short_device_id);
        if patch.firmware_version.is_some() {
            device.firmware_version = patch.firmware_version;
        }
        if patch.sim_iccid.is_some() {
            device.sim_iccid = patch.sim_iccid;
        }
        device.last_seen = Some(patch.last_seen);
        device.is_active = patch.is_active;
        Ok(())
    }

    async fn touch_last_seen(
        &self,
        device_key: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(device) = inner.devices.iter_mut().find(|d| d.device_key == device_key) {
            device.last_seen = Some(ts);
            device.is_active = true;
        }
        Ok(())
    }

    async fn insert_telemetry(&self, record: &TelemetryRecord) -> Result<i64, StoreError> {
        let mut inner = self.lock();
        inner.next_row_id += 1;
        let id = inner.next_row_id;
        inner.telemetry.push(record.clone());
        Ok(id)
    }

    async fn registered_imeis(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .lock()
            .devices
            .iter()
            .filter_map(|d| d.imei.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(imei: &str, protocol: Protocol, short_id: Option<i32>) -> Device {
        Device {
            id: Uuid::new_v4(),
            device_key: imei.to_string(),
            imei: Some(imei.to_string()),
            protocol,
            short_device_id: short_id,
            firmware_version: None,
            sim_iccid: None,
            last_seen: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_short_ids_start_at_100_and_increase() {
        let store = MemoryStore::new();
        assert_eq!(store.allocate_short_id(Protocol::Tfms90).await.unwrap(), 100);
        assert_eq!(store.allocate_short_id(Protocol::Tfms90).await.unwrap(), 101);
        assert_eq!(store.allocate_short_id(Protocol::Tfms90).await.unwrap(), 102);
        // Independent sequence per protocol.
        assert_eq!(
            store.allocate_short_id(Protocol::Teltonika).await.unwrap(),
            100
        );
    }

    #[tokio::test]
    async fn test_allocation_respects_seeded_devices() {
        let store = MemoryStore::new();
        store.seed_device(seeded("867762040399001", Protocol::Tfms90, Some(150)));
        assert_eq!(store.allocate_short_id(Protocol::Tfms90).await.unwrap(), 151);
    }

    #[tokio::test]
    async fn test_allocated_ids_are_not_recycled() {
        let store = MemoryStore::new();
        let a = store.allocate_short_id(Protocol::Tfms90).await.unwrap();
        // No registration happened for `a`; the next allocation still moves on.
        let b = store.allocate_short_id(Protocol::Tfms90).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_register_updates_identity() {
        let store = MemoryStore::new();
        let device = seeded("867762040399039", Protocol::Tfms90, None);
        let id = device.id;
        store.seed_device(device);

        let patch = DevicePatch {
            device_key: "TFMS90_100".into(),
            short_device_id: 100,
            firmware_version: Some("2.0.1".into()),
            sim_iccid: Some("89970000000000000000".into()),
            last_seen: Utc::now(),
            is_active: true,
        };
        store.register_device(id, patch).await.unwrap();

        let updated = store.device_by_imei("867762040399039").unwrap();
        assert_eq!(updated.device_key, "TFMS90_100");
        assert_eq!(updated.short_device_id, Some(100));
        assert_eq!(updated.firmware_version.as_deref(), Some("2.0.1"));
        // Reachable by key and by IMEI simultaneously.
        assert!(store.device_by_key("TFMS90_100").is_some());
    }

    #[tokio::test]
    async fn test_register_unknown_uuid_fails() {
        let store = MemoryStore::new();
        let patch = DevicePatch {
            device_key: "TFMS90_100".into(),
            short_device_id: 100,
            firmware_version: None,
            sim_iccid: None,
            last_seen: Utc::now(),
            is_active: true,
        };
        assert!(store.register_device(Uuid::new_v4(), patch).await.is_err());
    }
}
