// PostgreSQL store gateway
// All SQL and JSONB handling for the ingestion core lives here

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use uuid::Uuid;

use super::StoreGateway;
use crate::constants::FIRST_SHORT_ID;
use crate::device::{Device, DevicePatch};
use crate::error::StoreError;
use crate::telemetry::{Protocol, TelemetryRecord};

/// PostgreSQL-backed store gateway over a bounded connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(PgStore { pool })
    }
}

fn protocol_from_str(raw: &str) -> Result<Protocol, StoreError> {
    match raw {
        "tfms90" => Ok(Protocol::Tfms90),
        "teltonika" => Ok(Protocol::Teltonika),
        other => Err(StoreError::Invariant(format!("unknown protocol tag {other}"))),
    }
}

fn device_from_row(row: &PgRow) -> Result<Device, StoreError> {
    let protocol: String = row.try_get("protocol")?;
    Ok(Device {
        id: row.try_get("id")?,
        device_key: row.try_get("device_id")?,
        imei: row.try_get("imei")?,
        protocol: protocol_from_str(&protocol)?,
        short_device_id: row.try_get("short_device_id")?,
        firmware_version: row.try_get("firmware_version")?,
        sim_iccid: row.try_get("sim_iccid")?,
        last_seen: row.try_get("last_seen")?,
        is_active: row.try_get("is_active")?,
    })
}

#[async_trait]
impl StoreGateway for PgStore {
    async fn lookup_by_imei(&self, imei: &str) -> Result<Option<Device>, StoreError> {
        let row = sqlx::query(
            "select id, device_id, imei, protocol, short_device_id, firmware_version, \
             sim_iccid, last_seen, is_active \
             from devices where imei = $1 limit 1",
        )
        .bind(imei)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(device_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn lookup_by_key(&self, device_key: &str) -> Result<Option<Device>, StoreError> {
        let row = sqlx::query(
            "select id, device_id, imei, protocol, short_device_id, firmware_version, \
             sim_iccid, last_seen, is_active \
             from devices where device_id = $1 limit 1",
        )
        .bind(device_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(device_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Allocation goes through a counter row, not MAX+1 over devices:
    /// an id allocated for a registration that later fails must stay
    /// burned, and the upsert's row lock serializes simultaneous
    /// first-contact devices.
    async fn allocate_short_id(&self, protocol: Protocol) -> Result<i32, StoreError> {
        let row = sqlx::query(
            "insert into short_id_counters (protocol, next_id) \
             values ( \
                 $1, \
                 greatest(coalesce((select max(short_device_id) from devices where protocol = $1), $2 - 1) + 1, $2) + 1 \
             ) \
             on conflict (protocol) \
             do update set next_id = short_id_counters.next_id + 1 \
             returning next_id - 1 as allocated",
        )
        .bind(protocol.as_str())
        .bind(FIRST_SHORT_ID)
        .fetch_one(&self.pool)
        .await?;

        let allocated: i32 = row.try_get("allocated")?;
        Ok(allocated)
    }

    async fn register_device(
        &self,
        device_id: Uuid,
        patch: DevicePatch,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "update devices set \
             device_id = $2, \
             short_device_id = $3, \
             firmware_version = coalesce($4, firmware_version), \
             sim_iccid = coalesce($5, sim_iccid), \
             last_seen = $6, \
             is_active = $7 \
             where id = $1",
        )
        .bind(device_id)
        .bind(&patch.device_key)
        .bind(patch.short_device_id)
        .bind(&patch.firmware_version)
        .bind(&patch.sim_iccid)
        .bind(patch.last_seen)
        .bind(patch.is_active)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Invariant(format!(
                "device {device_id} vanished during registration"
            )));
        }
        Ok(())
    }

    async fn touch_last_seen(
        &self,
        device_key: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("update devices set last_seen = $2, is_active = true where device_id = $1")
            .bind(device_key)
            .bind(ts)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_telemetry(&self, record: &TelemetryRecord) -> Result<i64, StoreError> {
        // Explicit column list only. The extras bag becomes the single
        // io_elements JSONB value; unknown keys never become columns.
        let extras = serde_json::to_value(&record.extras)
            .map_err(|e| StoreError::Invariant(format!("extras not serializable: {e}")))?;
        let trip = record.trip.clone().unwrap_or_default();

        let row = sqlx::query(
            "insert into telemetry_data ( \
             device_id, timestamp, latitude, longitude, altitude, speed, heading, \
             satellites, fuel_level, ignition, protocol, message_type, \
             start_timestamp, end_timestamp, duration_seconds, start_fuel, end_fuel, \
             distance_km, start_latitude, start_longitude, io_elements \
             ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
             $13, $14, $15, $16, $17, $18, $19, $20, $21) \
             returning id",
        )
        .bind(&record.device_key)
        .bind(record.timestamp)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.altitude)
        .bind(record.speed)
        .bind(record.heading)
        .bind(record.satellites)
        .bind(record.fuel_level)
        .bind(record.ignition)
        .bind(record.protocol.as_str())
        .bind(&record.message_type)
        .bind(trip.start_timestamp)
        .bind(trip.end_timestamp)
        .bind(trip.duration_seconds)
        .bind(trip.start_fuel)
        .bind(trip.end_fuel)
        .bind(trip.distance_km)
        .bind(trip.start_latitude)
        .bind(trip.start_longitude)
        .bind(extras)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        Ok(id)
    }

    async fn registered_imeis(&self) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query("select imei from devices where imei is not null")
            .fetch_all(&self.pool)
            .await?;

        let mut imeis = HashSet::with_capacity(rows.len());
        for row in rows {
            let imei: String = row.try_get("imei")?;
            imeis.insert(imei);
        }
        Ok(imeis)
    }
}
