// TFMS90 text protocol codec
// ASCII frames delimited by '$' .. '#?'; comma-separated fields

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::constants::{LOG_SAMPLE_BYTES, MAX_TFMS90_FRAME_BYTES, TFMS90_EPOCH_UNIX_SECS};
use crate::telemetry::{validate_latitude, validate_longitude, Protocol, TelemetryRecord, TripSummary};

/// Login intent carried by an LG frame. The session resolves identity
/// against the store and answers with [`login_ack`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoginRequest {
    pub imei: String,
    pub firmware_version: Option<String>,
    pub sim_iccid: Option<String>,
}

/// One successfully parsed data frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub message_type: String,
    /// Device id field as it appeared on the wire (short id once the
    /// device is registered).
    pub device_field: String,
    /// Token echoed in the ack: the trip field when the frame carries
    /// one, else the leading token field.
    pub ack_token: String,
    pub record: TelemetryRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tfms90Event {
    Login(LoginRequest),
    Data(DataFrame),
}

/// Incremental parser over a TFMS90 byte stream.
///
/// Tolerates concatenated frames, frames split across reads, interleaved
/// whitespace and leading garbage. A frame that fails to parse is logged
/// and skipped; the stream resyncs at the next '$'.
#[derive(Debug, Default)]
pub struct Tfms90Codec {
    buf: Vec<u8>,
}

impl Tfms90Codec {
    pub fn new() -> Self {
        Tfms90Codec { buf: Vec::new() }
    }

    /// Feed freshly read bytes, returning every event completed by them.
    pub fn feed(&mut self, input: &[u8]) -> Vec<Tfms90Event> {
        self.buf.extend_from_slice(input);
        let mut events = Vec::new();

        loop {
            // Resync: drop everything before the next '$'.
            let Some(start) = self.buf.iter().position(|&b| b == b'$') else {
                if self.buf.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!(sample = %sample(&self.buf), "discarding bytes with no frame start");
                }
                self.buf.clear();
                break;
            };
            if start > 0 {
                if self.buf[..start].iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!(sample = %sample(&self.buf[..start]), "discarding leading garbage");
                }
                self.buf.drain(..start);
            }

            let Some(hash) = self.buf.iter().position(|&b| b == b'#') else {
                if self.buf.len() > MAX_TFMS90_FRAME_BYTES {
                    // Runaway frame with no terminator; skip this '$'.
                    warn!(len = self.buf.len(), "unterminated frame exceeds limit, resyncing");
                    self.buf.drain(..1);
                    continue;
                }
                break;
            };

            let mut end = hash + 1;
            if self.buf.get(end) == Some(&b'?') {
                end += 1;
            }
            let frame: Vec<u8> = self.buf.drain(..end).collect();
            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }

        events
    }
}

/// Ack for a completed login: `$,0,ACK,<short_id>,#?`.
pub fn login_ack(short_id: i32) -> Vec<u8> {
    format!("$,0,ACK,{short_id},#?").into_bytes()
}

/// Ack for a data frame: `$,<token>,ACK,<id>,<record_count>,#?`.
pub fn data_ack(token: &str, ack_id: &str, record_count: usize) -> Vec<u8> {
    format!("$,{token},ACK,{ack_id},{record_count},#?").into_bytes()
}

fn sample(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(LOG_SAMPLE_BYTES)])
}

fn parse_frame(frame: &[u8]) -> Option<Tfms90Event> {
    let text = match std::str::from_utf8(frame) {
        Ok(t) => t,
        Err(_) => {
            warn!(sample = %sample(frame), "frame is not valid ascii");
            return None;
        }
    };

    let body = text
        .strip_suffix("#?")
        .or_else(|| text.strip_suffix('#'))
        .unwrap_or(text);
    let body = body.strip_suffix(',').unwrap_or(body);

    let parts: Vec<&str> = body.split(',').collect();
    if parts.len() < 4 || parts[0] != "$" {
        warn!(frame = %text, "frame too short");
        return None;
    }

    let token = parts[1];
    let message_type = parts[2].to_ascii_uppercase();
    let device_field = parts[3];
    if device_field.is_empty() {
        warn!(frame = %text, "frame has no device id");
        return None;
    }

    if message_type == "LG" {
        if parts.len() < 6 {
            warn!(frame = %text, "login frame missing firmware or iccid");
            return None;
        }
        return Some(Tfms90Event::Login(LoginRequest {
            imei: device_field.to_string(),
            firmware_version: non_empty(parts[4]),
            sim_iccid: non_empty(parts[5]),
        }));
    }

    let frame = build_data_frame(&parts, token, &message_type, device_field)?;
    debug!(
        message_type = %frame.message_type,
        device = %frame.device_field,
        "parsed frame"
    );
    Some(Tfms90Event::Data(frame))
}

fn build_data_frame(
    parts: &[&str],
    token: &str,
    message_type: &str,
    device_field: &str,
) -> Option<DataFrame> {
    let device_key = format!("TFMS90_{device_field}");
    let trip = parts
        .get(4)
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
    let ack_token = trip.copied().unwrap_or(token).to_string();

    let record = match message_type {
        "TD" | "TDA" => tracking_data(parts, &device_key)?,
        "TS" | "TE" => trip_event(parts, &device_key, message_type)?,
        "FLF" | "FLD" => fuel_event(parts, &device_key, message_type)?,
        "HA2" | "HB2" | "HC2" => harsh_event(parts, &device_key, message_type)?,
        "HB" => heartbeat(parts, &device_key),
        "OS3" => operating_status(parts, &device_key)?,
        "STAT" => status_report(parts, &device_key),
        other => {
            // Unknown types are stored with empty telemetry and acked,
            // so the device stops retrying them.
            debug!(message_type = %other, "storing unknown message type with empty telemetry");
            let ts = timestamp_hex(parts.get(5).copied()).unwrap_or_else(Utc::now);
            TelemetryRecord::new(&device_key, Protocol::Tfms90, other, ts)
        }
    };

    let mut record = record;
    if let Some(t) = trip {
        record.extra("trip_number", *t);
    }

    Some(DataFrame {
        message_type: if message_type == "TDA" { "TD".into() } else { message_type.into() },
        device_field: device_field.to_string(),
        ack_token,
        record,
    })
}

/// TD payload: trip, timestamp, lat, lon, speed, heading, satellites,
/// hdop, fuel, odometer, status flags, gsm, analog in, battery, temp.
fn tracking_data(parts: &[&str], device_key: &str) -> Option<TelemetryRecord> {
    if parts.len() < 11 {
        warn!(len = parts.len(), "TD frame too short");
        return None;
    }

    let ts = timestamp_hex(parts.get(5).copied()).unwrap_or_else(Utc::now);
    let mut record = TelemetryRecord::new(device_key, Protocol::Tfms90, "TD", ts);

    record.latitude = opt_f64(parts, 6).and_then(validate_latitude);
    record.longitude = opt_f64(parts, 7).and_then(validate_longitude);
    record.speed = opt_f64(parts, 8);
    record.heading = opt_f64(parts, 9);
    record.satellites = opt_i32(parts, 10);
    record.fuel_level = opt_f64(parts, 12);
    // Status flags: hex byte, bit 0 is ignition. Unparsable hex leaves
    // ignition unknown rather than guessing a boolean.
    record.ignition = parts
        .get(14)
        .and_then(|s| u8::from_str_radix(s, 16).ok())
        .map(|flags| flags & 0x01 == 0x01);

    if let Some(hdop) = opt_f64(parts, 11) {
        record.extra("hdop", hdop);
    }
    if let Some(fuel) = record.fuel_level {
        record.extra("fuel_level", fuel);
    }
    if let Some(odometer) = opt_f64(parts, 13) {
        record.extra("odometer", odometer);
    }
    if let Some(flags) = parts.get(14).filter(|s| !s.is_empty()) {
        record.extra("status_flags", *flags);
    }
    if let Some(gsm) = parts.get(15).and_then(|s| u8::from_str_radix(s, 16).ok()) {
        record.extra("gsm_signal", gsm);
    }
    if let Some(analog) = opt_f64(parts, 16) {
        record.extra("analog_input", analog);
    }
    if let Some(battery) = opt_f64(parts, 17) {
        record.extra("battery_voltage", battery);
    }
    if let Some(temp) = opt_f64(parts, 18) {
        record.extra("temperature", temp);
    }

    Some(record)
}

/// TS carries position and odometer; TE additionally carries the trip
/// summary, which is promoted to top-level fields.
fn trip_event(parts: &[&str], device_key: &str, message_type: &str) -> Option<TelemetryRecord> {
    if parts.len() < 8 {
        warn!(message_type, len = parts.len(), "trip frame too short");
        return None;
    }

    let ts = timestamp_hex(parts.get(5).copied()).unwrap_or_else(Utc::now);
    let mut record = TelemetryRecord::new(device_key, Protocol::Tfms90, message_type, ts);
    record.latitude = opt_f64(parts, 6).and_then(validate_latitude);
    record.longitude = opt_f64(parts, 7).and_then(validate_longitude);

    if message_type == "TS" {
        record.extra("event_type", "trip_start");
        if let Some(odometer) = opt_f64(parts, 8) {
            record.extra("odometer", odometer);
        }
        return Some(record);
    }

    record.extra("event_type", "trip_end");
    record.trip = Some(TripSummary {
        start_timestamp: timestamp_hex(parts.get(8).copied()),
        end_timestamp: timestamp_hex(parts.get(9).copied()),
        duration_seconds: opt_i64(parts, 10),
        distance_km: opt_f64(parts, 11),
        start_fuel: opt_f64(parts, 12),
        end_fuel: opt_f64(parts, 13),
        start_latitude: opt_f64(parts, 14).and_then(validate_latitude),
        start_longitude: opt_f64(parts, 15).and_then(validate_longitude),
    });

    Some(record)
}

/// FLF / FLD payload: position plus fuel level before, after, amount.
fn fuel_event(parts: &[&str], device_key: &str, message_type: &str) -> Option<TelemetryRecord> {
    if parts.len() < 11 {
        warn!(message_type, len = parts.len(), "fuel frame too short");
        return None;
    }

    let ts = timestamp_hex(parts.get(5).copied()).unwrap_or_else(Utc::now);
    let mut record = TelemetryRecord::new(device_key, Protocol::Tfms90, message_type, ts);
    record.latitude = opt_f64(parts, 6).and_then(validate_latitude);
    record.longitude = opt_f64(parts, 7).and_then(validate_longitude);

    let before = opt_f64(parts, 8);
    let after = opt_f64(parts, 9);
    let amount = opt_f64(parts, 10);
    record.fuel_level = after;

    record.extra(
        "event_type",
        if message_type == "FLF" { "fuel_fill" } else { "fuel_drain" },
    );
    if let Some(v) = before {
        record.extra("fuel_before", v);
    }
    if let Some(v) = after {
        record.extra("fuel_after", v);
    }
    if let Some(v) = amount {
        record.extra("amount", v);
    }

    Some(record)
}

fn harsh_event(parts: &[&str], device_key: &str, message_type: &str) -> Option<TelemetryRecord> {
    if parts.len() < 8 {
        warn!(message_type, len = parts.len(), "harsh event frame too short");
        return None;
    }

    let ts = timestamp_hex(parts.get(5).copied()).unwrap_or_else(Utc::now);
    let mut record = TelemetryRecord::new(device_key, Protocol::Tfms90, message_type, ts);
    record.latitude = opt_f64(parts, 6).and_then(validate_latitude);
    record.longitude = opt_f64(parts, 7).and_then(validate_longitude);
    record.speed = opt_f64(parts, 8);
    record.heading = opt_f64(parts, 9);

    let event_type = match message_type {
        "HA2" => "harsh_acceleration",
        "HB2" => "harsh_braking",
        _ => "harsh_cornering",
    };
    record.extra("event_type", event_type);
    if let Some(severity) = opt_f64(parts, 10) {
        record.extra("severity", severity);
    }

    Some(record)
}

/// Heartbeats carry no position; the timestamp is optional.
fn heartbeat(parts: &[&str], device_key: &str) -> TelemetryRecord {
    let ts = timestamp_hex(parts.get(5).copied()).unwrap_or_else(Utc::now);
    TelemetryRecord::new(device_key, Protocol::Tfms90, "HB", ts)
}

/// OS3 payload: battery voltage, ignition, fuel level, engine hours.
fn operating_status(parts: &[&str], device_key: &str) -> Option<TelemetryRecord> {
    if parts.len() < 6 {
        warn!(len = parts.len(), "OS3 frame too short");
        return None;
    }

    let ts = timestamp_hex(parts.get(5).copied()).unwrap_or_else(Utc::now);
    let mut record = TelemetryRecord::new(device_key, Protocol::Tfms90, "OS3", ts);

    if let Some(battery) = opt_f64(parts, 6) {
        record.extra("battery_voltage", battery);
    }
    record.ignition = opt_i64(parts, 7).map(|v| v != 0);
    record.fuel_level = opt_f64(parts, 8);
    if let Some(fuel) = record.fuel_level {
        record.extra("fuel_level", fuel);
    }
    if let Some(hours) = opt_f64(parts, 9) {
        record.extra("engine_hours", hours);
    }

    Some(record)
}

/// STAT frames carry a free list of numerics after the timestamp.
fn status_report(parts: &[&str], device_key: &str) -> TelemetryRecord {
    let ts = timestamp_hex(parts.get(5).copied()).unwrap_or_else(Utc::now);
    let mut record = TelemetryRecord::new(device_key, Protocol::Tfms90, "STAT", ts);
    for (i, field) in parts.iter().enumerate().skip(6) {
        if let Ok(v) = field.parse::<f64>() {
            record.extra(&format!("value_{}", i - 5), v);
        }
    }
    record
}

/// Decode hex seconds since the 2000-01-01 epoch into absolute UTC.
fn timestamp_hex(field: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = field?.trim();
    if raw.is_empty() {
        return None;
    }
    let secs = u64::from_str_radix(raw, 16).ok()?;
    DateTime::from_timestamp(TFMS90_EPOCH_UNIX_SECS + secs as i64, 0)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn opt_f64(parts: &[&str], idx: usize) -> Option<f64> {
    parts.get(idx).and_then(|s| s.parse().ok())
}

fn opt_i64(parts: &[&str], idx: usize) -> Option<i64> {
    parts.get(idx).and_then(|s| s.parse().ok())
}

fn opt_i32(parts: &[&str], idx: usize) -> Option<i32> {
    parts.get(idx).and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LOGIN: &[u8] = b"$,0,LG,867762040399039,2.0.1,89970000000000000000,#?";
    const TRACKING: &[u8] =
        b"$,0,TD,100,1,1A2B3C4D,13.067439,80.237617,45,270,12,1.2,45.5,123456,0F,03,0.0,12.8,22,#?";

    #[test]
    fn test_login_frame() {
        let mut codec = Tfms90Codec::new();
        let events = codec.feed(LOGIN);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Tfms90Event::Login(lg) => {
                assert_eq!(lg.imei, "867762040399039");
                assert_eq!(lg.firmware_version.as_deref(), Some("2.0.1"));
                assert_eq!(lg.sim_iccid.as_deref(), Some("89970000000000000000"));
            }
            other => panic!("expected login, got {other:?}"),
        }
    }

    #[test]
    fn test_tracking_data_ignition_on() {
        let mut codec = Tfms90Codec::new();
        let events = codec.feed(TRACKING);
        assert_eq!(events.len(), 1);
        let Tfms90Event::Data(frame) = &events[0] else {
            panic!("expected data frame");
        };

        assert_eq!(frame.message_type, "TD");
        assert_eq!(frame.device_field, "100");
        assert_eq!(frame.ack_token, "1");

        let r = &frame.record;
        assert_eq!(r.device_key, "TFMS90_100");
        assert_eq!(r.latitude, Some(13.067439));
        assert_eq!(r.longitude, Some(80.237617));
        assert_eq!(r.speed, Some(45.0));
        assert_eq!(r.heading, Some(270.0));
        assert_eq!(r.satellites, Some(12));
        assert_eq!(r.fuel_level, Some(45.5));
        assert_eq!(r.ignition, Some(true));
        assert_eq!(r.message_type, "TD");
        assert_eq!(r.protocol, Protocol::Tfms90);
        // Fuel shows up both top-level and in extras.
        assert_eq!(r.extras["fuel_level"], serde_json::json!(45.5));
        assert_eq!(r.extras["odometer"], serde_json::json!(123456.0));
        assert_eq!(r.extras["trip_number"], serde_json::json!("1"));
    }

    #[test]
    fn test_tracking_data_ignition_off() {
        let frame = TRACKING.to_vec();
        let frame = String::from_utf8(frame).unwrap().replace(",0F,", ",0E,");
        let mut codec = Tfms90Codec::new();
        let events = codec.feed(frame.as_bytes());
        let Tfms90Event::Data(frame) = &events[0] else {
            panic!("expected data frame");
        };
        assert_eq!(frame.record.ignition, Some(false));
    }

    #[test]
    fn test_invalid_status_flags_leave_ignition_unknown() {
        let frame = String::from_utf8(TRACKING.to_vec())
            .unwrap()
            .replace(",0F,", ",ZZ,");
        let mut codec = Tfms90Codec::new();
        let events = codec.feed(frame.as_bytes());
        let Tfms90Event::Data(frame) = &events[0] else {
            panic!("expected data frame");
        };
        assert_eq!(frame.record.ignition, None);
    }

    #[test]
    fn test_timestamp_epoch() {
        // Hex seconds since 2000-01-01T00:00:00Z.
        assert_eq!(
            timestamp_hex(Some("0")),
            Some(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap())
        );
        let ts = timestamp_hex(Some("1A2B3C4D")).unwrap();
        assert_eq!(
            ts,
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::seconds(0x1A2B3C4D)
        );
        assert_eq!(timestamp_hex(Some("XYZ")), None);
        assert_eq!(timestamp_hex(None), None);
    }

    #[test]
    fn test_out_of_range_coordinates_become_null() {
        let frame = String::from_utf8(TRACKING.to_vec())
            .unwrap()
            .replace("13.067439", "95.5")
            .replace("80.237617", "-190.0");
        let mut codec = Tfms90Codec::new();
        let events = codec.feed(frame.as_bytes());
        let Tfms90Event::Data(frame) = &events[0] else {
            panic!("expected data frame");
        };
        // Record survives with null coordinates.
        assert_eq!(frame.record.latitude, None);
        assert_eq!(frame.record.longitude, None);
        assert_eq!(frame.record.speed, Some(45.0));
    }

    #[test]
    fn test_fragmented_frame() {
        let mut codec = Tfms90Codec::new();
        assert!(codec.feed(&TRACKING[..10]).is_empty());
        let events = codec.feed(&TRACKING[10..]);
        assert_eq!(events.len(), 1);

        let mut whole = Tfms90Codec::new();
        assert_eq!(events, whole.feed(TRACKING));
    }

    #[test]
    fn test_split_at_every_byte_is_equivalent() {
        let mut stream = Vec::new();
        stream.extend_from_slice(TRACKING);
        stream.extend_from_slice(b"\r\n");
        stream.extend_from_slice(
            b"$,0,TE,100,2,1A2B3C00,13.0,80.2,1A2B0000,1A2B3C00,15437,12.5,50.0,45.5,13.1,80.3,#?",
        );

        let mut whole = Tfms90Codec::new();
        let expected = whole.feed(&stream);
        assert_eq!(expected.len(), 2);

        for split in 0..=stream.len() {
            let mut codec = Tfms90Codec::new();
            let mut events = codec.feed(&stream[..split]);
            events.extend(codec.feed(&stream[split..]));
            assert_eq!(events, expected, "split at {split}");
        }
    }

    #[test]
    fn test_concatenated_frames_and_garbage() {
        let mut stream = Vec::from(&b"NOISE"[..]);
        stream.extend_from_slice(TRACKING);
        stream.extend_from_slice(b"garbage$,0,HB,100,3,1A2B3C4D,#?\n");
        let mut codec = Tfms90Codec::new();
        let events = codec.feed(&stream);
        assert_eq!(events.len(), 2);
        let Tfms90Event::Data(hb) = &events[1] else {
            panic!("expected data frame");
        };
        assert_eq!(hb.message_type, "HB");
        assert_eq!(hb.record.latitude, None);
        assert_eq!(hb.record.longitude, None);
    }

    #[test]
    fn test_trip_end_promotion() {
        let frame =
            b"$,0,TE,100,2,1A2B3C4D,13.067439,80.237617,1A2B0000,1A2B3C4D,15437,12.5,50.0,45.5,13.06,80.23,#?";
        let mut codec = Tfms90Codec::new();
        let events = codec.feed(frame);
        let Tfms90Event::Data(frame) = &events[0] else {
            panic!("expected data frame");
        };
        let trip = frame.record.trip.as_ref().expect("trip summary promoted");
        assert_eq!(trip.start_timestamp, timestamp_hex(Some("1A2B0000")));
        assert_eq!(trip.end_timestamp, timestamp_hex(Some("1A2B3C4D")));
        assert_eq!(trip.duration_seconds, Some(15437));
        assert_eq!(trip.distance_km, Some(12.5));
        assert_eq!(trip.start_fuel, Some(50.0));
        assert_eq!(trip.end_fuel, Some(45.5));
        assert_eq!(trip.start_latitude, Some(13.06));
        assert_eq!(trip.start_longitude, Some(80.23));
        // Promoted attributes are not duplicated into extras.
        assert!(!frame.record.extras.contains_key("start_fuel"));
    }

    #[test]
    fn test_fuel_fill_extras() {
        let frame = b"$,0,FLF,100,2,1A2B3C4D,13.0,80.2,40.0,70.0,30.0,#?";
        let mut codec = Tfms90Codec::new();
        let events = codec.feed(frame);
        let Tfms90Event::Data(frame) = &events[0] else {
            panic!("expected data frame");
        };
        assert_eq!(frame.record.extras["event_type"], serde_json::json!("fuel_fill"));
        assert_eq!(frame.record.extras["fuel_before"], serde_json::json!(40.0));
        assert_eq!(frame.record.extras["fuel_after"], serde_json::json!(70.0));
        assert_eq!(frame.record.extras["amount"], serde_json::json!(30.0));
        assert_eq!(frame.record.fuel_level, Some(70.0));
    }

    #[test]
    fn test_harsh_braking() {
        let frame = b"$,0,HB2,100,2,1A2B3C4D,13.0,80.2,72,140,8.5,#?";
        let mut codec = Tfms90Codec::new();
        let events = codec.feed(frame);
        let Tfms90Event::Data(frame) = &events[0] else {
            panic!("expected data frame");
        };
        assert_eq!(frame.record.extras["event_type"], serde_json::json!("harsh_braking"));
        assert_eq!(frame.record.extras["severity"], serde_json::json!(8.5));
        assert_eq!(frame.record.speed, Some(72.0));
    }

    #[test]
    fn test_unknown_type_stored_with_empty_telemetry() {
        let frame = b"$,0,GEO,100,2,1A2B3C4D,some,payload,#?";
        let mut codec = Tfms90Codec::new();
        let events = codec.feed(frame);
        assert_eq!(events.len(), 1);
        let Tfms90Event::Data(frame) = &events[0] else {
            panic!("expected data frame");
        };
        assert_eq!(frame.message_type, "GEO");
        assert_eq!(frame.record.latitude, None);
        assert_eq!(frame.record.longitude, None);
        assert!(frame.record.extras.get("payload").is_none());
    }

    #[test]
    fn test_malformed_frame_produces_nothing() {
        let mut codec = Tfms90Codec::new();
        // Too few fields.
        assert!(codec.feed(b"$,0,TD,#?").is_empty());
        // Next valid frame still parses.
        assert_eq!(codec.feed(TRACKING).len(), 1);
    }

    #[test]
    fn test_ack_formats() {
        assert_eq!(login_ack(100), b"$,0,ACK,100,#?".to_vec());
        assert_eq!(data_ack("1", "100", 1), b"$,1,ACK,100,1,#?".to_vec());
        assert_eq!(data_ack("0", "235", 1), b"$,0,ACK,235,1,#?".to_vec());
    }
}
