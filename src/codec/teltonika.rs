// Teltonika Codec 8 / 8E binary protocol codec
// IMEI greeting, then AVL packets with CRC16/IBM trailers

use chrono::DateTime;
use tracing::{debug, warn};

use crate::constants::{LOG_SAMPLE_BYTES, MAX_AVL_DATA_BYTES};
use crate::error::CodecError;
use crate::telemetry::{validate_latitude, validate_longitude, Protocol, TelemetryRecord};

/// Message type tag stored for AVL records; downstream consumers key on
/// this literal.
pub const MESSAGE_TYPE_AVL: &str = "codec_0x8";

/// Single-byte greeting ack: IMEI accepted.
pub const GREETING_ACCEPT: [u8; 1] = [0x01];
/// Single-byte greeting ack: IMEI rejected, connection closes.
pub const GREETING_REJECT: [u8; 1] = [0x00];

const CODEC_8: u8 = 0x08;
const CODEC_8E: u8 = 0x8E;

#[derive(Debug, PartialEq)]
pub enum TeltonikaEvent {
    /// IMEI greeting parsed; the session decides acceptance.
    Greeting { imei: String },
    /// A batch that passed CRC and structure checks, with its ack.
    Batch {
        records: Vec<TelemetryRecord>,
        ack: [u8; 4],
    },
    /// A batch rejected at packet level. The zero ack tells the device
    /// to resend; the connection stays open.
    Rejected { ack: [u8; 4], reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitGreeting,
    AwaitPacket,
}

/// Incremental parser over a Teltonika byte stream.
#[derive(Debug)]
pub struct TeltonikaCodec {
    buf: Vec<u8>,
    state: State,
    imei: Option<String>,
}

impl Default for TeltonikaCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TeltonikaCodec {
    pub fn new() -> Self {
        TeltonikaCodec {
            buf: Vec::new(),
            state: State::AwaitGreeting,
            imei: None,
        }
    }

    /// Feed freshly read bytes.
    ///
    /// `Err` means the byte stream cannot be re-framed (bad greeting,
    /// broken preamble, absurd length); the caller closes the
    /// connection. Batch-level failures come back as
    /// [`TeltonikaEvent::Rejected`] and are not fatal.
    pub fn feed(&mut self, input: &[u8]) -> Result<Vec<TeltonikaEvent>, CodecError> {
        self.buf.extend_from_slice(input);
        let mut events = Vec::new();

        loop {
            match self.state {
                State::AwaitGreeting => {
                    if self.buf.len() < 2 {
                        break;
                    }
                    let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
                    if !(10..=20).contains(&len) {
                        return Err(CodecError::Malformed(format!(
                            "imei greeting length {len} out of range"
                        )));
                    }
                    if self.buf.len() < 2 + len {
                        break;
                    }
                    let imei_bytes = &self.buf[2..2 + len];
                    if !imei_bytes.iter().all(|b| b.is_ascii_digit()) {
                        return Err(CodecError::Malformed(
                            "imei greeting is not numeric".into(),
                        ));
                    }
                    let imei = String::from_utf8_lossy(imei_bytes).into_owned();
                    self.buf.drain(..2 + len);
                    self.imei = Some(imei.clone());
                    self.state = State::AwaitPacket;
                    events.push(TeltonikaEvent::Greeting { imei });
                }
                State::AwaitPacket => {
                    if self.buf.len() < 8 {
                        break;
                    }
                    let preamble = u32::from_be_bytes([
                        self.buf[0],
                        self.buf[1],
                        self.buf[2],
                        self.buf[3],
                    ]);
                    if preamble != 0 {
                        return Err(CodecError::Malformed(format!(
                            "nonzero preamble {preamble:#010x}"
                        )));
                    }
                    let data_len = u32::from_be_bytes([
                        self.buf[4],
                        self.buf[5],
                        self.buf[6],
                        self.buf[7],
                    ]) as usize;
                    if data_len < 3 || data_len > MAX_AVL_DATA_BYTES {
                        return Err(CodecError::Malformed(format!(
                            "avl data length {data_len} out of range"
                        )));
                    }
                    let total = 8 + data_len + 4;
                    if self.buf.len() < total {
                        break;
                    }

                    let event = self.parse_packet(data_len);
                    self.buf.drain(..total);
                    events.push(event);
                }
            }
        }

        Ok(events)
    }

    fn parse_packet(&self, data_len: usize) -> TeltonikaEvent {
        let data = &self.buf[8..8 + data_len];
        let received = u32::from_be_bytes([
            self.buf[8 + data_len],
            self.buf[8 + data_len + 1],
            self.buf[8 + data_len + 2],
            self.buf[8 + data_len + 3],
        ]);
        let computed = crc16_ibm(data);
        if received != u32::from(computed) {
            let reason = CodecError::CrcMismatch { computed, received };
            warn!(%reason, sample = %hex::encode(&data[..data.len().min(LOG_SAMPLE_BYTES)]), "rejecting avl batch");
            return TeltonikaEvent::Rejected {
                ack: batch_ack(0),
                reason: reason.to_string(),
            };
        }

        let device_key = self.imei.clone().unwrap_or_default();
        match parse_data_field(data, &device_key) {
            Ok(records) => {
                let ack = batch_ack(records.len() as u32);
                debug!(count = records.len(), "parsed avl batch");
                TeltonikaEvent::Batch { records, ack }
            }
            Err(reason) => {
                warn!(%reason, "rejecting avl batch");
                TeltonikaEvent::Rejected {
                    ack: batch_ack(0),
                    reason: reason.to_string(),
                }
            }
        }
    }
}

/// Four-byte ack carrying the accepted record count, big-endian.
pub fn batch_ack(count: u32) -> [u8; 4] {
    count.to_be_bytes()
}

/// CRC16/IBM (ARC): polynomial 0xA001 reflected, initial value 0.
pub fn crc16_ibm(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn parse_data_field(data: &[u8], device_key: &str) -> Result<Vec<TelemetryRecord>, CodecError> {
    let mut r = Reader::new(data);
    let codec_id = r.u8()?;
    if codec_id != CODEC_8 && codec_id != CODEC_8E {
        return Err(CodecError::UnsupportedCodec(codec_id));
    }
    let count = r.u8()?;

    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        records.push(parse_record(&mut r, codec_id, device_key)?);
    }

    let trailer = r.u8()?;
    if trailer != count {
        return Err(CodecError::CountMismatch {
            header: count,
            trailer,
        });
    }
    if r.remaining() != 0 {
        return Err(CodecError::Malformed(format!(
            "{} trailing bytes after records",
            r.remaining()
        )));
    }

    Ok(records)
}

fn parse_record(
    r: &mut Reader<'_>,
    codec_id: u8,
    device_key: &str,
) -> Result<TelemetryRecord, CodecError> {
    let ts_ms = r.u64()?;
    let timestamp = DateTime::from_timestamp_millis(ts_ms as i64)
        .ok_or_else(|| CodecError::Malformed(format!("timestamp {ts_ms} out of range")))?;
    let _priority = r.u8()?;

    // GPS element: longitude precedes latitude on the wire.
    let longitude = f64::from(r.i32()?) / 10_000_000.0;
    let latitude = f64::from(r.i32()?) / 10_000_000.0;
    let altitude = r.i16()?;
    let angle = r.u16()?;
    let satellites = r.u8()?;
    let speed = r.u16()?;

    let mut record =
        TelemetryRecord::new(device_key, Protocol::Teltonika, MESSAGE_TYPE_AVL, timestamp);
    record.latitude = validate_latitude(latitude);
    record.longitude = validate_longitude(longitude);
    record.altitude = Some(f64::from(altitude));
    record.heading = if angle <= 360 { Some(f64::from(angle)) } else { None };
    record.satellites = Some(i32::from(satellites));
    record.speed = Some(f64::from(speed));

    let wide = codec_id == CODEC_8E;
    let event_id = if wide { r.u16()? } else { u16::from(r.u8()?) };
    record.extra("event_io_id", event_id);
    let _total_io = if wide { r.u16()? } else { u16::from(r.u8()?) };

    for value_size in [1usize, 2, 4, 8] {
        let group_count = if wide { r.u16()? } else { u16::from(r.u8()?) };
        for _ in 0..group_count {
            let id = if wide { r.u16()? } else { u16::from(r.u8()?) };
            let value = match value_size {
                1 => u64::from(r.u8()?),
                2 => u64::from(r.u16()?),
                4 => u64::from(r.u32()?),
                _ => r.u64()?,
            };
            apply_io(&mut record, id, value);
        }
    }

    // Codec 8E adds a variable-length group.
    if wide {
        let group_count = r.u16()?;
        for _ in 0..group_count {
            let id = r.u16()?;
            let len = r.u16()? as usize;
            let raw = r.take(len)?;
            record.extra(&format!("io_{id}_var"), hex::encode(raw));
        }
    }

    Ok(record)
}

/// Fixed mapping of well-known IO ids to named attributes; everything
/// else lands in extras as `io_<id>`.
fn apply_io(record: &mut TelemetryRecord, id: u16, value: u64) {
    match id {
        239 => record.ignition = Some(value != 0),
        240 => record.extra("movement", value != 0),
        70 => {
            record.fuel_level = Some(value as f64);
            record.extra("fuel_level", value as f64);
        }
        16 => record.extra("odometer_km", value as f64 / 1000.0),
        66 => record.extra("external_voltage", value as f64 / 1000.0),
        67 => record.extra("battery_voltage", value as f64 / 1000.0),
        15 => record.extra("engine_hours", value as f64 / 3600.0),
        other => record.extra(&format!("io_{other}"), value),
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn i16(&mut self) -> Result<i16, CodecError> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMEI: &str = "867762040399039";

    fn greeting(imei: &str) -> Vec<u8> {
        let mut out = (imei.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(imei.as_bytes());
        out
    }

    /// Encode one codec 8E record with a couple of known IO elements.
    fn record_8e(ts_ms: u64, lat: f64, lon: f64, speed: u16, angle: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ts_ms.to_be_bytes());
        out.push(0); // priority
        out.extend_from_slice(&(((lon * 1e7) as i32).to_be_bytes()));
        out.extend_from_slice(&(((lat * 1e7) as i32).to_be_bytes()));
        out.extend_from_slice(&12i16.to_be_bytes()); // altitude
        out.extend_from_slice(&angle.to_be_bytes());
        out.push(9); // satellites
        out.extend_from_slice(&speed.to_be_bytes());
        // Event id, total count, then the four fixed-size groups.
        out.extend_from_slice(&239u16.to_be_bytes());
        out.extend_from_slice(&2u16.to_be_bytes());
        out.extend_from_slice(&2u16.to_be_bytes()); // two 1-byte elements
        out.extend_from_slice(&239u16.to_be_bytes());
        out.push(1); // ignition on
        out.extend_from_slice(&70u16.to_be_bytes());
        out.push(60); // fuel level
        out.extend_from_slice(&0u16.to_be_bytes()); // no 2-byte elements
        out.extend_from_slice(&0u16.to_be_bytes()); // no 4-byte elements
        out.extend_from_slice(&0u16.to_be_bytes()); // no 8-byte elements
        out.extend_from_slice(&0u16.to_be_bytes()); // no variable elements
        out
    }

    fn packet(codec_id: u8, records: &[Vec<u8>]) -> Vec<u8> {
        let mut data = vec![codec_id, records.len() as u8];
        for r in records {
            data.extend_from_slice(r);
        }
        data.push(records.len() as u8);

        let mut out = vec![0, 0, 0, 0];
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(&data);
        out.extend_from_slice(&u32::from(crc16_ibm(&data)).to_be_bytes());
        out
    }

    #[test]
    fn test_crc16_check_value() {
        // CRC-16/ARC check value for "123456789".
        assert_eq!(crc16_ibm(b"123456789"), 0xBB3D);
        assert_eq!(crc16_ibm(b""), 0x0000);
    }

    #[test]
    fn test_greeting() {
        let mut codec = TeltonikaCodec::new();
        let events = codec.feed(&greeting(IMEI)).unwrap();
        assert_eq!(
            events,
            vec![TeltonikaEvent::Greeting { imei: IMEI.into() }]
        );
    }

    #[test]
    fn test_greeting_rejects_non_numeric() {
        let mut codec = TeltonikaCodec::new();
        assert!(codec.feed(&greeting("86776204039903X")).is_err());
    }

    #[test]
    fn test_single_record_batch() {
        let mut codec = TeltonikaCodec::new();
        codec.feed(&greeting(IMEI)).unwrap();

        let pkt = packet(0x8E, &[record_8e(1_700_000_000_000, 25.180430, 51.414085, 87, 180)]);
        let events = codec.feed(&pkt).unwrap();
        assert_eq!(events.len(), 1);
        let TeltonikaEvent::Batch { records, ack } = &events[0] else {
            panic!("expected batch, got {:?}", events[0]);
        };

        assert_eq!(*ack, [0, 0, 0, 1]);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.device_key, IMEI);
        assert_eq!(r.protocol, Protocol::Teltonika);
        assert_eq!(r.message_type, MESSAGE_TYPE_AVL);
        assert!((r.latitude.unwrap() - 25.180430).abs() < 1e-6);
        assert!((r.longitude.unwrap() - 51.414085).abs() < 1e-6);
        assert_eq!(r.speed, Some(87.0));
        assert_eq!(r.heading, Some(180.0));
        assert_eq!(r.satellites, Some(9));
        assert_eq!(r.ignition, Some(true));
        assert_eq!(r.fuel_level, Some(60.0));
        assert_eq!(
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            r.timestamp
        );
    }

    #[test]
    fn test_bad_crc_rejects_batch_and_keeps_stream() {
        let mut codec = TeltonikaCodec::new();
        codec.feed(&greeting(IMEI)).unwrap();

        let mut pkt = packet(0x8E, &[record_8e(1_700_000_000_000, 25.18, 51.41, 10, 90)]);
        let last = pkt.len() - 1;
        pkt[last] ^= 0xFF;
        let events = codec.feed(&pkt).unwrap();
        assert_eq!(events.len(), 1);
        let TeltonikaEvent::Rejected { ack, .. } = &events[0] else {
            panic!("expected rejection");
        };
        assert_eq!(*ack, [0, 0, 0, 0]);

        // The stream stays usable: a correct packet still parses.
        let good = packet(0x8E, &[record_8e(1_700_000_100_000, 25.18, 51.41, 10, 90)]);
        let events = codec.feed(&good).unwrap();
        assert!(matches!(events[0], TeltonikaEvent::Batch { .. }));
    }

    #[test]
    fn test_record_count_mismatch_rejected() {
        let mut codec = TeltonikaCodec::new();
        codec.feed(&greeting(IMEI)).unwrap();

        // Build a packet whose trailing count disagrees, with valid CRC.
        let rec = record_8e(1_700_000_000_000, 25.18, 51.41, 10, 90);
        let mut data = vec![0x8E, 1];
        data.extend_from_slice(&rec);
        data.push(2); // wrong trailer
        let mut pkt = vec![0, 0, 0, 0];
        pkt.extend_from_slice(&(data.len() as u32).to_be_bytes());
        pkt.extend_from_slice(&data);
        pkt.extend_from_slice(&u32::from(crc16_ibm(&data)).to_be_bytes());

        let events = codec.feed(&pkt).unwrap();
        let TeltonikaEvent::Rejected { ack, .. } = &events[0] else {
            panic!("expected rejection");
        };
        assert_eq!(*ack, [0, 0, 0, 0]);
    }

    #[test]
    fn test_fragmented_packet() {
        let mut whole = TeltonikaCodec::new();
        let mut stream = greeting(IMEI);
        stream.extend_from_slice(&packet(
            0x8E,
            &[record_8e(1_700_000_000_000, 25.180430, 51.414085, 87, 180)],
        ));
        let expected = whole.feed(&stream).unwrap();
        assert_eq!(expected.len(), 2);

        for split in 0..=stream.len() {
            let mut codec = TeltonikaCodec::new();
            let mut events = codec.feed(&stream[..split]).unwrap();
            events.extend(codec.feed(&stream[split..]).unwrap());
            assert_eq!(events, expected, "split at {split}");
        }
    }

    #[test]
    fn test_codec8_narrow_layout() {
        let mut codec = TeltonikaCodec::new();
        codec.feed(&greeting(IMEI)).unwrap();

        // Codec 8: one-byte event id, counts and io ids; no variable group.
        let mut rec = Vec::new();
        rec.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
        rec.push(1); // priority
        rec.extend_from_slice(&514140850i32.to_be_bytes()); // lon
        rec.extend_from_slice(&251804300i32.to_be_bytes()); // lat
        rec.extend_from_slice(&30i16.to_be_bytes());
        rec.extend_from_slice(&90u16.to_be_bytes());
        rec.push(7);
        rec.extend_from_slice(&55u16.to_be_bytes());
        rec.push(239); // event id
        rec.push(1); // total io
        rec.push(1); // one 1-byte element
        rec.push(239);
        rec.push(0); // ignition off
        rec.push(0); // no 2-byte
        rec.push(0); // no 4-byte
        rec.push(0); // no 8-byte

        let pkt = packet(0x08, &[rec]);
        let events = codec.feed(&pkt).unwrap();
        let TeltonikaEvent::Batch { records, ack } = &events[0] else {
            panic!("expected batch");
        };
        assert_eq!(*ack, [0, 0, 0, 1]);
        assert_eq!(records[0].ignition, Some(false));
        assert_eq!(records[0].heading, Some(90.0));
        assert_eq!(records[0].message_type, MESSAGE_TYPE_AVL);
    }

    #[test]
    fn test_unknown_io_goes_to_extras() {
        let mut codec = TeltonikaCodec::new();
        codec.feed(&greeting(IMEI)).unwrap();

        let mut rec = record_8e(1_700_000_000_000, 25.18, 51.41, 0, 0);
        // Rewrite the fuel element id (70) to an unmapped id (199).
        let needle = 70u16.to_be_bytes();
        let pos = rec
            .windows(2)
            .position(|w| w == needle)
            .expect("fuel id present");
        rec[pos..pos + 2].copy_from_slice(&199u16.to_be_bytes());

        let pkt = packet(0x8E, &[rec]);
        let events = codec.feed(&pkt).unwrap();
        let TeltonikaEvent::Batch { records, .. } = &events[0] else {
            panic!("expected batch");
        };
        assert_eq!(records[0].fuel_level, None);
        assert_eq!(records[0].extras["io_199"], serde_json::json!(60));
    }

    #[test]
    fn test_nonzero_preamble_is_fatal() {
        let mut codec = TeltonikaCodec::new();
        codec.feed(&greeting(IMEI)).unwrap();
        assert!(codec.feed(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 3]).is_err());
    }
}
