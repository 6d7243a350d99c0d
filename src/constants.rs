// Shared constants for the ingestion core
// Wire epochs, state-machine timeouts, and buffer bounds

/// TFMS90 timestamps count seconds from 2000-01-01T00:00:00Z.
pub const TFMS90_EPOCH_UNIX_SECS: i64 = 946_684_800;

/// First short device id handed out per protocol.
pub const FIRST_SHORT_ID: i32 = 100;

/// Router reads at most this many bytes before deciding a protocol.
pub const ROUTER_PEEK_BYTES: usize = 64;

/// Router peek deadline (s).
pub const ROUTER_PEEK_TIMEOUT_SECS: u64 = 5;

/// Identification handshake deadline (s): LG frame or IMEI greeting.
pub const IDENTIFY_TIMEOUT_SECS: u64 = 10;

/// Idle read timeout for TFMS90 connections (s).
pub const IDLE_TIMEOUT_TFMS90_SECS: u64 = 180;

/// Idle read timeout for Teltonika connections (s). Wider: devices go
/// silent between AVL batches.
pub const IDLE_TIMEOUT_TELTONIKA_SECS: u64 = 600;

/// Per-operation deadline on store gateway calls (s).
pub const STORE_CALL_TIMEOUT_SECS: u64 = 5;

/// Minimum interval between last-seen updates per connection (s).
pub const TOUCH_COALESCE_SECS: u64 = 10;

/// Bounded per-connection insert queue; records beyond this are dropped
/// and counted rather than stalling the ack stream.
pub const INSERT_QUEUE_DEPTH: usize = 64;

/// Graceful shutdown drain budget (s).
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 15;

/// Socket read chunk size.
pub const READ_CHUNK_BYTES: usize = 4096;

/// A TFMS90 frame longer than this without a terminator is garbage;
/// the buffer is resynced to the next '$'.
pub const MAX_TFMS90_FRAME_BYTES: usize = 2048;

/// Upper bound on the Teltonika AVL data-field length. Real devices stay
/// under 1280 bytes; anything larger means a desynced stream.
pub const MAX_AVL_DATA_BYTES: usize = 8192;

/// IMEI length accepted by the router and the Teltonika greeting.
pub const IMEI_LEN: usize = 15;

/// Malformed input is logged with at most this many bytes of hex sample.
pub const LOG_SAMPLE_BYTES: usize = 64;
