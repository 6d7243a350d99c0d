// Error types for the ingestion core
// One enum per layer; only fatal-to-connection errors reach the session loop

use thiserror::Error;

/// Frame- or batch-level parse failures inside a codec.
///
/// None of these are fatal to the connection on their own: the TFMS90
/// parser resyncs to the next '$', and a Teltonika batch failure is
/// answered with a zero ack. A codec escalates to
/// [`SessionError::Desync`] only when the byte stream can no longer be
/// re-framed.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("crc mismatch: computed {computed:#06x}, received {received:#010x}")]
    CrcMismatch { computed: u16, received: u32 },

    #[error("record count mismatch: header {header}, trailer {trailer}")]
    CountMismatch { header: u8, trailer: u8 },

    #[error("unsupported codec id {0:#04x}")]
    UnsupportedCodec(u8),

    #[error("packet truncated inside a record")]
    Truncated,
}

/// Store gateway failures. Transport wraps the driver error; Timeout is
/// applied by callers around each gateway operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(#[from] sqlx::Error),

    #[error("store call timed out")]
    Timeout,

    #[error("store invariant violated: {0}")]
    Invariant(String),
}

/// Errors that terminate a device connection.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no protocol recognized within the peek budget")]
    RouterRefused,

    #[error("identification handshake timed out")]
    IdentifyTimeout,

    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("byte stream desynced: {0}")]
    Desync(CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
