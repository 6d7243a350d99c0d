// Protocol router
// Peeks the first bytes of a new connection to choose a codec

use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use super::connection::Connection;
use crate::constants::{IMEI_LEN, LOG_SAMPLE_BYTES, READ_CHUNK_BYTES, ROUTER_PEEK_BYTES};
use crate::error::SessionError;
use crate::telemetry::Protocol;

/// Outcome of classifying a peek buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Tfms90,
    Teltonika,
    /// Not enough bytes yet to tell.
    Undecided,
    /// The bytes cannot belong to either protocol.
    Refused,
}

/// Classify the first bytes of a connection.
///
/// A leading '$' (optionally preceded by CR/LF) selects TFMS90. A
/// two-byte big-endian length of 15 followed by 15 ASCII digits selects
/// Teltonika. Anything else is refused.
pub fn classify(peek: &[u8]) -> RouteDecision {
    let mut bytes = peek;
    while let [b'\r' | b'\n', rest @ ..] = bytes {
        bytes = rest;
    }

    let Some(&first) = bytes.first() else {
        return RouteDecision::Undecided;
    };
    if first == b'$' {
        return RouteDecision::Tfms90;
    }

    if bytes.len() < 2 {
        return RouteDecision::Undecided;
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    if len != IMEI_LEN {
        return RouteDecision::Refused;
    }
    if bytes.len() < 2 + len {
        return RouteDecision::Undecided;
    }
    if bytes[2..2 + len].iter().all(|b| b.is_ascii_digit()) {
        RouteDecision::Teltonika
    } else {
        RouteDecision::Refused
    }
}

/// Run the router against a fresh connection within `deadline`.
///
/// On success the peek buffer is returned alongside the protocol and
/// MUST be fed to the selected codec; the bytes are never discarded.
pub async fn route(
    conn: &mut Connection,
    deadline: Duration,
) -> Result<(Protocol, Vec<u8>), SessionError> {
    let start = Instant::now();
    let mut peek: Vec<u8> = Vec::with_capacity(ROUTER_PEEK_BYTES);
    let mut buf = [0u8; READ_CHUNK_BYTES];

    loop {
        match classify(&peek) {
            RouteDecision::Tfms90 => {
                debug!("routed to tfms90");
                return Ok((Protocol::Tfms90, peek));
            }
            RouteDecision::Teltonika => {
                debug!("routed to teltonika");
                return Ok((Protocol::Teltonika, peek));
            }
            RouteDecision::Refused => {
                warn!(
                    sample = %hex::encode(&peek[..peek.len().min(LOG_SAMPLE_BYTES)]),
                    "neither protocol matched"
                );
                return Err(SessionError::RouterRefused);
            }
            RouteDecision::Undecided => {}
        }
        if peek.len() >= ROUTER_PEEK_BYTES {
            warn!(len = peek.len(), "peek budget exhausted without a match");
            return Err(SessionError::RouterRefused);
        }

        let Some(remaining) = deadline.checked_sub(start.elapsed()) else {
            return Err(SessionError::RouterRefused);
        };
        match time::timeout(remaining, conn.read_chunk(&mut buf)).await {
            Ok(Ok(0)) => return Err(SessionError::RouterRefused),
            Ok(Ok(n)) => peek.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(SessionError::RouterRefused),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dollar_selects_tfms90() {
        assert_eq!(classify(b"$,0,LG,867762040399039,"), RouteDecision::Tfms90);
        assert_eq!(classify(b"$"), RouteDecision::Tfms90);
    }

    #[test]
    fn test_leading_newlines_tolerated() {
        assert_eq!(classify(b"\r\n$,0,TD,"), RouteDecision::Tfms90);
        assert_eq!(classify(b"\n$"), RouteDecision::Tfms90);
    }

    #[test]
    fn test_imei_greeting_selects_teltonika() {
        let mut peek = vec![0x00, 0x0F];
        peek.extend_from_slice(b"867762040399039");
        assert_eq!(classify(&peek), RouteDecision::Teltonika);
    }

    #[test]
    fn test_partial_greeting_is_undecided() {
        assert_eq!(classify(&[]), RouteDecision::Undecided);
        assert_eq!(classify(&[0x00]), RouteDecision::Undecided);
        let mut peek = vec![0x00, 0x0F];
        peek.extend_from_slice(b"8677620403");
        assert_eq!(classify(&peek), RouteDecision::Undecided);
    }

    #[test]
    fn test_garbage_is_refused() {
        assert_eq!(classify(b"GET / HTTP/1.1\r\n"), RouteDecision::Refused);
        // Right length prefix but non-digit payload.
        let mut peek = vec![0x00, 0x0F];
        peek.extend_from_slice(b"86776204039903X");
        assert_eq!(classify(&peek), RouteDecision::Refused);
        // Wrong length prefix.
        assert_eq!(classify(&[0x12, 0x34, 0x00]), RouteDecision::Refused);
    }
}
