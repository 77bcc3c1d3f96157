//! Common error types for network operations

use thiserror::Error;

use crate::network::application::mqtt::packet::ConnackCode;

/// A common error type for the MQTT session and its connection.
///
/// Only [`Error::ReadTimeout`] is transient: the connection actor absorbs it
/// and the caller never sees it. Every other variant is fatal and ends the
/// session with a terminal response carrying it.
#[derive(Debug, Error)]
pub enum Error {
    /// A read deadline elapsed before any data arrived.
    #[error("read timeout")]
    ReadTimeout,
    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
    /// A packet of an unexpected type was received.
    #[error("{0} unexpected packet")]
    BadPacket(String),
    /// The broker refused the connection.
    #[error("{0} bad return code")]
    BadReturnCode(ConnackCode),
    /// No CONNACK arrived within the read deadline.
    #[error("no connack within the read deadline")]
    HandshakeTimeout,
    /// An expected acknowledgment was not observed before its deadline.
    #[error("{pattern} ack ttl expired")]
    AckExpired {
        /// Hex rendering of the pattern that never arrived.
        pattern: String,
    },
    /// An acknowledgment with the same pattern is already being awaited.
    #[error("{pattern} ack already pending")]
    AckPending {
        /// Hex rendering of the duplicated pattern.
        pattern: String,
    },
    /// The externally supplied interrupt fired.
    #[error("interrupt signal")]
    Interrupted,
    /// A packet could not be decoded.
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    /// A packet exceeds what the wire format or the configuration allows.
    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),
    /// Any other I/O error reported by the transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error is absorbed where it occurs instead of ending the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ReadTimeout)
    }

    /// Whether the error means the transport is already gone.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Render bytes as lowercase hex, the way patterns appear in errors and logs.
pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}
