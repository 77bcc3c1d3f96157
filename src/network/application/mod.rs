//! # Application Layer Network Protocols
//!
//! Protocols that run on top of a [`Connection`](crate::network::Connection).
//!
//! - **[`mqtt`]**: MQTT 3.1.1 client for lightweight publish-subscribe messaging
//!
//! Protocol clients never dial. They are handed an established connection,
//! so the same code runs over TCP, TLS or an in-memory pipe.

/// MQTT client implementation.
///
/// Provides an MQTT 3.1.1 session over any async byte stream, with
/// heartbeats, acknowledgment deadlines and a request/response surface.
pub mod mqtt;
