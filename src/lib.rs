//! # libmqtt - async MQTT 3.1.1 client
//!
//! A small MQTT client for tokio. It establishes a session with a broker over
//! any async byte stream, keeps it alive with periodic pings, tracks the
//! acknowledgments it expects with per-ack deadlines, and turns everything
//! the broker sends into a stream of responses for the caller.
//!
//! ## Features
//!
//! ### Protocol
//! - CONNECT/CONNACK handshake, SUBSCRIBE/SUBACK, PUBLISH (QoS 0), PINGREQ/PINGRESP, DISCONNECT
//! - Frame decoder for the variable-length remaining-length field
//! - Random packet identifiers, unique among in-flight subscribes
//!
//! ### Session
//! - Single-owner connection actor; all I/O is serialized through it
//! - Ack tracker with cancellable countdowns, no timer outlives its ack
//! - One idempotent teardown for I/O failures, ack expiry, interrupts and disconnects
//!
//! ## Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! libmqtt = "0.1.0"
//! ```
//!
//! ### Subscribing and publishing
//!
//! ```rust,no_run
//! use libmqtt::network::Tcp;
//! use libmqtt::network::application::mqtt::{Client, Options, Request};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), libmqtt::network::error::Error> {
//! let options = Options {
//!     client_id: "my_device".into(),
//!     ..Options::from_env()
//! };
//! let mut client = Client::dial(&mut Tcp::default(), options, CancellationToken::new()).await?;
//!
//! client.send(Request::subscribe("sensors/temperature")).await?;
//! client.send(Request::publish("sensors/temperature", "23.5")).await?;
//!
//! while let Some(response) = client.recv().await {
//!     if response.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Transports
//!
//! The session runs over anything implementing
//! [`Connection`](network::Connection): a TCP socket, a TLS stream, or an
//! in-memory duplex in tests. Dialing is left to a [`Connect`](network::Connect)
//! implementation such as [`Tcp`](network::Tcp).

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

/// Network abstraction layer: transport traits, errors and the MQTT session.
pub mod network;
