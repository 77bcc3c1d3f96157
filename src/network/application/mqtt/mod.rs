//! MQTT 3.1.1 protocol implementation.
//!
//! # Protocol Overview
//!
//! MQTT uses a publish-subscribe pattern where:
//! - **Publishers** send messages to topics
//! - **Subscribers** receive messages from topics they're interested in
//! - **Brokers** route messages between publishers and subscribers
//!
//! # Layout
//!
//! - [`packet`]: encoding, decoding and framing of control packets
//! - [`ack`]: acknowledgments awaited under a deadline
//! - [`stream`]: the connection actor serializing all I/O
//! - [`client`]: the session coordinator and its [`Client`] handle
//! - [`message`]: requests in, responses out
//! - [`options`]: configuration
//!
//! # Usage
//!
//! ```rust,no_run
//! use libmqtt::network::application::mqtt::{Client, Options, Request, Stream};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), libmqtt::network::error::Error> {
//! let socket = tokio::net::TcpStream::connect("localhost:1883").await?;
//! let stream = Stream::with_read_deadline(socket, std::time::Duration::from_secs(5));
//! let mut client = Client::start(stream, Options::default(), CancellationToken::new());
//!
//! client.send(Request::subscribe("commands/+")).await?;
//! while let Some(response) = client.recv().await {
//!     println!("{} {}", response.topic, response.message);
//! }
//! # Ok(())
//! # }
//! ```

/// Acknowledgment tracking with cancellable deadlines.
pub mod ack;

/// Session coordinator.
pub mod client;

/// Caller-facing requests and responses.
pub mod message;

/// Session configuration.
pub mod options;

/// Control packet codec.
pub mod packet;

/// Connection actor.
pub mod stream;

pub use client::{Client, Phase};
pub use message::{NOTICE_TOPIC, Request, RequestKind, Response, ResponseKind};
pub use options::Options;
pub use packet::{ConnackCode, ControlPacket, FrameCodec};
pub use stream::{Operation, Operations, Stream};
