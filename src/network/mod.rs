//! A network abstraction layer for the MQTT session.
//!
//! The session never dials. It is handed an established [`Connection`]: any
//! async byte stream. [`Connect`] is the optional factory for producing one,
//! with [`Tcp`] as the default implementation.

#![allow(async_fn_in_trait)]

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Common error types for network operations
pub mod error;

/// Application layer protocols
pub mod application;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Connect, Connection};
}

/// A bidirectional async byte stream the session can own.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// An async connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Open a connection to `remote`
    async fn connect(&mut self, remote: &str) -> Result<Self::Connection, error::Error>;
}

/// Plain TCP connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tcp {
    /// Disable Nagle's algorithm on the new socket.
    pub nodelay: bool,
}

impl Connect for Tcp {
    type Connection = TcpStream;

    async fn connect(&mut self, remote: &str) -> Result<TcpStream, error::Error> {
        let stream = TcpStream::connect(remote).await?;
        stream.set_nodelay(self.nodelay)?;
        debug!(%remote, nodelay = self.nodelay, "tcp connection established");
        Ok(stream)
    }
}
