//! The connection actor: the single owner of the byte stream.
//!
//! Every read and write goes through an [`Operation`] submitted on a shared
//! channel. The actor runs them one at a time, in the order they were
//! accepted, so no two operations ever touch the stream concurrently.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use super::packet::{ControlPacket, FrameCodec};
use crate::network::Connection;
use crate::network::error::{Error, Result};

/// Default bound on a single blocking read.
pub const READ_DEADLINE: Duration = Duration::from_secs(5);

/// An MQTT packet stream over a [`Connection`].
///
/// Whether reads are bounded by a deadline is decided once, when the stream
/// is constructed.
pub struct Stream {
    frames: Framed<Box<dyn Connection>, FrameCodec>,
    read_deadline: Option<Duration>,
}

impl Stream {
    /// Wrap a connection whose reads may block indefinitely.
    ///
    /// [`Stream::read_packet_or`] still bounds a read on such a stream.
    pub fn new<C: Connection>(connection: C) -> Self {
        Self {
            frames: Framed::new(Box::new(connection), FrameCodec::default()),
            read_deadline: None,
        }
    }

    /// Wrap a connection and bound every read by `deadline`.
    pub fn with_read_deadline<C: Connection>(connection: C, deadline: Duration) -> Self {
        Self {
            read_deadline: Some(deadline),
            ..Self::new(connection)
        }
    }

    /// Refuse inbound packets larger than `max` bytes.
    #[must_use]
    pub fn max_packet_size(mut self, max: usize) -> Self {
        *self.frames.codec_mut() = FrameCodec::new(max);
        self
    }

    /// The read deadline, if the stream has one.
    pub fn read_deadline(&self) -> Option<Duration> {
        self.read_deadline
    }

    /// Read the next complete packet.
    ///
    /// # Errors
    ///
    /// * [`Error::ReadTimeout`] - the deadline elapsed; no bytes were lost
    /// * [`Error::ConnectionClosed`] - the peer closed or reset the connection
    /// * any other transport or framing error
    pub async fn read_packet(&mut self) -> Result<Bytes> {
        self.read_within(self.read_deadline).await
    }

    /// Read the next complete packet, bounded by the stream's own deadline or,
    /// when the stream has none, by `fallback`.
    ///
    /// Operations that must hand the stream back to other work use this.
    ///
    /// # Errors
    ///
    /// As [`Stream::read_packet`].
    pub async fn read_packet_or(&mut self, fallback: Duration) -> Result<Bytes> {
        self.read_within(Some(self.read_deadline.unwrap_or(fallback)))
            .await
    }

    async fn read_within(&mut self, deadline: Option<Duration>) -> Result<Bytes> {
        let next = self.frames.next();
        let frame = match deadline {
            Some(deadline) => tokio::time::timeout(deadline, next)
                .await
                .map_err(|_| Error::ReadTimeout)?,
            None => next.await,
        };
        match frame {
            Some(Ok(packet)) => {
                debug!(packet = %ControlPacket::classify(&packet), len = packet.len(), "read");
                Ok(packet)
            }
            Some(Err(err)) => Err(closed_or(err)),
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Write one complete packet and flush it.
    pub async fn write_packet(&mut self, packet: Bytes) -> Result<()> {
        let kind = ControlPacket::classify(&packet);
        let len = packet.len();
        self.frames.send(packet).await.map_err(closed_or)?;
        debug!(packet = %kind, len, "written");
        Ok(())
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("read_deadline", &self.read_deadline)
            .field("buffered", &self.frames.read_buffer().len())
            .finish_non_exhaustive()
    }
}

/// Map transport errors that mean the peer is gone to [`Error::ConnectionClosed`].
fn closed_or(err: Error) -> Error {
    use std::io::ErrorKind;

    match err {
        Error::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ) =>
        {
            Error::ConnectionClosed
        }
        other => other,
    }
}

/// Future returned by an operation body.
pub type OpFuture<'a> = BoxFuture<'a, Result<()>>;

type OpFn = Box<dyn for<'a> FnOnce(&'a mut Stream) -> OpFuture<'a> + Send>;

/// A unit of exclusive access to the stream.
pub struct Operation {
    name: &'static str,
    body: OpFn,
}

impl Operation {
    /// Build an operation from a closure over the stream.
    ///
    /// ```rust,ignore
    /// let op = Operation::new("pingreq", |stream| {
    ///     Box::pin(async move { stream.write_packet(packet::encode_pingreq()).await })
    /// });
    /// ```
    pub fn new<F>(name: &'static str, body: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut Stream) -> OpFuture<'a> + Send + 'static,
    {
        Self {
            name,
            body: Box::new(body),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wrap the operation so the returned receiver resolves once it succeeds.
    ///
    /// If the operation fails, has no effect, or is never run, the sender is
    /// dropped and the receiver resolves to an error.
    pub fn with_release(self) -> (Self, oneshot::Receiver<()>) {
        let (release, released) = oneshot::channel();
        let Self { name, body } = self;
        let op = Self::new(name, move |stream| {
            Box::pin(async move {
                body(stream).await?;
                let _ = release.send(());
                Ok(())
            })
        });
        (op, released)
    }

    async fn run(self, stream: &mut Stream) -> Result<()> {
        (self.body)(stream).await
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").field("name", &self.name).finish()
    }
}

/// Submission side of the actor's operation channel.
#[derive(Debug, Clone)]
pub struct Operations {
    tx: mpsc::Sender<Operation>,
}

impl Operations {
    /// Hand `op` to the actor, waiting until it has room for it.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] once the actor has stopped.
    pub async fn submit(&self, op: Operation) -> Result<()> {
        self.tx.send(op).await.map_err(|_| Error::ConnectionClosed)
    }

    /// Submit `op` and wait until it has completed successfully.
    ///
    /// Returns `false` when the operation failed, had no effect, or the actor
    /// stopped before running it.
    pub async fn execute(&self, op: Operation) -> bool {
        let (op, released) = op.with_release();
        if self.submit(op).await.is_err() {
            return false;
        }
        released.await.is_ok()
    }

    /// Whether the actor has stopped accepting operations.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Start the connection actor on `stream`.
///
/// The actor stops on the first fatal operation error, which it forwards on
/// `fatal`, or once every [`Operations`] handle has been dropped. The stream
/// is closed when the actor exits.
pub fn spawn(stream: Stream, fatal: mpsc::UnboundedSender<Error>) -> (Operations, JoinHandle<()>) {
    // a submitter waits until the actor has taken the previous operation
    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::spawn(run(stream, rx, fatal));
    (Operations { tx }, handle)
}

async fn run(
    mut stream: Stream,
    mut ops: mpsc::Receiver<Operation>,
    fatal: mpsc::UnboundedSender<Error>,
) {
    let failure = loop {
        let Some(op) = ops.recv().await else {
            break None;
        };
        let name = op.name();
        match op.run(&mut stream).await {
            Ok(()) => trace!(op = name, "operation done"),
            Err(err) if err.is_transient() => trace!(op = name, %err, "operation had no effect"),
            Err(err) => break Some((name, err)),
        }
    };
    // refuse queued and future operations before reporting
    drop(ops);
    match failure {
        Some((name, err)) => {
            warn!(op = name, error = %err, "operation failed, connection actor stopping");
            let _ = fatal.send(err);
        }
        None => debug!("operation channel closed, connection actor exiting"),
    }
}
