//! Requests a caller sends into a session and the responses it gets back.

use bytes::Bytes;

use crate::network::error::Error;

/// Topic carried by every notice.
pub const NOTICE_TOPIC: &str = "NOTICE";

/// What a [`Request`] asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Subscribe to a topic filter.
    Subscribe,
    /// Publish a message, fire-and-forget.
    Publish,
    /// End the session gracefully.
    Disconnect,
}

/// A caller request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// What to do.
    pub kind: RequestKind,
    /// Topic or topic filter; empty for a disconnect.
    pub topic: String,
    /// Message body; only meaningful for a publish.
    pub payload: Bytes,
}

impl Request {
    /// Subscribe to `topic`.
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Subscribe,
            topic: topic.into(),
            payload: Bytes::new(),
        }
    }

    /// Publish `payload` on `topic`.
    pub fn publish(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: RequestKind::Publish,
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// End the session.
    pub fn disconnect() -> Self {
        Self {
            kind: RequestKind::Disconnect,
            topic: String::new(),
            payload: Bytes::new(),
        }
    }
}

/// Whether a [`Response`] is session information or an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Session-level status or error.
    Notice,
    /// A message published on a subscribed topic.
    Message,
}

/// Something the session reports to its caller.
///
/// The last response of a session is terminal: it either carries the error
/// that ended the session or is the notice following a clean disconnect.
#[derive(Debug)]
pub struct Response {
    /// Notice or message.
    pub kind: ResponseKind,
    /// [`NOTICE_TOPIC`] for notices, the publish topic for messages.
    pub topic: String,
    /// Notice text, or the message payload decoded as UTF-8 (lossily).
    pub message: String,
    /// The error that ended the session, if any.
    pub error: Option<Error>,
    terminal: bool,
}

impl Response {
    pub(crate) fn notice(message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Notice,
            topic: NOTICE_TOPIC.to_owned(),
            message: message.into(),
            error: None,
            terminal: false,
        }
    }

    pub(crate) fn message(topic: String, payload: &[u8]) -> Self {
        Self {
            kind: ResponseKind::Message,
            topic,
            message: String::from_utf8_lossy(payload).into_owned(),
            error: None,
            terminal: false,
        }
    }

    /// The final notice of a session, carrying its cause.
    pub(crate) fn closed(error: Option<Error>) -> Self {
        let message = match &error {
            Some(err) => err.to_string(),
            None => "disconnected".to_owned(),
        };
        Self {
            error,
            terminal: true,
            ..Self::notice(message)
        }
    }

    /// Whether this is session information rather than an inbound message.
    pub fn is_notice(&self) -> bool {
        self.kind == ResponseKind::Notice
    }

    /// Whether this response carries the error that ended the session.
    pub fn is_fatal(&self) -> bool {
        self.error.is_some()
    }

    /// Whether this is the last response of the session.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }
}
