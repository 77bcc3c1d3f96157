//! Acknowledgment tracking.
//!
//! A [`PendingAck`] is a promise that an exact byte pattern (a PINGRESP, or a
//! SUBACK carrying a given packet identifier) will be read within a deadline.
//! Each registration owns a countdown task. The countdown is never stopped
//! from the outside: it waits on its sleep and on its own cancellation token,
//! and exits on whichever completes first, so popping an ack can never leave
//! a task parked on a timer that will not fire.
//!
//! Removal from the map is the only way to "win" a registration. A pop uses
//! `remove` and an expiry uses `remove_if` on the registration id, so for one
//! registration exactly one of the two takes effect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::network::error::{Error, Result, hex};

/// Longest byte pattern that can be awaited.
pub const MAX_PATTERN_LEN: usize = 8;

/// An expected acknowledgment packet, stored inline.
pub type Pattern = heapless::Vec<u8, MAX_PATTERN_LEN>;

/// A registered expectation that `pattern` is read within `ttl`.
#[derive(Debug, Clone)]
pub struct PendingAck {
    /// How long the pattern had to arrive.
    pub ttl: Duration,
    /// The exact packet awaited.
    pub pattern: Pattern,
    id: u64,
    cancel: CancellationToken,
}

impl PendingAck {
    /// Whether the countdown of this registration has been told to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Concurrent store of pending acknowledgments.
///
/// Expired acks are reported as [`Error::AckExpired`] on the failure channel
/// given to [`Acks::new`].
#[derive(Debug)]
pub struct Acks {
    pending: Arc<DashMap<Pattern, PendingAck>>,
    failures: mpsc::UnboundedSender<Error>,
    next_id: AtomicU64,
}

impl Acks {
    /// Create an empty tracker reporting expiries on `failures`.
    pub fn new(failures: mpsc::UnboundedSender<Error>) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            failures,
            next_id: AtomicU64::new(0),
        }
    }

    /// Await `expected` for `ttl`.
    ///
    /// The registration is visible to [`Acks::pop`] as soon as this returns,
    /// so the caller may write the request right after without racing the
    /// reader.
    ///
    /// # Errors
    ///
    /// * [`Error::AckPending`] - the same pattern is already awaited; the
    ///   existing registration and its deadline are left untouched
    /// * [`Error::PacketTooLarge`] - the pattern exceeds [`MAX_PATTERN_LEN`]
    pub fn push(&self, ttl: Duration, expected: &[u8]) -> Result<()> {
        let pattern =
            Pattern::from_slice(expected).map_err(|()| Error::PacketTooLarge(expected.len()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        match self.pending.entry(pattern.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::AckPending {
                    pattern: hex(expected),
                });
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(PendingAck {
                    ttl,
                    pattern: pattern.clone(),
                    id,
                    cancel: cancel.clone(),
                });
            }
        }

        let pending = Arc::clone(&self.pending);
        let failures = self.failures.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(ttl) => {
                    if pending.remove_if(&pattern, |_, ack| ack.id == id).is_some() {
                        let pattern = hex(&pattern);
                        warn!(%pattern, ttl_secs = ttl.as_secs(), "ack ttl expired");
                        let _ = failures.send(Error::AckExpired { pattern });
                    }
                }
                () = cancel.cancelled() => {
                    debug!(pattern = %hex(&pattern), "ack countdown stopped");
                }
            }
        });
        Ok(())
    }

    /// Remove and return the registration matching `observed`, if any.
    ///
    /// The countdown of the returned registration is cancelled.
    pub fn pop(&self, observed: &[u8]) -> Option<PendingAck> {
        let key = Pattern::from_slice(observed).ok()?;
        let (_, ack) = self.pending.remove(&key)?;
        ack.cancel.cancel();
        Some(ack)
    }

    /// Whether `pattern` is currently awaited.
    pub fn contains(&self, pattern: &[u8]) -> bool {
        Pattern::from_slice(pattern).is_ok_and(|key| self.pending.contains_key(&key))
    }

    /// Number of pending acks.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no ack is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every registration and stop its countdown without reporting it.
    pub fn cancel_all(&self) {
        self.pending.retain(|_, ack| {
            ack.cancel.cancel();
            false
        });
    }
}
