//! The session coordinator.
//!
//! A [`Client`] drives one MQTT session over an established [`Stream`]:
//!
//! 1. the CONNECT handshake
//! 2. while connected: a heartbeat, a read loop and a request dispatcher,
//!    each its own task, all funnelling I/O through the connection actor
//! 3. one teardown, run for whichever shutdown trigger is observed first
//!
//! The triggers are a fatal error (from the actor or the ack tracker), the
//! interrupt token and a [`Request::disconnect`]. Whatever the cause, the
//! caller receives exactly one terminal [`Response`], after which the
//! response channel ends.
//!
//! # Examples
//!
//! ```rust,no_run
//! use libmqtt::network::Tcp;
//! use libmqtt::network::application::mqtt::{Client, Options, Request};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), libmqtt::network::error::Error> {
//! let interrupt = CancellationToken::new();
//! let mut client = Client::dial(&mut Tcp::default(), Options::default(), interrupt).await?;
//!
//! client.send(Request::subscribe("sensors/temperature")).await?;
//! client.send(Request::publish("sensors/temperature", "23.5")).await?;
//!
//! while let Some(response) = client.recv().await {
//!     println!("{}: {}", response.topic, response.message);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashSet;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::ack::Acks;
use super::message::{Request, RequestKind, Response};
use super::options::Options;
use super::packet::{self, ControlPacket};
use super::stream::{self, Operation, Operations, READ_DEADLINE, Stream};
use crate::network::Connect;
use crate::network::error::{Error, Result};

/// Responses buffered before the read loop waits for the caller.
const RESPONSE_BUFFER: usize = 16;

/// Requests buffered before [`Client::send`] waits for the dispatcher.
const REQUEST_BUFFER: usize = 16;

/// How long teardown waits for the session tasks before aborting them.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of a session. Only the coordinator moves it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not started yet.
    Disconnected,
    /// CONNECT written, waiting for CONNACK.
    Connecting,
    /// Handshake accepted; heartbeat, reads and requests are running.
    Connected,
    /// A shutdown trigger fired and teardown is in progress.
    Disconnecting,
    /// Terminal. The last response has been emitted.
    Closed,
}

/// Handle to a running MQTT session.
#[derive(Debug)]
pub struct Client {
    requests: mpsc::Sender<Request>,
    responses: mpsc::Receiver<Response>,
    phase: watch::Receiver<Phase>,
}

impl Client {
    /// Start a session over `stream`.
    ///
    /// The handshake runs in the background; its outcome shows up as the
    /// [`Phase`] moving to `Connected`, or as a terminal response. Cancelling
    /// `interrupt` ends the session.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(stream: Stream, options: Options, interrupt: CancellationToken) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BUFFER);
        let (responses_tx, responses_rx) = mpsc::channel(RESPONSE_BUFFER);
        let (phase_tx, phase_rx) = watch::channel(Phase::Disconnected);

        let session = Session {
            options,
            interrupt,
            phase: phase_tx,
            responses: responses_tx,
        };
        tokio::spawn(session.run(stream, requests_rx));

        Self {
            requests: requests_tx,
            responses: responses_rx,
            phase: phase_rx,
        }
    }

    /// Connect to `options.broker` with `connector` and start a session on it.
    ///
    /// The stream gets a read deadline unless `options.read_timeout_ms` is 0,
    /// in which case session reads are bounded by [`READ_DEADLINE`].
    pub async fn dial<C: Connect>(
        connector: &mut C,
        options: Options,
        interrupt: CancellationToken,
    ) -> Result<Self> {
        let connection = connector.connect(&options.broker).await?;
        let stream = match options.read_deadline() {
            Some(deadline) => Stream::with_read_deadline(connection, deadline),
            None => Stream::new(connection),
        }
        .max_packet_size(options.max_packet_size);
        Ok(Self::start(stream, options, interrupt))
    }

    /// Hand a request to the session.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] once the session no longer takes requests.
    pub async fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Next response; `None` after the terminal one.
    pub async fn recv(&mut self) -> Option<Response> {
        self.responses.recv().await
    }

    /// A sender for requests, for use from other tasks.
    pub fn requests(&self) -> mpsc::Sender<Request> {
        self.requests.clone()
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// A receiver following phase changes.
    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Take the underlying channels apart.
    pub fn split(
        self,
    ) -> (
        mpsc::Sender<Request>,
        mpsc::Receiver<Response>,
        watch::Receiver<Phase>,
    ) {
        (self.requests, self.responses, self.phase)
    }
}

/// Random non-zero packet identifiers, unique among in-flight subscribes.
#[derive(Debug, Default)]
pub(crate) struct PacketIds {
    in_flight: DashSet<u16>,
}

impl PacketIds {
    /// Draw an identifier not currently in flight.
    pub(crate) fn acquire(&self) -> u16 {
        loop {
            let id = rand::random::<u16>();
            if id != 0 && self.in_flight.insert(id) {
                return id;
            }
        }
    }

    pub(crate) fn release(&self, id: u16) {
        self.in_flight.remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.in_flight.len()
    }
}

struct Session {
    options: Options,
    interrupt: CancellationToken,
    phase: watch::Sender<Phase>,
    responses: mpsc::Sender<Response>,
}

impl Session {
    async fn run(self, stream: Stream, requests: mpsc::Receiver<Request>) {
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let (ops, actor) = stream::spawn(stream, fatal_tx.clone());
        let acks = Arc::new(Acks::new(fatal_tx));

        self.enter(Phase::Connecting);
        if let Err(err) = self.handshake(&ops, &mut fatal_rx).await {
            warn!(error = %err, "handshake failed");
            drop(ops);
            actor.abort();
            self.close(Some(err)).await;
            return;
        }
        self.enter(Phase::Connected);
        info!(client_id = %self.options.client_id, "session established");

        let cancel = CancellationToken::new();
        let disconnect = CancellationToken::new();
        let ids = Arc::new(PacketIds::default());
        let tasks = vec![
            tokio::spawn(heartbeat(
                ops.clone(),
                Arc::clone(&acks),
                self.options.ping_interval(),
                self.options.ping_ack_ttl(),
                cancel.clone(),
            )),
            tokio::spawn(read_loop(
                ops.clone(),
                Arc::clone(&acks),
                Arc::clone(&ids),
                self.responses.clone(),
                cancel.clone(),
            )),
            tokio::spawn(
                Dispatcher {
                    ops: ops.clone(),
                    acks: Arc::clone(&acks),
                    ids,
                    responses: self.responses.clone(),
                    subscribe_ack_ttl: self.options.subscribe_ack_ttl(),
                    disconnect: disconnect.clone(),
                }
                .run(requests, cancel.clone()),
            ),
        ];

        // later triggers stay queued and are dropped with the receiver
        let cause = tokio::select! {
            Some(err) = fatal_rx.recv() => Some(err),
            () = self.interrupt.cancelled() => Some(Error::Interrupted),
            () = disconnect.cancelled() => None,
        };
        match &cause {
            Some(err) => info!(error = %err, "session ending"),
            None => info!("disconnect requested"),
        }

        self.enter(Phase::Disconnecting);
        cancel.cancel();
        if !cause.as_ref().is_some_and(Error::is_connection_closed) {
            self.say_goodbye(&ops).await;
        }

        join_or_abort(tasks).await;
        drop(ops);
        join_or_abort(vec![actor]).await;
        acks.cancel_all();
        self.close(cause).await;
    }

    /// Write CONNECT and verify the CONNACK read right after it.
    async fn handshake(
        &self,
        ops: &Operations,
        fatal: &mut mpsc::UnboundedReceiver<Error>,
    ) -> Result<()> {
        let connect = packet::encode_connect_with(
            &self.options.client_id,
            self.options.keep_alive_secs,
            self.options.clean_session,
        )?;
        let (op, accepted) = Operation::new("connect", move |stream| {
            Box::pin(async move {
                stream.write_packet(connect).await?;
                let connack = stream
                    .read_packet_or(READ_DEADLINE)
                    .await
                    .map_err(|err| match err {
                        Error::ReadTimeout => Error::HandshakeTimeout,
                        other => other,
                    })?;
                packet::verify_connack(&connack)
            })
        })
        .with_release();
        ops.submit(op).await?;

        tokio::select! {
            outcome = accepted => match outcome {
                Ok(()) => Ok(()),
                // the actor reports why right after dropping the operation
                Err(_) => Err(fatal.recv().await.unwrap_or(Error::ConnectionClosed)),
            },
            () = self.interrupt.cancelled() => Err(Error::Interrupted),
        }
    }

    async fn say_goodbye(&self, ops: &Operations) {
        let timeout = self.options.disconnect_timeout();
        let goodbye = write("disconnect", packet::encode_disconnect());
        match tokio::time::timeout(timeout, ops.execute(goodbye)).await {
            Ok(true) => debug!("disconnect written"),
            Ok(false) => debug!("connection gone before disconnect"),
            Err(_) => warn!(?timeout, "disconnect timed out"),
        }
    }

    async fn close(&self, cause: Option<Error>) {
        self.enter(Phase::Closed);
        info!(cause = ?cause.as_ref().map(ToString::to_string), "session closed");
        // the caller may be gone already
        let _ = self.responses.send(Response::closed(cause)).await;
    }

    fn enter(&self, phase: Phase) {
        debug!(?phase, "phase");
        self.phase.send_replace(phase);
    }
}

/// Wait for `tasks`, aborting any still running after [`JOIN_TIMEOUT`].
async fn join_or_abort(tasks: Vec<JoinHandle<()>>) {
    let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
    if tokio::time::timeout(JOIN_TIMEOUT, join_all(tasks))
        .await
        .is_err()
    {
        warn!(task_count = aborts.len(), "session tasks did not stop in time, aborting");
        aborts.iter().for_each(|task| task.abort());
    }
}

fn write(name: &'static str, packet: Bytes) -> Operation {
    Operation::new(name, move |stream| {
        Box::pin(async move { stream.write_packet(packet).await })
    })
}

/// Submit `op` unless the session is shutting down first.
async fn submit(ops: &Operations, op: Operation, cancel: &CancellationToken) -> bool {
    tokio::select! {
        submitted = ops.submit(op) => submitted.is_ok(),
        () = cancel.cancelled() => false,
    }
}

async fn emit(responses: &mpsc::Sender<Response>, response: Response, cancel: &CancellationToken) {
    tokio::select! {
        sent = responses.send(response) => {
            if sent.is_err() {
                trace!("response dropped, caller gone");
            }
        }
        () = cancel.cancelled() => {}
    }
}

async fn heartbeat(
    ops: Operations,
    acks: Arc<Acks>,
    interval: Duration,
    ttl: Duration,
    cancel: CancellationToken,
) {
    // a zero period would make the ticker panic
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => break,
        }
        if let Err(err) = acks.push(ttl, &packet::encode_pingresp()) {
            // the earlier deadline keeps running
            debug!(error = %err, "previous ping unanswered");
        }
        if !submit(&ops, write("pingreq", packet::encode_pingreq()), &cancel).await {
            break;
        }
    }
    trace!("heartbeat stopped");
}

async fn read_loop(
    ops: Operations,
    acks: Arc<Acks>,
    ids: Arc<PacketIds>,
    responses: mpsc::Sender<Response>,
    cancel: CancellationToken,
) {
    loop {
        let (packet_tx, packet_rx) = oneshot::channel();
        let stop = cancel.clone();
        let read = Operation::new("read", move |stream| {
            Box::pin(async move {
                // bounded so queued writes get the stream back
                tokio::select! {
                    packet = stream.read_packet_or(READ_DEADLINE) => {
                        let _ = packet_tx.send(packet?);
                        Ok(())
                    }
                    () = stop.cancelled() => Ok(()),
                }
            })
        });
        if !submit(&ops, read, &cancel).await {
            break;
        }
        let packet = tokio::select! {
            packet = packet_rx => match packet {
                Ok(packet) => packet,
                // timed out, or the actor stopped; the next submit tells which
                Err(_) => continue,
            },
            () = cancel.cancelled() => break,
        };

        match ControlPacket::classify(&packet) {
            ControlPacket::Publish => match packet::decode_publish(&packet) {
                Ok((topic, payload)) => {
                    emit(&responses, Response::message(topic, &payload), &cancel).await;
                }
                Err(err) => warn!(error = %err, "dropping undecodable publish"),
            },
            ControlPacket::Suback => {
                // matched by packet id whatever the return code
                let key = &packet[..packet.len().min(4)];
                if acks.pop(key).is_none() {
                    debug!(len = packet.len(), "unexpected suback ignored");
                    continue;
                }
                if let Ok(id) = packet::decode_subscribe_packet_id(&packet) {
                    ids.release(id);
                }
                let notice = match packet::suback_return_code(&packet) {
                    Ok(packet::SUBACK_FAILURE) => {
                        warn!("subscription refused by broker");
                        "subscription refused"
                    }
                    _ => "subscription acked",
                };
                emit(&responses, Response::notice(notice), &cancel).await;
            }
            kind => match acks.pop(&packet) {
                Some(_) => trace!(packet = %kind, "ack matched"),
                None => debug!(packet = %kind, len = packet.len(), "unexpected packet ignored"),
            },
        }
    }
    trace!("read loop stopped");
}

struct Dispatcher {
    ops: Operations,
    acks: Arc<Acks>,
    ids: Arc<PacketIds>,
    responses: mpsc::Sender<Response>,
    subscribe_ack_ttl: Duration,
    disconnect: CancellationToken,
}

impl Dispatcher {
    async fn run(self, mut requests: mpsc::Receiver<Request>, cancel: CancellationToken) {
        loop {
            let request = tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => {
                        debug!("request channel closed");
                        break;
                    }
                },
                () = cancel.cancelled() => break,
            };
            let proceed = match request.kind {
                RequestKind::Disconnect => {
                    self.disconnect.cancel();
                    false
                }
                RequestKind::Subscribe => self.subscribe(&request.topic, &cancel).await,
                RequestKind::Publish => {
                    self.publish(&request.topic, &request.payload, &cancel).await
                }
            };
            if !proceed {
                break;
            }
        }
        trace!("dispatcher stopped");
    }

    async fn subscribe(&self, topic: &str, cancel: &CancellationToken) -> bool {
        let id = self.ids.acquire();
        let registered = packet::encode_subscribe(topic, id).and_then(|subscribe| {
            self.acks
                .push(self.subscribe_ack_ttl, &packet::suback_key(id))
                .map(|()| subscribe)
        });
        match registered {
            Ok(subscribe) => {
                debug!(%topic, packet_id = id, "subscribing");
                submit(&self.ops, write("subscribe", subscribe), cancel).await
            }
            Err(err) => {
                self.ids.release(id);
                self.reject(topic, &err, cancel).await;
                true
            }
        }
    }

    async fn publish(&self, topic: &str, payload: &[u8], cancel: &CancellationToken) -> bool {
        match packet::encode_publish(topic, payload) {
            Ok(publish) => submit(&self.ops, write("publish", publish), cancel).await,
            Err(err) => {
                self.reject(topic, &err, cancel).await;
                true
            }
        }
    }

    /// Tell the caller a request was not sent. The session carries on.
    async fn reject(&self, topic: &str, err: &Error, cancel: &CancellationToken) {
        warn!(%topic, error = %err, "request rejected");
        let notice = Response::notice(format!("{topic} request rejected: {err}"));
        emit(&self.responses, notice, cancel).await;
    }
}
