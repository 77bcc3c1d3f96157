//! An in-memory broker speaking just enough MQTT for session tests.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use libmqtt::network::application::mqtt::packet::{self, ConnackCode, ControlPacket, FrameCodec};
use libmqtt::network::application::mqtt::{Client, Options, Stream};
use tokio::io::duplex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

pub const READ_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Script {
    pub connack: ConnackCode,
    pub answer_pings: bool,
    pub answer_subscribes: bool,
    /// Subscribes are answered with a failure return code.
    pub refuse_subscribes: bool,
    /// Publishes are delivered back to the client, as to a subscriber.
    pub echo_publishes: bool,
    /// Hang up right after echoing this many publishes.
    pub close_after_publishes: Option<usize>,
    /// Hang up once this much time has passed since the CONNECT.
    pub hang_up_after: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connack: ConnackCode::Accepted,
            answer_pings: true,
            answer_subscribes: true,
            refuse_subscribes: false,
            echo_publishes: true,
            close_after_publishes: None,
            hang_up_after: None,
        }
    }
}

pub struct Broker {
    /// Every packet the broker read, in order.
    pub received: mpsc::UnboundedReceiver<Bytes>,
    pub handle: JoinHandle<()>,
}

impl Broker {
    /// Everything the broker read until it stopped.
    pub async fn drain(mut self) -> Vec<Bytes> {
        let _ = self.handle.await;
        let mut packets = Vec::new();
        while let Ok(packet) = self.received.try_recv() {
            packets.push(packet);
        }
        packets
    }
}

/// A client stream wired to a broker following `script`.
pub fn spawn(script: Script) -> (Stream, Broker) {
    spawn_with(script, Some(READ_DEADLINE))
}

/// As [`spawn`], with the client stream's own read deadline chosen.
pub fn spawn_with(script: Script, read_deadline: Option<Duration>) -> (Stream, Broker) {
    let (client, server) = duplex(4096);
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(serve(Framed::new(server, FrameCodec::default()), script, seen_tx));
    let stream = match read_deadline {
        Some(deadline) => Stream::with_read_deadline(client, deadline),
        None => Stream::new(client),
    };
    (
        stream,
        Broker {
            received: seen_rx,
            handle,
        },
    )
}

/// Start a session against a broker following `script`.
pub fn session(script: Script) -> (Client, Broker, CancellationToken) {
    let (stream, broker) = spawn(script);
    let interrupt = CancellationToken::new();
    let client = Client::start(stream, Options::default(), interrupt.clone());
    (client, broker, interrupt)
}

async fn serve(
    mut frames: Framed<tokio::io::DuplexStream, FrameCodec>,
    script: Script,
    seen: mpsc::UnboundedSender<Bytes>,
) {
    let mut hang_up_at: Option<Instant> = None;
    let mut published = 0;

    loop {
        let next = match hang_up_at {
            Some(at) => match tokio::time::timeout_at(at, frames.next()).await {
                Ok(next) => next,
                Err(_) => break,
            },
            None => frames.next().await,
        };
        let Some(Ok(packet)) = next else {
            break;
        };
        let _ = seen.send(packet.clone());

        let reply = match ControlPacket::classify(&packet) {
            ControlPacket::Connect => {
                hang_up_at = script.hang_up_after.map(|after| Instant::now() + after);
                Some(packet::encode_connack(script.connack))
            }
            ControlPacket::PingReq if script.answer_pings => Some(packet::encode_pingresp()),
            ControlPacket::Subscribe if script.answer_subscribes => {
                let id = packet::decode_subscribe_packet_id(&packet).unwrap();
                if script.refuse_subscribes {
                    Some(packet::encode_suback_with(id, packet::SUBACK_FAILURE))
                } else {
                    Some(packet::encode_suback(id))
                }
            }
            ControlPacket::Publish if script.echo_publishes => Some(packet.clone()),
            ControlPacket::Disconnect => break,
            _ => None,
        };
        if let Some(reply) = reply {
            if frames.send(reply).await.is_err() {
                break;
            }
        }
        if ControlPacket::classify(&packet) == ControlPacket::Publish {
            published += 1;
            if script.close_after_publishes.is_some_and(|n| published >= n) {
                break;
            }
        }
    }
}
