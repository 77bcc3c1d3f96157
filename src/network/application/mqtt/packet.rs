//! MQTT 3.1.1 control packets: classification, encoding and decoding.
//!
//! Every function here is pure. Encoders return the complete packet, fixed
//! header included, and decoders take the complete packet as produced by
//! [`FrameCodec`].
//!
//! # Wire layouts
//!
//! ```text
//! CONNECT     10 len | 00 04 'M' 'Q' 'T' 'T' 04 flags ka ka | id-len(2) id
//! CONNACK     20 02  | ack-flags            | return-code
//! PINGREQ     c0 00
//! PINGRESP    d0 00
//! DISCONNECT  e0 00
//! SUBSCRIBE   82 len | packet-id(2)         | topic-len(2) topic 00
//! SUBACK      90 03  | packet-id(2)         | return-code
//! PUBLISH     30 len | topic-len(2) topic   | payload
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::network::error::{Error, Result, hex};

// MQTT Control Packet types - these are the fixed header packet type values
/// MQTT CONNECT packet type identifier.
pub const CONNECT: u8 = 0x10;
/// MQTT CONNACK packet type identifier.
pub const CONNACK: u8 = 0x20;
/// MQTT PUBLISH packet type identifier.
pub const PUBLISH: u8 = 0x30;
/// MQTT SUBSCRIBE packet type identifier.
pub const SUBSCRIBE: u8 = 0x82;
/// MQTT SUBACK packet type identifier.
pub const SUBACK: u8 = 0x90;
/// MQTT PINGREQ packet type identifier.
pub const PINGREQ: u8 = 0xc0;
/// MQTT PINGRESP packet type identifier.
pub const PINGRESP: u8 = 0xd0;
/// MQTT DISCONNECT packet type identifier.
pub const DISCONNECT: u8 = 0xe0;

/// MQTT protocol name as defined in the specification.
const PROTOCOL_NAME: &[u8] = b"MQTT";
/// MQTT protocol level for version 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;
/// Connect flag requesting a clean session.
const CLEAN_SESSION: u8 = 0x02;
/// Keep-alive advertised by [`encode_connect`].
pub const KEEP_ALIVE_SECS: u16 = 60;

/// Largest value the remaining length field can carry (0xFF,0xFF,0xFF,0x7F).
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Largest packet the wire format allows: a 1-byte type, a 4-byte remaining
/// length and [`MAX_REMAINING_LENGTH`] bytes.
pub const MAX_PACKET_SIZE: usize = 1 + 4 + MAX_REMAINING_LENGTH;

/// SUBACK return code refusing a subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

/// The kind of an MQTT control packet, identified by its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlPacket {
    /// Client request to connect.
    Connect,
    /// Connect acknowledgment.
    Connack,
    /// Ping request.
    PingReq,
    /// Ping response.
    PingResp,
    /// Client is disconnecting.
    Disconnect,
    /// Subscribe request.
    Subscribe,
    /// Subscribe acknowledgment.
    Suback,
    /// Publish message.
    Publish,
    /// Any discriminator outside the supported set.
    Unknown(u8),
}

impl ControlPacket {
    /// Classify a packet by its first byte.
    ///
    /// PUBLISH is recognised by its type nibble since brokers set the DUP and
    /// RETAIN bits in the low nibble; every other type must match exactly.
    pub fn from_byte(b: u8) -> Self {
        match b {
            CONNECT => Self::Connect,
            CONNACK => Self::Connack,
            PINGREQ => Self::PingReq,
            PINGRESP => Self::PingResp,
            DISCONNECT => Self::Disconnect,
            SUBSCRIBE => Self::Subscribe,
            SUBACK => Self::Suback,
            b if b & 0xf0 == PUBLISH => Self::Publish,
            other => Self::Unknown(other),
        }
    }

    /// Classify a complete packet. An empty slice is `Unknown(0)`.
    pub fn classify(bytes: &[u8]) -> Self {
        bytes
            .first()
            .map_or(Self::Unknown(0), |b| Self::from_byte(*b))
    }

    /// The name of the packet type as it appears in the MQTT specification.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connack => "CONNACK",
            Self::PingReq => "PINGREQ",
            Self::PingResp => "PINGRESP",
            Self::Disconnect => "DISCONNECT",
            Self::Subscribe => "SUBSCRIBE",
            Self::Suback => "SUBACK",
            Self::Publish => "PUBLISH",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ControlPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(b) => write!(f, "UNKNOWN({b:#04x})"),
            known => f.write_str(known.name()),
        }
    }
}

/// CONNACK return codes defined by MQTT 3.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnackCode {
    /// 0x00: Connection accepted.
    Accepted,
    /// 0x01: The server does not support the requested protocol level.
    UnacceptableProtocolVersion,
    /// 0x02: The client identifier is not allowed by the server.
    IdentifierRejected,
    /// 0x03: The MQTT service is unavailable.
    ServerUnavailable,
    /// 0x04: The user name or password is malformed.
    BadUserNameOrPassword,
    /// 0x05: The client is not authorized to connect.
    NotAuthorized,
    /// Any code outside 0..=5.
    Unknown(u8),
}

impl From<u8> for ConnackCode {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            other => Self::Unknown(other),
        }
    }
}

impl From<ConnackCode> for u8 {
    fn from(code: ConnackCode) -> Self {
        match code {
            ConnackCode::Accepted => 0,
            ConnackCode::UnacceptableProtocolVersion => 1,
            ConnackCode::IdentifierRejected => 2,
            ConnackCode::ServerUnavailable => 3,
            ConnackCode::BadUserNameOrPassword => 4,
            ConnackCode::NotAuthorized => 5,
            ConnackCode::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ConnackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => f.write_str("Connection accepted"),
            Self::UnacceptableProtocolVersion => f.write_str(
                "The Server does not support the level of the MQTT protocol requested by the Client",
            ),
            Self::IdentifierRejected => {
                f.write_str("The Client identifier is correct UTF-8 but not allowed by the Server")
            }
            Self::ServerUnavailable => f.write_str(
                "The Network Connection has been made but the MQTT service is unavailable",
            ),
            Self::BadUserNameOrPassword => {
                f.write_str("The data in the user name or password is malformed")
            }
            Self::NotAuthorized => f.write_str("The Client is not authorized to connect"),
            Self::Unknown(code) => write!(f, "Unknown return code {code}"),
        }
    }
}

/// Returns a CONNECT packet with a clean session and a 60 second keep-alive.
pub fn encode_connect(client_id: &str) -> Result<Bytes> {
    encode_connect_with(client_id, KEEP_ALIVE_SECS, true)
}

/// Returns a CONNECT packet with explicit keep-alive and session flags.
pub fn encode_connect_with(client_id: &str, keep_alive: u16, clean_session: bool) -> Result<Bytes> {
    let id = client_id.as_bytes();
    let id_len = string_len(id)?;

    // variable header (10) + payload
    let remaining = 10 + 2 + id.len();
    let mut buf = fixed_header(CONNECT, remaining)?;

    buf.put_u16(PROTOCOL_NAME.len() as u16);
    buf.put_slice(PROTOCOL_NAME);
    buf.put_u8(PROTOCOL_LEVEL);
    buf.put_u8(if clean_session { CLEAN_SESSION } else { 0 });
    buf.put_u16(keep_alive);

    buf.put_u16(id_len);
    buf.put_slice(id);
    Ok(buf.freeze())
}

/// Returns a CONNACK packet with the given return code and no session present.
pub fn encode_connack(code: ConnackCode) -> Bytes {
    Bytes::copy_from_slice(&[CONNACK, 2, 0, code.into()])
}

/// Returns a DISCONNECT packet.
pub fn encode_disconnect() -> Bytes {
    Bytes::from_static(&[DISCONNECT, 0])
}

/// Returns a PINGREQ packet.
pub fn encode_pingreq() -> Bytes {
    Bytes::from_static(&[PINGREQ, 0])
}

/// Returns a PINGRESP packet.
pub fn encode_pingresp() -> Bytes {
    Bytes::from_static(&[PINGRESP, 0])
}

/// Returns a SUBSCRIBE packet for a single topic filter at QoS 0.
///
/// ```text
/// fixed var   payload
/// 82 09 00 01 00 04 74 65 73 74 00
///             .  .  t  e  s  t  .
/// ```
pub fn encode_subscribe(topic: &str, packet_id: u16) -> Result<Bytes> {
    let topic = topic.as_bytes();
    let topic_len = string_len(topic)?;

    let remaining = 2 + 2 + topic.len() + 1;
    let mut buf = fixed_header(SUBSCRIBE, remaining)?;
    buf.put_u16(packet_id);
    buf.put_u16(topic_len);
    buf.put_slice(topic);
    // requested QoS
    buf.put_u8(0);
    Ok(buf.freeze())
}

/// Returns a SUBACK packet granting QoS 0.
pub fn encode_suback(packet_id: u16) -> Bytes {
    encode_suback_with(packet_id, 0)
}

/// Returns a SUBACK packet carrying `return_code`, e.g. [`SUBACK_FAILURE`].
pub fn encode_suback_with(packet_id: u16, return_code: u8) -> Bytes {
    let [msb, lsb] = packet_id.to_be_bytes();
    Bytes::copy_from_slice(&[SUBACK, 3, msb, lsb, return_code])
}

/// The part of a SUBACK that identifies which subscribe it answers.
///
/// The return code is left out so a refusal matches the same pending ack.
pub fn suback_key(packet_id: u16) -> [u8; 4] {
    let [msb, lsb] = packet_id.to_be_bytes();
    [SUBACK, 3, msb, lsb]
}

/// Returns the return code of a SUBACK packet.
pub fn suback_return_code(packet: &[u8]) -> Result<u8> {
    match packet {
        [SUBACK, _, _, _, code, ..] => Ok(*code),
        _ => Err(Error::Malformed("missing suback return code")),
    }
}

/// Returns a QoS 0 PUBLISH packet.
///
/// ```text
/// fixed var               payload
/// 30 0d 00 04 74 65 73 74 73 76 61 6d 6d 65 6c
///             t  e  s  t  s  v  a  m  m  e  l
/// ```
pub fn encode_publish(topic: &str, payload: &[u8]) -> Result<Bytes> {
    let topic = topic.as_bytes();
    let topic_len = string_len(topic)?;

    let remaining = 2 + topic.len() + payload.len();
    let mut buf = fixed_header(PUBLISH, remaining)?;
    buf.put_u16(topic_len);
    buf.put_slice(topic);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Returns the topic and payload of a QoS 0 PUBLISH packet.
///
/// DUP and RETAIN flags are ignored and no packet identifier is expected.
pub fn decode_publish(packet: &[u8]) -> Result<(String, Bytes)> {
    let (_, header_len) = remaining_length(packet)?.ok_or(Error::Malformed("truncated header"))?;
    let mut body = packet
        .get(header_len..)
        .ok_or(Error::Malformed("truncated header"))?;
    if body.len() < 2 {
        return Err(Error::Malformed("missing topic length"));
    }
    let topic_len = usize::from(body.get_u16());
    if body.len() < topic_len {
        return Err(Error::Malformed("topic exceeds packet"));
    }
    let topic = std::str::from_utf8(&body[..topic_len])
        .map_err(|_| Error::Malformed("topic is not utf-8"))?
        .to_owned();
    let payload = Bytes::copy_from_slice(&body[topic_len..]);
    Ok((topic, payload))
}

/// Returns the packet identifier of a SUBSCRIBE (or SUBACK) packet.
pub fn decode_subscribe_packet_id(packet: &[u8]) -> Result<u16> {
    match packet.get(2..4) {
        Some(&[msb, lsb]) => Ok(u16::from_be_bytes([msb, lsb])),
        _ => Err(Error::Malformed("missing packet identifier")),
    }
}

/// Checks that `packet` is a CONNACK accepting the connection.
pub fn verify_connack(packet: &[u8]) -> Result<()> {
    match packet {
        [CONNACK, _, _, code, ..] => match ConnackCode::from(*code) {
            ConnackCode::Accepted => Ok(()),
            refused => Err(Error::BadReturnCode(refused)),
        },
        other => Err(Error::BadPacket(hex(other))),
    }
}

/// Writes the fixed header of a packet into a buffer sized for the whole packet.
fn fixed_header(packet_type: u8, remaining: usize) -> Result<BytesMut> {
    if remaining > MAX_REMAINING_LENGTH {
        return Err(Error::PacketTooLarge(remaining));
    }
    let mut buf = BytesMut::with_capacity(1 + 4 + remaining);
    buf.put_u8(packet_type);
    encode_remaining_length(&mut buf, remaining);
    Ok(buf)
}

/// Length prefix of an MQTT UTF-8 string.
fn string_len(s: &[u8]) -> Result<u16> {
    u16::try_from(s.len()).map_err(|_| Error::PacketTooLarge(s.len()))
}

/// Encode the remaining length field for an MQTT packet.
///
/// Each byte carries 7 bits of the length, least significant group first;
/// the high bit says another byte follows. Callers bound `len` by
/// [`MAX_REMAINING_LENGTH`] so at most 4 bytes are written.
fn encode_remaining_length(buf: &mut BytesMut, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Decode the remaining length field that follows the first byte of `packet`.
///
/// Returns the remaining length and the size of the fixed header, or `None`
/// when more bytes are needed to tell.
fn remaining_length(packet: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut len = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in packet.iter().skip(1).enumerate() {
        if i == 4 {
            return Err(Error::Malformed("remaining length exceeds 4 bytes"));
        }
        len += usize::from(byte & 0x7f) * multiplier;
        multiplier *= 128;
        if byte & 0x80 == 0 {
            return Ok(Some((len, i + 2)));
        }
    }
    if packet.len() > 4 {
        return Err(Error::Malformed("remaining length exceeds 4 bytes"));
    }
    Ok(None)
}

/// Splits an inbound byte stream into whole MQTT packets.
///
/// Frames are yielded with their fixed header so the pure decoders above
/// and the ack patterns operate on exactly what was on the wire.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_packet_size: usize,
}

impl FrameCodec {
    /// A codec refusing packets whose total size exceeds `max_packet_size`.
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let Some((remaining, header_len)) = remaining_length(src)? else {
            return Ok(None);
        };
        let total = header_len + remaining;
        if total > self.max_packet_size {
            return Err(Error::PacketTooLarge(total));
        }
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(total).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, packet: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&packet);
        Ok(())
    }
}
