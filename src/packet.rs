//! # MQTT Packet Structures and Serialization
//!
//! This module defines the packets the broker front end understands and the traits for
//! encoding and decoding them to and from a byte buffer: the fixed header shared by all
//! control packets, the `CONNECT` request (MQTT 3.1, 3.1.1 and 5) and the `CONNACK`
//! acknowledgement.
//!
//! Decoded packets borrow from the read buffer and are not retained past the call that
//! handles them.

use crate::error::{ConnectReasonCode, MqttError, ProtocolError};
use crate::packet_type::PacketType;
use crate::util::{
    self, CodecResult, read_binary_data, read_properties, read_u8, read_u16, read_utf8_string,
    write_utf8_string,
};
use heapless::Vec;

/// Maximum number of MQTT v5 properties kept per property block.
pub const MAX_PROPERTIES: usize = 16;

const MALFORMED: MqttError<crate::transport::ErrorPlaceHolder> =
    MqttError::Protocol(ProtocolError::MalformedPacket);

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket),
        }
    }
}

/// MQTT protocol level announced in `CONNECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ProtocolVersion {
    /// MQTT 3.1, protocol name `MQIsdp`.
    V3_1 = 3,
    /// MQTT 3.1.1, protocol name `MQTT`.
    V3_1_1 = 4,
    /// MQTT 5.0, protocol name `MQTT`.
    V5 = 5,
}

impl ProtocolVersion {
    pub const fn level(self) -> u8 {
        self as u8
    }

    /// The protocol name a client must send together with this level.
    pub const fn protocol_name(self) -> &'static str {
        match self {
            ProtocolVersion::V3_1 => "MQIsdp",
            ProtocolVersion::V3_1_1 | ProtocolVersion::V5 => "MQTT",
        }
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            3 => Ok(ProtocolVersion::V3_1),
            4 => Ok(ProtocolVersion::V3_1_1),
            5 => Ok(ProtocolVersion::V5),
            _ => Err(ProtocolError::UnsupportedProtocolVersion(level)),
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Writes the complete packet and returns the number of bytes used.
    fn encode(&self, buf: &mut [u8], version: ProtocolVersion) -> CodecResult<usize>;
}

/// A trait for packets that can be decoded from a byte buffer holding one complete frame.
pub trait DecodePacket<'a>: Sized {
    fn decode(buf: &'a [u8]) -> CodecResult<Self>;
}

// --- Fixed header ---

/// The fixed header that starts every MQTT control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixedHeader {
    pub packet_type: PacketType,
    /// Low nibble of the first byte; its meaning depends on the packet type.
    pub flags: u8,
    /// Number of bytes following the fixed header.
    pub remaining_length: usize,
    /// Size of the fixed header itself: the type byte plus 1 to 4 length bytes.
    pub header_len: usize,
}

impl FixedHeader {
    pub fn new(packet_type: PacketType, flags: u8, remaining_length: usize) -> Self {
        let header_len = match remaining_length {
            0..=127 => 2,
            128..=16_383 => 3,
            16_384..=2_097_151 => 4,
            _ => 5,
        };
        Self {
            packet_type,
            flags: flags & 0x0F,
            remaining_length,
            header_len,
        }
    }

    /// Parses a fixed header from the start of a possibly incomplete buffer.
    ///
    /// Returns `Ok(None)` while the remaining-length field is still incomplete. The body
    /// is not required to be present; compare `frame_len()` with the bytes at hand.
    pub fn parse(buf: &[u8]) -> CodecResult<Option<Self>> {
        let Some((&first, rest)) = buf.split_first() else {
            return Ok(None);
        };
        let header = util::parse_variable_byte_integer(rest)?.map(|(remaining_length, len)| {
            Self {
                packet_type: PacketType::from_header_byte(first),
                flags: first & 0x0F,
                remaining_length,
                header_len: 1 + len,
            }
        });
        Ok(header)
    }

    /// Decodes the fixed header of a complete frame.
    ///
    /// Fails with `MalformedPacket` if the buffer is shorter than two bytes, if the
    /// remaining-length field is truncated or longer than four bytes, or if the buffer
    /// holds fewer bytes than the header declares.
    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        if buf.len() < 2 {
            return Err(MALFORMED);
        }
        let header = Self::parse(buf)?.ok_or(MALFORMED)?;
        if buf.len() < header.frame_len() {
            return Err(MALFORMED);
        }
        Ok(header)
    }

    /// Writes the fixed header and returns its length.
    pub fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        let first = buf.first_mut().ok_or(MqttError::BufferTooSmall)?;
        *first = (self.packet_type.code() << 4) | (self.flags & 0x0F);
        let mut cursor = 1;
        util::write_variable_byte_integer(&mut cursor, buf, self.remaining_length)?;
        Ok(cursor)
    }

    /// Total size of the packet: fixed header plus remaining length.
    pub fn frame_len(&self) -> usize {
        self.header_len + self.remaining_length
    }
}

// --- Properties (MQTT v5) ---

/// A single MQTT v5 property: its identifier and the raw encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property<'a> {
    pub id: u8,
    pub data: &'a [u8],
}

/// The properties of one property block, in wire order.
///
/// Identifiers may repeat (user properties), so this is a list rather than a map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties<'a> {
    items: Vec<Property<'a>, MAX_PROPERTIES>,
}

impl<'a> Properties<'a> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Appends a property, handing it back if the block is full.
    pub fn push(&mut self, property: Property<'a>) -> Result<(), Property<'a>> {
        self.items.push(property)
    }

    /// Returns the raw value of the first property with this identifier.
    pub fn get(&self, id: u8) -> Option<&'a [u8]> {
        self.items.iter().find(|p| p.id == id).map(|p| p.data)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property<'a>> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of bytes the properties occupy, without the length prefix.
    fn encoded_len(&self) -> usize {
        self.items.iter().map(|p| 1 + p.data.len()).sum()
    }

    fn encode(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        util::write_variable_byte_integer(cursor, buf, self.encoded_len())?;
        for prop in self.items.iter() {
            let end = *cursor + 1 + prop.data.len();
            let slot = buf.get_mut(*cursor..end).ok_or(MqttError::BufferTooSmall)?;
            slot[0] = prop.id;
            slot[1..].copy_from_slice(prop.data);
            *cursor = end;
        }
        Ok(())
    }
}

// --- CONNECT Packet ---

/// The bit-packed connect flags byte of the `CONNECT` variable header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectFlags {
    pub clean_session: bool,
    pub will: bool,
    pub will_qos: QoS,
    pub will_retain: bool,
    pub password: bool,
    pub username: bool,
}

impl ConnectFlags {
    const RESERVED: u8 = 0x01;
    const CLEAN_SESSION: u8 = 0x02;
    const WILL: u8 = 0x04;
    const WILL_QOS_SHIFT: u8 = 3;
    const WILL_RETAIN: u8 = 0x20;
    const PASSWORD: u8 = 0x40;
    const USERNAME: u8 = 0x80;

    /// Parses and validates the flags byte.
    ///
    /// The reserved bit must be zero, the will QoS must not be 3, and the will QoS and
    /// retain bits must be zero when no will message is present.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        if byte & Self::RESERVED != 0 {
            return Err(ProtocolError::MalformedPacket);
        }
        let will = byte & Self::WILL != 0;
        let will_qos = QoS::try_from((byte >> Self::WILL_QOS_SHIFT) & 0x03)?;
        let will_retain = byte & Self::WILL_RETAIN != 0;
        if !will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(ProtocolError::MalformedPacket);
        }
        Ok(Self {
            clean_session: byte & Self::CLEAN_SESSION != 0,
            will,
            will_qos,
            will_retain,
            password: byte & Self::PASSWORD != 0,
            username: byte & Self::USERNAME != 0,
        })
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = (self.will_qos as u8) << Self::WILL_QOS_SHIFT;
        if self.clean_session {
            byte |= Self::CLEAN_SESSION;
        }
        if self.will {
            byte |= Self::WILL;
        }
        if self.will_retain {
            byte |= Self::WILL_RETAIN;
        }
        if self.password {
            byte |= Self::PASSWORD;
        }
        if self.username {
            byte |= Self::USERNAME;
        }
        byte
    }
}

/// The will message a client registers in `CONNECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill<'a> {
    /// Will properties (MQTT v5 only, empty otherwise).
    pub properties: Properties<'a>,
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect<'a> {
    pub protocol_version: ProtocolVersion,
    pub clean_session: bool,
    pub keep_alive: u16,
    /// Connect properties (MQTT v5 only, empty otherwise).
    pub properties: Properties<'a>,
    pub client_id: &'a str,
    pub will: Option<LastWill<'a>>,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            protocol_version: ProtocolVersion::V3_1_1,
            clean_session,
            keep_alive,
            properties: Properties::new(),
            client_id,
            will: None,
            username: None,
            password: None,
        }
    }

    /// The connect flags byte implied by this packet's fields.
    pub fn flags(&self) -> ConnectFlags {
        ConnectFlags {
            clean_session: self.clean_session,
            will: self.will.is_some(),
            will_qos: self.will.as_ref().map_or(QoS::AtMostOnce, |w| w.qos),
            will_retain: self.will.as_ref().is_some_and(|w| w.retain),
            password: self.password.is_some(),
            username: self.username.is_some(),
        }
    }
}

fn write_binary_data(cursor: &mut usize, buf: &mut [u8], data: &[u8]) -> CodecResult<()> {
    let len = u16::try_from(data.len())
        .map_err(|_| MqttError::Protocol(ProtocolError::PacketTooLarge))?;
    let end = *cursor + 2 + data.len();
    let slot = buf.get_mut(*cursor..end).ok_or(MqttError::BufferTooSmall)?;
    slot[..2].copy_from_slice(&len.to_be_bytes());
    slot[2..].copy_from_slice(data);
    *cursor = end;
    Ok(())
}

/// Writes `content` after a fixed header built for it and returns the frame length.
///
/// The body is first written at offset 5 (room for the largest fixed header) and then
/// moved down once the size of the remaining-length field is known.
fn finish_frame(
    buf: &mut [u8],
    packet_type: PacketType,
    flags: u8,
    content_start: usize,
    content_end: usize,
) -> CodecResult<usize> {
    let remaining_len = content_end - content_start;
    let header = FixedHeader::new(packet_type, flags, remaining_len);
    let header_len = header.encode(buf)?;
    buf.copy_within(content_start..content_end, header_len);
    Ok(header_len + remaining_len)
}

impl<'a> EncodePacket for Connect<'a> {
    /// Encodes the packet using `self.protocol_version`; `version` is ignored because a
    /// `CONNECT` announces its own level.
    fn encode(&self, buf: &mut [u8], _version: ProtocolVersion) -> CodecResult<usize> {
        let version = self.protocol_version;
        let content_start = 5;
        let mut cursor = content_start;
        cursor += write_utf8_string(
            buf.get_mut(cursor..).ok_or(MqttError::BufferTooSmall)?,
            version.protocol_name(),
        )?;
        let slot = buf
            .get_mut(cursor..cursor + 4)
            .ok_or(MqttError::BufferTooSmall)?;
        slot[0] = version.level();
        slot[1] = self.flags().to_byte();
        slot[2..4].copy_from_slice(&self.keep_alive.to_be_bytes());
        cursor += 4;
        if version == ProtocolVersion::V5 {
            self.properties.encode(&mut cursor, buf)?;
        }
        write_binary_data(&mut cursor, buf, self.client_id.as_bytes())?;
        if let Some(will) = &self.will {
            if version == ProtocolVersion::V5 {
                will.properties.encode(&mut cursor, buf)?;
            }
            write_binary_data(&mut cursor, buf, will.topic.as_bytes())?;
            write_binary_data(&mut cursor, buf, will.payload)?;
        }
        if let Some(username) = self.username {
            write_binary_data(&mut cursor, buf, username.as_bytes())?;
        }
        if let Some(password) = self.password {
            write_binary_data(&mut cursor, buf, password)?;
        }
        finish_frame(buf, PacketType::Connect, 0, content_start, cursor)
    }
}

impl<'a> DecodePacket<'a> for Connect<'a> {
    /// Decodes a complete `CONNECT` frame.
    ///
    /// Optional payload fields are read only when their connect flag is set, and the
    /// frame must end exactly where the last field ends.
    fn decode(buf: &'a [u8]) -> CodecResult<Self> {
        let header = FixedHeader::decode(buf)?;
        if header.packet_type != PacketType::Connect {
            return Err(MqttError::Protocol(ProtocolError::InvalidPacketType(
                header.packet_type.code(),
            )));
        }
        if header.flags != 0 {
            return Err(MALFORMED);
        }
        let frame = &buf[..header.frame_len()];
        let mut cursor = header.header_len;

        let protocol_name = read_utf8_string(&mut cursor, frame)?;
        if protocol_name != "MQTT" && protocol_name != "MQIsdp" {
            return Err(MqttError::Protocol(ProtocolError::InvalidProtocolName));
        }
        let protocol_version =
            ProtocolVersion::try_from(read_u8(&mut cursor, frame)?).map_err(MqttError::Protocol)?;
        if protocol_name != protocol_version.protocol_name() {
            return Err(MqttError::Protocol(ProtocolError::InvalidProtocolName));
        }
        let v5 = protocol_version == ProtocolVersion::V5;

        let flags = ConnectFlags::from_byte(read_u8(&mut cursor, frame)?)
            .map_err(MqttError::Protocol)?;
        // MQTT 5 allows a password without a username; earlier levels do not.
        if flags.password && !flags.username && !v5 {
            return Err(MALFORMED);
        }
        let keep_alive = read_u16(&mut cursor, frame)?;
        let properties = if v5 {
            read_properties(&mut cursor, frame)?
        } else {
            Properties::new()
        };

        let client_id = read_utf8_string(&mut cursor, frame)?;
        let will = if flags.will {
            let properties = if v5 {
                read_properties(&mut cursor, frame)?
            } else {
                Properties::new()
            };
            Some(LastWill {
                properties,
                topic: read_utf8_string(&mut cursor, frame)?,
                payload: read_binary_data(&mut cursor, frame)?,
                qos: flags.will_qos,
                retain: flags.will_retain,
            })
        } else {
            None
        };
        let username = if flags.username {
            Some(read_utf8_string(&mut cursor, frame)?)
        } else {
            None
        };
        let password = if flags.password {
            Some(read_binary_data(&mut cursor, frame)?)
        } else {
            None
        };

        if cursor != frame.len() {
            return Err(MALFORMED);
        }

        Ok(Self {
            protocol_version,
            clean_session: flags.clean_session,
            keep_alive,
            properties,
            client_id,
            will,
            username,
            password,
        })
    }
}

// --- CONNACK Packet ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnAck {
    pub session_present: bool,
    pub reason_code: ConnectReasonCode,
}

impl ConnAck {
    pub fn new(session_present: bool, reason_code: ConnectReasonCode) -> Self {
        Self {
            session_present,
            reason_code,
        }
    }

    /// A successful acknowledgement without a resumed session.
    pub fn accepted() -> Self {
        Self::new(false, ConnectReasonCode::Success)
    }
}

impl EncodePacket for ConnAck {
    /// MQTT 3.x produces exactly four bytes; MQTT 5 appends an empty property block.
    fn encode(&self, buf: &mut [u8], version: ProtocolVersion) -> CodecResult<usize> {
        let v5 = version == ProtocolVersion::V5;
        let len = if v5 { 5 } else { 4 };
        let out = buf.get_mut(..len).ok_or(MqttError::BufferTooSmall)?;
        out[0] = PacketType::ConnAck.code() << 4;
        out[1] = (len - 2) as u8;
        out[2] = self.session_present as u8;
        out[3] = self.reason_code.code(version);
        if v5 {
            out[4] = 0;
        }
        Ok(len)
    }
}

impl<'a> DecodePacket<'a> for ConnAck {
    /// A remaining length above 2 marks an MQTT 5 acknowledgement, which selects how the
    /// reason code is interpreted.
    fn decode(buf: &'a [u8]) -> CodecResult<Self> {
        let header = FixedHeader::decode(buf)?;
        if header.packet_type != PacketType::ConnAck {
            return Err(MqttError::Protocol(ProtocolError::InvalidPacketType(
                header.packet_type.code(),
            )));
        }
        if header.remaining_length < 2 {
            return Err(MALFORMED);
        }
        let frame = &buf[..header.frame_len()];
        let mut cursor = header.header_len;
        let ack_flags = read_u8(&mut cursor, frame)?;
        if ack_flags & 0xFE != 0 {
            return Err(MALFORMED);
        }
        let version = if header.remaining_length > 2 {
            ProtocolVersion::V5
        } else {
            ProtocolVersion::V3_1_1
        };
        let reason_code = ConnectReasonCode::from_code(read_u8(&mut cursor, frame)?, version);
        if version == ProtocolVersion::V5 {
            read_properties(&mut cursor, frame)?;
        }
        if cursor != frame.len() {
            return Err(MALFORMED);
        }
        Ok(Self {
            session_present: ack_flags & 0x01 != 0,
            reason_code,
        })
    }
}

/// Encodes a successful MQTT 3.1.1 `CONNACK`: `[0x20, 0x02, session_present, 0x00]`.
pub fn encode_connack(session_present: bool) -> [u8; 4] {
    [
        PacketType::ConnAck.code() << 4,
        0x02,
        session_present as u8,
        ConnectReasonCode::Success.code(ProtocolVersion::V3_1_1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_header_of_bare_connect() {
        let header = FixedHeader::decode(&[0x10, 0x00, 0xAA, 0xBB]).unwrap();
        assert_eq!(header.packet_type, PacketType::Connect);
        assert_eq!(header.flags, 0);
        assert_eq!(header.remaining_length, 0);
        assert_eq!(header.frame_len(), 2);
    }

    #[test]
    fn fixed_header_of_connack() {
        let header = FixedHeader::decode(&[0x20, 0x02, 0x01, 0x00]).unwrap();
        assert_eq!(header.packet_type, PacketType::ConnAck);
        assert_eq!(header.remaining_length, 2);
        assert_eq!(header.header_len, 2);
    }

    #[test]
    fn fixed_header_keeps_flags_nibble() {
        let header = FixedHeader::decode(&[0x3B, 0x00]).unwrap();
        assert_eq!(header.packet_type, PacketType::Publish);
        assert_eq!(header.flags, 0x0B);
    }

    #[test]
    fn fixed_header_rejects_short_buffers() {
        assert_eq!(FixedHeader::decode(&[]), Err(MALFORMED));
        assert_eq!(FixedHeader::decode(&[0x10]), Err(MALFORMED));
    }

    #[test]
    fn fixed_header_rejects_missing_body() {
        assert_eq!(FixedHeader::decode(&[0x10, 0x05, 0x00]), Err(MALFORMED));
        // continuation bit set on the last available byte
        assert_eq!(FixedHeader::decode(&[0x30, 0x80]), Err(MALFORMED));
    }

    #[test]
    fn fixed_header_multi_byte_remaining_length() {
        let mut frame = [0u8; 3 + 200];
        frame[0] = 0x30;
        frame[1] = 0xC8;
        frame[2] = 0x01;
        let header = FixedHeader::decode(&frame).unwrap();
        assert_eq!(header.remaining_length, 200);
        assert_eq!(header.header_len, 3);
        assert_eq!(header.frame_len(), frame.len());
    }

    #[test]
    fn fixed_header_parse_waits_for_length() {
        assert_eq!(FixedHeader::parse(&[]), Ok(None));
        assert_eq!(FixedHeader::parse(&[0x10]), Ok(None));
        assert_eq!(FixedHeader::parse(&[0x10, 0x80]), Ok(None));
        let header = FixedHeader::parse(&[0x10, 0x80, 0x01]).unwrap().unwrap();
        assert_eq!(header.remaining_length, 128);
        assert_eq!(header.frame_len(), 131);
    }

    #[test]
    fn encode_connack_bytes() {
        assert_eq!(encode_connack(false), [0x20, 0x02, 0x00, 0x00]);
        assert_eq!(encode_connack(true), [0x20, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn connack_fixed_header_round_trip() {
        let bytes = encode_connack(true);
        let header = FixedHeader::decode(&bytes).unwrap();
        assert_eq!(header.packet_type, PacketType::ConnAck);
        assert_eq!(header.remaining_length, 2);

        let ack = ConnAck::decode(&bytes).unwrap();
        assert!(ack.session_present);
        assert_eq!(ack.reason_code, ConnectReasonCode::Success);
    }

    #[test]
    fn connack_encoding_depends_on_version() {
        let refused = ConnAck::new(false, ConnectReasonCode::UnacceptableProtocolVersion);
        let mut buf = [0u8; 8];

        let len = refused.encode(&mut buf, ProtocolVersion::V3_1_1).unwrap();
        assert_eq!(&buf[..len], &[0x20, 0x02, 0x00, 0x01]);

        let len = refused.encode(&mut buf, ProtocolVersion::V5).unwrap();
        assert_eq!(&buf[..len], &[0x20, 0x03, 0x00, 0x84, 0x00]);
        assert_eq!(ConnAck::decode(&buf[..len]).unwrap(), refused);

        let mut tiny = [0u8; 3];
        assert_eq!(
            ConnAck::accepted().encode(&mut tiny, ProtocolVersion::V3_1_1),
            Err(MqttError::BufferTooSmall)
        );
    }

    #[test]
    fn connack_with_trailing_bytes_is_malformed() {
        let bytes = [0x20, 0x04, 0x00, 0x00, 0x00, 0xFF];
        assert_eq!(
            ConnAck::decode(&bytes),
            Err(MqttError::Protocol(ProtocolError::MalformedPacket))
        );
    }

    #[test]
    fn connect_flags_validation() {
        assert_eq!(
            ConnectFlags::from_byte(0x01),
            Err(ProtocolError::MalformedPacket)
        );
        // will QoS 3
        assert_eq!(
            ConnectFlags::from_byte(0x1C),
            Err(ProtocolError::MalformedPacket)
        );
        // will retain without will flag
        assert_eq!(
            ConnectFlags::from_byte(0x20),
            Err(ProtocolError::MalformedPacket)
        );
        let flags = ConnectFlags::from_byte(0xEE).unwrap();
        assert!(flags.clean_session && flags.will && flags.will_retain);
        assert!(flags.username && flags.password);
        assert_eq!(flags.will_qos, QoS::AtLeastOnce);
        assert_eq!(flags.to_byte(), 0xEE);
    }

    /// CONNECT as sent by a typical MQTT 3.1.1 client library.
    const CONNECT_V311: [u8; 24] = [
        0x10, 0x16, // fixed header
        0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
        0x04, // level
        0x02, // clean session
        0x00, 0x3C, // keep alive
        0x00, 0x0A, b'm', b'q', b't', b't', b'j', b's', b'_', b'4', b'2', b'a',
    ];

    #[test]
    fn decode_connect_v311() {
        let connect = Connect::decode(&CONNECT_V311).unwrap();
        assert_eq!(connect.protocol_version, ProtocolVersion::V3_1_1);
        assert!(connect.clean_session);
        assert_eq!(connect.keep_alive, 60);
        assert_eq!(connect.client_id, "mqttjs_42a");
        assert!(connect.will.is_none());
        assert!(connect.username.is_none());
        assert!(connect.password.is_none());
        assert!(connect.properties.is_empty());
    }

    #[test]
    fn decode_connect_rejects_truncation_and_trailing_bytes() {
        let mut short = CONNECT_V311;
        short[1] = 0x15;
        assert_eq!(Connect::decode(&short[..23]), Err(MALFORMED));

        let mut long = [0u8; 25];
        long[..24].copy_from_slice(&CONNECT_V311);
        long[1] = 0x17;
        assert_eq!(Connect::decode(&long), Err(MALFORMED));
    }

    #[test]
    fn decode_connect_checks_protocol_name_and_level() {
        let mut bad_level = CONNECT_V311;
        bad_level[8] = 0x07;
        assert_eq!(
            Connect::decode(&bad_level),
            Err(MqttError::Protocol(ProtocolError::UnsupportedProtocolVersion(7)))
        );

        let mut bad_name = CONNECT_V311;
        bad_name[4] = b'X';
        assert_eq!(
            Connect::decode(&bad_name),
            Err(MqttError::Protocol(ProtocolError::InvalidProtocolName))
        );

        let mut mismatched = CONNECT_V311;
        mismatched[8] = 0x03;
        assert_eq!(
            Connect::decode(&mismatched),
            Err(MqttError::Protocol(ProtocolError::InvalidProtocolName))
        );
    }

    #[test]
    fn decode_connect_rejects_other_packet_types() {
        assert_eq!(
            Connect::decode(&[0xC0, 0x00]),
            Err(MqttError::Protocol(ProtocolError::InvalidPacketType(12)))
        );
        let mut flagged = CONNECT_V311;
        flagged[0] = 0x12;
        assert_eq!(Connect::decode(&flagged), Err(MALFORMED));
    }

    #[test]
    fn connect_with_will_and_credentials_round_trips() {
        let mut connect = Connect::new("sensor-1", 30, false);
        connect.will = Some(LastWill {
            properties: Properties::new(),
            topic: "sensors/1/status",
            payload: b"offline",
            qos: QoS::AtLeastOnce,
            retain: true,
        });
        connect.username = Some("user");
        connect.password = Some(b"secret");

        let mut buf = [0u8; 128];
        let len = connect.encode(&mut buf, ProtocolVersion::V3_1_1).unwrap();
        assert_eq!(buf[0], 0x10);
        assert_eq!(buf[9], 0xEC);

        let decoded = Connect::decode(&buf[..len]).unwrap();
        assert_eq!(decoded, connect);
    }

    #[test]
    fn password_without_username_depends_on_level() {
        let mut connect = Connect::new("c", 0, true);
        connect.password = Some(b"pw");
        let mut buf = [0u8; 64];

        let len = connect.encode(&mut buf, ProtocolVersion::V3_1_1).unwrap();
        assert_eq!(Connect::decode(&buf[..len]), Err(MALFORMED));

        connect.protocol_version = ProtocolVersion::V5;
        let len = connect.encode(&mut buf, ProtocolVersion::V5).unwrap();
        assert_eq!(Connect::decode(&buf[..len]).unwrap().password, Some(&b"pw"[..]));
    }

    #[test]
    fn connect_v5_properties() {
        let session_expiry = [0x00, 0x00, 0x0E, 0x10];
        let will_delay = [0x00, 0x00, 0x00, 0x05];
        let mut connect = Connect::new("v5-client", 10, true);
        connect.protocol_version = ProtocolVersion::V5;
        connect
            .properties
            .push(Property {
                id: 0x11,
                data: &session_expiry,
            })
            .unwrap();
        let mut will_properties = Properties::new();
        will_properties
            .push(Property {
                id: 0x18,
                data: &will_delay,
            })
            .unwrap();
        connect.will = Some(LastWill {
            properties: will_properties,
            topic: "bye",
            payload: b"",
            qos: QoS::AtMostOnce,
            retain: false,
        });

        let mut buf = [0u8; 128];
        let len = connect.encode(&mut buf, ProtocolVersion::V5).unwrap();
        let decoded = Connect::decode(&buf[..len]).unwrap();
        assert_eq!(decoded.properties.get(0x11), Some(&session_expiry[..]));
        let will = decoded.will.unwrap();
        assert_eq!(will.properties.get(0x18), Some(&will_delay[..]));
        assert_eq!(will.topic, "bye");
    }

    #[test]
    fn connect_mqtt31_uses_mqisdp() {
        let mut connect = Connect::new("legacy", 5, true);
        connect.protocol_version = ProtocolVersion::V3_1;
        let mut buf = [0u8; 64];
        let len = connect.encode(&mut buf, ProtocolVersion::V3_1).unwrap();
        assert_eq!(&buf[4..10], b"MQIsdp");
        assert_eq!(
            Connect::decode(&buf[..len]).unwrap().protocol_version,
            ProtocolVersion::V3_1
        );
    }
}
