//! # Control Packet Types
//!
//! The sixteen MQTT control packet type codes carried in the high nibble of the
//! first fixed-header byte, with checked conversion from raw codes.

use crate::error::ProtocolError;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketType {
    Reserved = 0,
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    /// Every packet type, indexed by its code.
    pub const ALL: [PacketType; 16] = [
        PacketType::Reserved,
        PacketType::Connect,
        PacketType::ConnAck,
        PacketType::Publish,
        PacketType::PubAck,
        PacketType::PubRec,
        PacketType::PubRel,
        PacketType::PubComp,
        PacketType::Subscribe,
        PacketType::SubAck,
        PacketType::Unsubscribe,
        PacketType::UnsubAck,
        PacketType::PingReq,
        PacketType::PingResp,
        PacketType::Disconnect,
        PacketType::Auth,
    ];

    /// The 4-bit code of this packet type.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable name used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            PacketType::Reserved => "Reserved",
            PacketType::Connect => "Connect",
            PacketType::ConnAck => "Connack",
            PacketType::Publish => "Publish",
            PacketType::PubAck => "Puback",
            PacketType::PubRec => "Pubrec",
            PacketType::PubRel => "Pubrel",
            PacketType::PubComp => "Pubcomp",
            PacketType::Subscribe => "Subscribe",
            PacketType::SubAck => "Suback",
            PacketType::Unsubscribe => "Unsubscribe",
            PacketType::UnsubAck => "Unsuback",
            PacketType::PingReq => "Pingreq",
            PacketType::PingResp => "Pingresp",
            PacketType::Disconnect => "Disconnect",
            PacketType::Auth => "Auth",
        }
    }

    /// Extracts the packet type from the first byte of a fixed header.
    pub fn from_header_byte(byte: u8) -> Self {
        // A nibble is always within the table.
        Self::ALL[(byte >> 4) as usize]
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or(ProtocolError::InvalidPacketType(code))
    }
}

/// Looks up the name of a raw packet type code.
///
/// Codes above 15 cannot come from a header nibble and are rejected with
/// `InvalidPacketType` instead of being read past the table.
pub fn name_of(code: u8) -> Result<&'static str, ProtocolError> {
    PacketType::try_from(code).map(PacketType::name)
}
