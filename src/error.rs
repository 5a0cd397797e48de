//! # Error Types
//!
//! This module defines the error types used throughout the broker, from transport
//! failures on a single connection to protocol violations found by the codec and
//! lifecycle errors reported by the connection registry.

use crate::packet::ProtocolVersion;
use crate::packet_type::PacketType;
use crate::transport;

/// The primary error enum for the broker.
///
/// It is generic over the transport error type `T`, so errors raised while serving
/// a connection can carry the concrete error of the underlying stream (TCP, UART).
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// Reading from or writing to the connection failed.
    Transport(T),
    /// A protocol-level error occurred while decoding or validating a packet.
    Protocol(ProtocolError),
    /// The connection was refused and a CONNACK with this code was sent.
    ConnectionRefused(ConnectReasonCode),
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
    /// The peer did not deliver a complete packet in time.
    Timeout,
    /// The registry's processing loop has ended; no connection can be added or removed.
    RegistryClosed,
    /// The registry already tracks its maximum number of connections.
    RegistryFull,
    /// Every connection identifier has been handed out.
    IdsExhausted,
}

impl<T: transport::TransportError> From<T> for MqttError<T> {
    fn from(err: T) -> Self {
        MqttError::Transport(err)
    }
}

impl<T> MqttError<T> {
    /// Converts an error raised by transport-independent code (the codec, the registry)
    /// into an error for a concrete transport.
    ///
    /// `ErrorPlaceHolder` has no values, so the transport arm can never be reached.
    pub fn cast_transport_error(other: MqttError<transport::ErrorPlaceHolder>) -> MqttError<T> {
        match other {
            MqttError::Transport(never) => match never {},
            MqttError::Protocol(p) => MqttError::Protocol(p),
            MqttError::ConnectionRefused(c) => MqttError::ConnectionRefused(c),
            MqttError::BufferTooSmall => MqttError::BufferTooSmall,
            MqttError::Timeout => MqttError::Timeout,
            MqttError::RegistryClosed => MqttError::RegistryClosed,
            MqttError::RegistryFull => MqttError::RegistryFull,
            MqttError::IdsExhausted => MqttError::IdsExhausted,
        }
    }
}

/// Result codes a broker can place in a `CONNACK`.
///
/// MQTT 3.1/3.1.1 and MQTT 5 use different numeric values for the same outcome,
/// so the wire value is chosen with [`ConnectReasonCode::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success,
    /// The broker does not support the requested MQTT protocol level.
    UnacceptableProtocolVersion,
    /// The client identifier is not valid.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// A raw code received from the wire that has no variant here.
    Other(u8),
}

impl ConnectReasonCode {
    /// Returns the wire value of this code for the given protocol version.
    pub fn code(self, version: ProtocolVersion) -> u8 {
        let v5 = version == ProtocolVersion::V5;
        match self {
            Self::Success => 0x00,
            Self::UnacceptableProtocolVersion if v5 => 0x84,
            Self::UnacceptableProtocolVersion => 0x01,
            Self::IdentifierRejected if v5 => 0x85,
            Self::IdentifierRejected => 0x02,
            Self::ServerUnavailable if v5 => 0x88,
            Self::ServerUnavailable => 0x03,
            Self::BadUserNameOrPassword if v5 => 0x86,
            Self::BadUserNameOrPassword => 0x04,
            Self::NotAuthorized if v5 => 0x87,
            Self::NotAuthorized => 0x05,
            Self::Other(code) => code,
        }
    }

    /// Interprets a wire value for the given protocol version.
    pub fn from_code(code: u8, version: ProtocolVersion) -> Self {
        if version == ProtocolVersion::V5 {
            match code {
                0x00 => Self::Success,
                0x84 => Self::UnacceptableProtocolVersion,
                0x85 => Self::IdentifierRejected,
                0x86 => Self::BadUserNameOrPassword,
                0x87 => Self::NotAuthorized,
                0x88 => Self::ServerUnavailable,
                _ => Self::Other(code),
            }
        } else {
            match code {
                0 => Self::Success,
                1 => Self::UnacceptableProtocolVersion,
                2 => Self::IdentifierRejected,
                3 => Self::ServerUnavailable,
                4 => Self::BadUserNameOrPassword,
                5 => Self::NotAuthorized,
                _ => Self::Other(code),
            }
        }
    }
}

/// Enumerates specific MQTT protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// A packet type code outside `0..=15`, or a frame that is not the expected type.
    InvalidPacketType(u8),
    /// A packet was not correctly formed (truncated, trailing bytes, bad flags).
    MalformedPacket,
    /// The peer closed the connection.
    ConnectionClosed,
    /// A complete packet does not fit in the read buffer.
    PacketTooLarge,
    /// A string was not valid UTF-8.
    InvalidUtf8String,
    /// An MQTT v5 packet contained too many properties.
    TooManyProperties,
    /// The CONNECT protocol name does not match its protocol level.
    InvalidProtocolName,
    /// The CONNECT protocol level is not 3, 4 or 5.
    UnsupportedProtocolVersion(u8),
    /// A well-formed packet arrived that is not allowed at this point of the session.
    UnexpectedPacket(PacketType),
}
