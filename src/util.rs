//! # MQTT Serialization Utilities
//!
//! This module provides helper functions for reading and writing MQTT-specific data types
//! from and to byte buffers, such as variable-byte integers, length-prefixed strings and
//! MQTT v5 property blocks.

use crate::error::{MqttError, ProtocolError};
use crate::packet::{Properties, Property};
use crate::transport::ErrorPlaceHolder;

/// Result type of the transport-independent codec helpers.
pub type CodecResult<T> = Result<T, MqttError<ErrorPlaceHolder>>;

const MALFORMED: MqttError<ErrorPlaceHolder> = MqttError::Protocol(ProtocolError::MalformedPacket);

/// Largest value a variable byte integer can carry (four bytes of seven bits).
pub const MAX_VARIABLE_BYTE_INTEGER: usize = 268_435_455;

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// This is the encoding MQTT uses for the remaining length and for property lengths.
/// Fails with `MalformedPacket` if the buffer ends before the last byte or if the
/// integer spans more than four bytes.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> CodecResult<usize> {
    match parse_variable_byte_integer(buf.get(*cursor..).ok_or(MALFORMED)?)? {
        Some((value, len)) => {
            *cursor += len;
            Ok(value)
        }
        None => Err(MALFORMED),
    }
}

/// Parses a variable-byte integer from the start of `buf` without a cursor.
///
/// Returns `Ok(Some((value, bytes_used)))` when complete, `Ok(None)` when the buffer
/// ends before the final byte, and an error when a fifth byte would be needed.
pub fn parse_variable_byte_integer(buf: &[u8]) -> CodecResult<Option<(usize, usize)>> {
    let mut multiplier = 1;
    let mut value = 0;
    for (i, encoded_byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(MALFORMED);
        }
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(MALFORMED);
    }
    Ok(None)
}

/// Writes a variable-byte integer to the buffer, advancing the cursor.
pub fn write_variable_byte_integer(
    cursor: &mut usize,
    buf: &mut [u8],
    mut val: usize,
) -> CodecResult<()> {
    if val > MAX_VARIABLE_BYTE_INTEGER {
        return Err(MqttError::Protocol(ProtocolError::PacketTooLarge));
    }
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(*cursor).ok_or(MqttError::BufferTooSmall)? = encoded_byte;
        *cursor += 1;
        if val == 0 {
            break;
        }
    }
    Ok(())
}

/// Reads a single byte, advancing the cursor.
pub fn read_u8(cursor: &mut usize, buf: &[u8]) -> CodecResult<u8> {
    let byte = *buf.get(*cursor).ok_or(MALFORMED)?;
    *cursor += 1;
    Ok(byte)
}

/// Reads a big-endian two-byte integer, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> CodecResult<u16> {
    let bytes = buf.get(*cursor..*cursor + 2).ok_or(MALFORMED)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Reads binary data (prefixed with a 2-byte length) from the buffer.
pub fn read_binary_data<'a>(cursor: &mut usize, buf: &'a [u8]) -> CodecResult<&'a [u8]> {
    let len = read_u16(cursor, buf)? as usize;
    let data = buf.get(*cursor..*cursor + len).ok_or(MALFORMED)?;
    *cursor += len;
    Ok(data)
}

/// Reads a UTF-8 encoded string (prefixed with a 2-byte length) from the buffer.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> CodecResult<&'a str> {
    let raw = read_binary_data(cursor, buf)?;
    core::str::from_utf8(raw).map_err(|_| MqttError::Protocol(ProtocolError::InvalidUtf8String))
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length) to the buffer.
pub fn write_utf8_string(buf: &mut [u8], s: &str) -> CodecResult<usize> {
    let len = s.len();
    if len > u16::MAX as usize {
        return Err(MqttError::Protocol(ProtocolError::PacketTooLarge));
    }
    let len_bytes = (len as u16).to_be_bytes();

    let required_space = 2 + len;
    let slice = buf
        .get_mut(0..required_space)
        .ok_or(MqttError::BufferTooSmall)?;

    slice[0..2].copy_from_slice(&len_bytes);
    slice[2..].copy_from_slice(s.as_bytes());
    Ok(required_space)
}

/// Wire representation of an MQTT v5 property value.
enum PropertyKind {
    Byte,
    TwoByteInteger,
    FourByteInteger,
    VariableByteInteger,
    Utf8String,
    BinaryData,
    StringPair,
}

fn property_kind(id: u8) -> Option<PropertyKind> {
    use PropertyKind::*;
    let kind = match id {
        0x01 | 0x17 | 0x19 | 0x24 | 0x25 | 0x28 | 0x29 | 0x2A => Byte,
        0x13 | 0x21 | 0x22 | 0x23 => TwoByteInteger,
        0x02 | 0x11 | 0x18 | 0x27 => FourByteInteger,
        0x0B => VariableByteInteger,
        0x03 | 0x08 | 0x12 | 0x15 | 0x1A | 0x1C | 0x1F => Utf8String,
        0x09 | 0x16 => BinaryData,
        0x26 => StringPair,
        _ => return None,
    };
    Some(kind)
}

/// Reads an MQTT v5 property block (length prefix included), advancing the cursor.
///
/// Each property keeps its identifier and the raw bytes of its value, exactly as they
/// appear on the wire. Unknown identifiers and values running past the block are
/// rejected as malformed.
pub fn read_properties<'a>(cursor: &mut usize, buf: &'a [u8]) -> CodecResult<Properties<'a>> {
    let mut properties = Properties::new();
    let prop_len = read_variable_byte_integer(cursor, buf)?;
    let prop_end = cursor.checked_add(prop_len).ok_or(MALFORMED)?;
    let block = buf.get(..prop_end).ok_or(MALFORMED)?;

    while *cursor < prop_end {
        let id = read_u8(cursor, block)?;
        let data_start = *cursor;
        match property_kind(id).ok_or(MALFORMED)? {
            PropertyKind::Byte => *cursor += 1,
            PropertyKind::TwoByteInteger => *cursor += 2,
            PropertyKind::FourByteInteger => *cursor += 4,
            PropertyKind::VariableByteInteger => {
                read_variable_byte_integer(cursor, block)?;
            }
            PropertyKind::Utf8String => {
                read_utf8_string(cursor, block)?;
            }
            PropertyKind::BinaryData => {
                read_binary_data(cursor, block)?;
            }
            PropertyKind::StringPair => {
                read_utf8_string(cursor, block)?;
                read_utf8_string(cursor, block)?;
            }
        }
        let data = block.get(data_start..*cursor).ok_or(MALFORMED)?;
        properties
            .push(Property { id, data })
            .map_err(|_| MqttError::Protocol(ProtocolError::TooManyProperties))?;
    }
    Ok(properties)
}
