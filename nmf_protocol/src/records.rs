// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use crate::stream::ByteStream;
use crate::{CodecError, Error};

/// Largest number of bytes a variable-length integer may occupy. Five 7-bit
/// groups cover the full u32 range.
const VARINT_MAX_BYTES: usize = 5;

/// Framing modes defined for the Mode record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    SingletonUnsized = 1,
    Duplex = 2,
    Simplex = 3,
    SingletonSized = 4,
}

impl TryFrom<u8> for Mode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            1 => Ok(Self::SingletonUnsized),
            2 => Ok(Self::Duplex),
            3 => Ok(Self::Simplex),
            4 => Ok(Self::SingletonSized),
            other => Err(CodecError::UnknownEnum("mode", other.into())),
        }
    }
}

/// Message encodings defined for the KnownEncoding record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KnownEncoding {
    Utf8 = 3,
    Utf16 = 4,
    UnicodeLittleEndian = 5,
    Mtom = 6,
    Binary = 7,
    BinaryDict = 8,
}

impl TryFrom<u8> for KnownEncoding {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            3 => Ok(Self::Utf8),
            4 => Ok(Self::Utf16),
            5 => Ok(Self::UnicodeLittleEndian),
            6 => Ok(Self::Mtom),
            7 => Ok(Self::Binary),
            8 => Ok(Self::BinaryDict),
            other => Err(CodecError::UnknownEnum("encoding", other.into())),
        }
    }
}

/// The single-byte codes identifying each known record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordCode {
    Version = 0x00,
    Mode = 0x01,
    Via = 0x02,
    KnownEncoding = 0x03,
    UnsizedEnvelopedMessage = 0x05,
    SizedEnvelopedMessage = 0x06,
    End = 0x07,
    Fault = 0x08,
    UpgradeRequest = 0x09,
    UpgradeResponse = 0x0a,
    PreambleAck = 0x0b,
    PreambleEnd = 0x0c,
}

impl TryFrom<u8> for RecordCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0x00 => Ok(Self::Version),
            0x01 => Ok(Self::Mode),
            0x02 => Ok(Self::Via),
            0x03 => Ok(Self::KnownEncoding),
            0x05 => Ok(Self::UnsizedEnvelopedMessage),
            0x06 => Ok(Self::SizedEnvelopedMessage),
            0x07 => Ok(Self::End),
            0x08 => Ok(Self::Fault),
            0x09 => Ok(Self::UpgradeRequest),
            0x0a => Ok(Self::UpgradeResponse),
            0x0b => Ok(Self::PreambleAck),
            0x0c => Ok(Self::PreambleEnd),
            other => Err(CodecError::UnknownRecord(other)),
        }
    }
}

/// One message framing record: a single-byte code followed by that schema's
/// fields in declaration order. Records are plain values; they are built by
/// parsing or by the session layer and never change once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Version { major: u8, minor: u8 },
    Mode(Mode),
    Via(String),
    KnownEncoding(KnownEncoding),
    UnsizedEnvelopedMessage,
    SizedEnvelopedMessage(Vec<u8>),
    End,
    Fault(String),
    UpgradeRequest(String),
    UpgradeResponse,
    PreambleAck,
    PreambleEnd,
}

impl Record {
    pub fn code(&self) -> RecordCode {
        match self {
            Self::Version { .. } => RecordCode::Version,
            Self::Mode(_) => RecordCode::Mode,
            Self::Via(_) => RecordCode::Via,
            Self::KnownEncoding(_) => RecordCode::KnownEncoding,
            Self::UnsizedEnvelopedMessage => RecordCode::UnsizedEnvelopedMessage,
            Self::SizedEnvelopedMessage(_) => RecordCode::SizedEnvelopedMessage,
            Self::End => RecordCode::End,
            Self::Fault(_) => RecordCode::Fault,
            Self::UpgradeRequest(_) => RecordCode::UpgradeRequest,
            Self::UpgradeResponse => RecordCode::UpgradeResponse,
            Self::PreambleAck => RecordCode::PreambleAck,
            Self::PreambleEnd => RecordCode::PreambleEnd,
        }
    }

    /// Parse one record from the front of `data`. Returns the number of
    /// bytes consumed together with the decoded record; on failure nothing
    /// counts as consumed from the caller's buffer.
    pub fn parse(data: &[u8]) -> Result<(usize, Record), CodecError> {
        let mut rest = data;
        let record = Self::decode(&mut rest)?;
        Ok((data.len() - rest.len(), record))
    }

    fn decode(data: &mut &[u8]) -> Result<Record, CodecError> {
        let code = RecordCode::try_from(read_u8(data)?)?;

        Ok(match code {
            RecordCode::Version => Record::Version {
                major: read_u8(data)?,
                minor: read_u8(data)?,
            },
            RecordCode::Mode => Record::Mode(Mode::try_from(read_u8(data)?)?),
            RecordCode::Via => {
                let length = decode_varint_at(data)?;
                Record::Via(read_string(data, length as usize)?)
            }
            RecordCode::KnownEncoding => {
                Record::KnownEncoding(KnownEncoding::try_from(read_u8(data)?)?)
            }
            RecordCode::UnsizedEnvelopedMessage => Record::UnsizedEnvelopedMessage,
            RecordCode::SizedEnvelopedMessage => {
                let size = decode_varint_at(data)?;
                Record::SizedEnvelopedMessage(read_bytes(data, size as usize)?.to_vec())
            }
            RecordCode::End => Record::End,
            RecordCode::Fault => {
                let length = decode_varint_at(data)?;
                Record::Fault(read_string(data, length as usize)?)
            }
            RecordCode::UpgradeRequest => {
                let length = decode_varint_at(data)?;
                Record::UpgradeRequest(read_string(data, length as usize)?)
            }
            RecordCode::UpgradeResponse => Record::UpgradeResponse,
            RecordCode::PreambleAck => Record::PreambleAck,
            RecordCode::PreambleEnd => Record::PreambleEnd,
        })
    }

    /// Parse one record from a stream, suspending wherever the stream does.
    /// Agrees with [`Record::parse`] on every well-formed encoding.
    pub fn parse_stream<S: ByteStream + ?Sized>(stream: &mut S) -> Result<Record, Error> {
        let code = RecordCode::try_from(stream_u8(stream)?)?;

        Ok(match code {
            RecordCode::Version => Record::Version {
                major: stream_u8(stream)?,
                minor: stream_u8(stream)?,
            },
            RecordCode::Mode => Record::Mode(Mode::try_from(stream_u8(stream)?)?),
            RecordCode::Via => {
                let length = read_varint(stream)?;
                Record::Via(stream_string(stream, length as usize)?)
            }
            RecordCode::KnownEncoding => {
                Record::KnownEncoding(KnownEncoding::try_from(stream_u8(stream)?)?)
            }
            RecordCode::UnsizedEnvelopedMessage => Record::UnsizedEnvelopedMessage,
            RecordCode::SizedEnvelopedMessage => {
                let size = read_varint(stream)?;
                Record::SizedEnvelopedMessage(stream.read_exact(size as usize)?)
            }
            RecordCode::End => Record::End,
            RecordCode::Fault => {
                let length = read_varint(stream)?;
                Record::Fault(stream_string(stream, length as usize)?)
            }
            RecordCode::UpgradeRequest => {
                let length = read_varint(stream)?;
                Record::UpgradeRequest(stream_string(stream, length as usize)?)
            }
            RecordCode::UpgradeResponse => Record::UpgradeResponse,
            RecordCode::PreambleAck => Record::PreambleAck,
            RecordCode::PreambleEnd => Record::PreambleEnd,
        })
    }

    /// Encode the record as its code byte followed by each field in
    /// declaration order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![self.code() as u8];

        match self {
            Self::Version { major, minor } => {
                data.push(*major);
                data.push(*minor);
            }
            Self::Mode(mode) => data.push(*mode as u8),
            Self::Via(via) => encode_counted(&mut data, via.as_bytes()),
            Self::KnownEncoding(encoding) => data.push(*encoding as u8),
            Self::UnsizedEnvelopedMessage => {}
            Self::SizedEnvelopedMessage(payload) => encode_counted(&mut data, payload),
            Self::End => {}
            Self::Fault(fault) => encode_counted(&mut data, fault.as_bytes()),
            Self::UpgradeRequest(protocol) => encode_counted(&mut data, protocol.as_bytes()),
            Self::UpgradeResponse => {}
            Self::PreambleAck => {}
            Self::PreambleEnd => {}
        }

        data
    }
}

/// Append a varint length prefix followed by the bytes themselves.
fn encode_counted(data: &mut Vec<u8>, bytes: &[u8]) {
    let length = u32::try_from(bytes.len()).unwrap();
    data.extend_from_slice(&encode_varint(length));
    data.extend_from_slice(bytes);
}

/// Encode `value` as a little-endian 7-bit-group variable-length integer
/// using the fewest bytes possible. The value 0 encodes as a single `0x00`.
pub fn encode_varint(value: u32) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }

    let mut out = Vec::with_capacity(VARINT_MAX_BYTES);
    let mut rest = value;
    while rest > 0 {
        let mut byte = (rest & 0x7f) as u8;
        rest >>= 7;
        if rest > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }

    out
}

/// Decode a variable-length integer from the front of `data`, returning the
/// number of bytes consumed together with the value.
///
/// An all-zero byte terminates the integer: it encodes the value 0 on its
/// own and doubles as an end-of-input sentinel inside a longer encoding.
pub fn decode_varint(data: &[u8]) -> Result<(usize, u32), CodecError> {
    let mut rest = data;
    let value = decode_varint_at(&mut rest)?;
    Ok((data.len() - rest.len(), value))
}

fn decode_varint_at(data: &mut &[u8]) -> Result<u32, CodecError> {
    let mut value: u64 = 0;

    for group in 0..VARINT_MAX_BYTES {
        let byte = read_u8(data)?;
        value |= u64::from(byte & 0x7f) << (7 * group);
        if byte & 0x80 == 0 {
            return u32::try_from(value).map_err(|_| CodecError::MalformedField("varint"));
        }
    }

    Err(CodecError::MalformedField("varint"))
}

/// Decode a variable-length integer from a stream. Same semantics as
/// [`decode_varint`], one byte at a time.
pub fn read_varint<S: ByteStream + ?Sized>(stream: &mut S) -> Result<u32, Error> {
    let mut value: u64 = 0;

    for group in 0..VARINT_MAX_BYTES {
        let byte = stream_u8(stream)?;
        value |= u64::from(byte & 0x7f) << (7 * group);
        if byte & 0x80 == 0 {
            return u32::try_from(value)
                .map_err(|_| Error::Codec(CodecError::MalformedField("varint")));
        }
    }

    Err(Error::Codec(CodecError::MalformedField("varint")))
}

fn read_u8(data: &mut &[u8]) -> Result<u8, CodecError> {
    let (&byte, rest) = data.split_first().ok_or(CodecError::TruncatedInput)?;
    *data = rest;
    Ok(byte)
}

fn read_bytes<'a>(data: &mut &'a [u8], count: usize) -> Result<&'a [u8], CodecError> {
    if data.len() < count {
        return Err(CodecError::TruncatedInput);
    }

    let (taken, rest) = data.split_at(count);
    *data = rest;
    Ok(taken)
}

fn read_string(data: &mut &[u8], count: usize) -> Result<String, CodecError> {
    let bytes = read_bytes(data, count)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

fn stream_u8<S: ByteStream + ?Sized>(stream: &mut S) -> Result<u8, Error> {
    Ok(stream.read_exact(1)?[0])
}

fn stream_string<S: ByteStream + ?Sized>(stream: &mut S, count: usize) -> Result<String, Error> {
    String::from_utf8(stream.read_exact(count)?)
        .map_err(|_| Error::Codec(CodecError::InvalidUtf8))
}
