// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use nmf_protocol::records::*;
use nmf_protocol::stream::ByteStream;
use nmf_protocol::{CodecError, Error};

/// In-memory stream over a fixed byte buffer, for checking that the stream
/// parser agrees with the buffer parser.
struct BufferStream {
    data: Vec<u8>,
    pos: usize,
}

impl BufferStream {
    fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl ByteStream for BufferStream {
    fn read_exact(&mut self, count: usize) -> Result<Vec<u8>, Error> {
        if self.remaining() < count {
            return Err(Error::StreamClosed);
        }

        let taken = self.data[self.pos..self.pos + count].to_vec();
        self.pos += count;
        Ok(taken)
    }

    fn read_some(&mut self) -> Result<Vec<u8>, Error> {
        if self.remaining() == 0 {
            return Err(Error::StreamClosed);
        }

        let taken = self.data[self.pos..].to_vec();
        self.pos = self.data.len();
        Ok(taken)
    }

    fn write_all(&mut self, _data: &[u8]) -> Result<(), Error> {
        unimplemented!("read-only test stream");
    }

    fn close(&mut self) {}
}

#[test]
fn varint_seed_values() {
    assert_eq!(encode_varint(0), vec![0x00]);
    assert_eq!(encode_varint(127), vec![0x7f]);
    assert_eq!(encode_varint(128), vec![0x80, 0x01]);
    assert_eq!(encode_varint(16384), vec![0x80, 0x80, 0x01]);
}

#[test]
fn varint_round_trip_boundaries() {
    let cases: &[(u32, usize)] = &[
        (0, 1),
        (1, 1),
        (0x7f, 1),
        (0x80, 2),
        (0x3fff, 2),
        (0x4000, 3),
        (0x1f_ffff, 3),
        (0x20_0000, 4),
        (0xfff_ffff, 4),
        (0x1000_0000, 5),
        (u32::MAX, 5),
    ];

    for &(value, expected_len) in cases {
        let encoded = encode_varint(value);
        assert_eq!(encoded.len(), expected_len, "length of {value:#x}");
        assert_eq!(decode_varint(&encoded), Ok((expected_len, value)));
    }
}

#[test]
fn varint_zero_sentinel_terminates() {
    // A 0x00 continuation byte ends the integer with the value accumulated
    // so far.
    assert_eq!(decode_varint(&[0x80, 0x00]), Ok((2, 0)));
    assert_eq!(decode_varint(&[0x00, 0x55]), Ok((1, 0)));
}

#[test]
fn varint_overlong_rejected() {
    assert_eq!(
        decode_varint(&[0x80, 0x80, 0x80, 0x80, 0x80]),
        Err(CodecError::MalformedField("varint"))
    );

    // Five full groups exceed the u32 range.
    assert_eq!(
        decode_varint(&[0xff, 0xff, 0xff, 0xff, 0x7f]),
        Err(CodecError::MalformedField("varint"))
    );
}

#[test]
fn varint_truncated() {
    assert_eq!(decode_varint(&[]), Err(CodecError::TruncatedInput));
    assert_eq!(decode_varint(&[0x80]), Err(CodecError::TruncatedInput));
}

#[test]
fn version_record_bytes() {
    let record = Record::Version { major: 1, minor: 0 };
    assert_eq!(record.to_bytes(), vec![0x00, 0x01, 0x00]);
    assert_eq!(Record::parse(&[0x00, 0x01, 0x00]), Ok((3, record)));
}

#[test]
fn via_record_bytes() {
    let record = Record::Via("net.tcp://h/s".to_string());
    let encoded = record.to_bytes();

    let mut expected = vec![0x02, 0x0d];
    expected.extend_from_slice(b"net.tcp://h/s");
    assert_eq!(encoded, expected);
    assert_eq!(Record::parse(&encoded), Ok((encoded.len(), record)));
}

#[test]
fn sized_enveloped_record_bytes() {
    let record = Record::SizedEnvelopedMessage(vec![0xaa, 0xbb, 0xcc]);
    assert_eq!(record.to_bytes(), vec![0x06, 0x03, 0xaa, 0xbb, 0xcc]);
    assert_eq!(
        Record::parse(&[0x06, 0x03, 0xaa, 0xbb, 0xcc]),
        Ok((5, record))
    );
}

#[test]
fn all_schemas_round_trip() {
    let records = vec![
        Record::Version { major: 1, minor: 0 },
        Record::Mode(Mode::Duplex),
        Record::Via("net.tcp://server/service".to_string()),
        Record::KnownEncoding(KnownEncoding::BinaryDict),
        Record::UnsizedEnvelopedMessage,
        Record::SizedEnvelopedMessage((0..200u8).collect()),
        Record::End,
        Record::Fault("http://schemas/faults/EndpointUnavailable".to_string()),
        Record::UpgradeRequest("application/negotiate".to_string()),
        Record::UpgradeResponse,
        Record::PreambleAck,
        Record::PreambleEnd,
    ];

    for record in records {
        let encoded = record.to_bytes();

        // Buffer parser consumes exactly the encoding and round-trips.
        assert_eq!(
            Record::parse(&encoded),
            Ok((encoded.len(), record.clone())),
            "buffer round trip of {record:?}"
        );

        // The stream parser agrees and leaves nothing behind.
        let mut stream = BufferStream::new(encoded);
        let parsed = Record::parse_stream(&mut stream).expect("stream parse");
        assert_eq!(parsed, record);
        assert_eq!(stream.remaining(), 0);
    }
}

#[test]
fn parse_consumes_one_record_at_a_time() {
    let mut data = Record::Version { major: 1, minor: 0 }.to_bytes();
    data.extend_from_slice(&Record::Mode(Mode::Duplex).to_bytes());
    data.extend_from_slice(&Record::End.to_bytes());

    let (consumed, first) = Record::parse(&data).unwrap();
    assert_eq!(first, Record::Version { major: 1, minor: 0 });

    let (consumed2, second) = Record::parse(&data[consumed..]).unwrap();
    assert_eq!(second, Record::Mode(Mode::Duplex));

    let (_, third) = Record::parse(&data[consumed + consumed2..]).unwrap();
    assert_eq!(third, Record::End);
}

#[test]
fn unknown_record_code() {
    // 0x04 is a hole in the code space; 0x42 is far outside it.
    assert_eq!(
        Record::parse(&[0x04, 0x01, 0x02]),
        Err(CodecError::UnknownRecord(0x04))
    );
    assert_eq!(Record::parse(&[0x42]), Err(CodecError::UnknownRecord(0x42)));
}

#[test]
fn truncated_record() {
    assert_eq!(Record::parse(&[]), Err(CodecError::TruncatedInput));
    assert_eq!(Record::parse(&[0x00, 0x01]), Err(CodecError::TruncatedInput));

    // Via whose declared length exceeds the remaining bytes.
    assert_eq!(
        Record::parse(&[0x02, 0x0d, b'n', b'e', b't']),
        Err(CodecError::TruncatedInput)
    );
}

#[test]
fn unknown_enum_discriminants() {
    assert_eq!(
        Record::parse(&[0x01, 0x09]),
        Err(CodecError::UnknownEnum("mode", 9))
    );
    assert_eq!(
        Record::parse(&[0x03, 0x01]),
        Err(CodecError::UnknownEnum("encoding", 1))
    );
}

#[test]
fn invalid_utf8_in_string_field() {
    assert_eq!(
        Record::parse(&[0x02, 0x02, 0xff, 0xfe]),
        Err(CodecError::InvalidUtf8)
    );
}
