// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use crate::stream::ByteStream;
use crate::{CodecError, Error};

/// Largest payload of a single data message. See [MS-NNS] 2.2.2.
const DATA_FRAME_LIMIT: usize = 0xfc30;

/// Version bytes carried in every handshake frame.
const HANDSHAKE_VERSION: (u8, u8) = (1, 0);

/// Message types of the NegotiateStream handshake framing. They only ever
/// appear on the wire before `handshake_done` flips; afterwards every frame
/// is a bare length-prefixed data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum HandshakeType {
    Done = 0x14,
    Error = 0x15,
    InProgress = 0x16,
}

impl TryFrom<u8> for HandshakeType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0x14 => Ok(Self::Done),
            0x15 => Ok(Self::Error),
            0x16 => Ok(Self::InProgress),
            other => Err(CodecError::UnknownEnum("handshake message type", other.into())),
        }
    }
}

/// Framing used by the .NET NegotiateStream ([MS-NNS]).
///
/// Before the handshake completes, payloads travel in handshake frames with
/// a 5-byte header; afterwards they travel in data frames prefixed with a
/// 4-byte little-endian length. The transition is one-way and is driven by
/// the peer reporting handshake completion.
pub struct NegotiateStream<S> {
    inner: S,
    handshake_done: bool,
}

impl<S: ByteStream> NegotiateStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            handshake_done: false,
        }
    }

    /// A NegotiateStream over a transport whose handshake already completed
    /// on another handle of the same connection.
    pub fn established(stream: S) -> Self {
        Self {
            inner: stream,
            handshake_done: true,
        }
    }

    pub fn is_established(&self) -> bool {
        self.handshake_done
    }

    /// Write one security token (handshake phase) or a data payload, split
    /// into as many data frames as its size requires.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.handshake_done {
            // One token per frame; token sizes fit the 16-bit length field.
            debug_assert!(data.len() < 0x10000);
            let mut frame = Vec::with_capacity(5 + data.len());
            frame.push(HandshakeType::InProgress as u8);
            frame.push(HANDSHAKE_VERSION.0);
            frame.push(HANDSHAKE_VERSION.1);
            frame.extend_from_slice(&(data.len() as u16).to_be_bytes());
            frame.extend_from_slice(data);
            self.inner.write_all(&frame)
        } else {
            for chunk in data.chunks(DATA_FRAME_LIMIT) {
                let mut frame = Vec::with_capacity(4 + chunk.len());
                frame.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
                frame.extend_from_slice(chunk);
                self.inner.write_all(&frame)?;
            }
            Ok(())
        }
    }

    /// Read one frame's payload. A handshake frame reporting completion
    /// flips this stream into data framing; a handshake frame reporting an
    /// error surfaces the HRESULT from its trailer.
    pub fn read_frame(&mut self) -> Result<Vec<u8>, Error> {
        if !self.handshake_done {
            let header = self.inner.read_exact(5)?;
            let message_type = HandshakeType::try_from(header[0])?;
            let payload_size = u16::from_be_bytes([header[3], header[4]]) as usize;
            trace!(
                "handshake frame {message_type:?} v{}.{}, {payload_size} byte payload",
                header[1],
                header[2]
            );

            match message_type {
                HandshakeType::Error => {
                    // The trailer is two big-endian words; the second one is
                    // the HRESULT.
                    let trailer = self.inner.read_exact(8)?;
                    let hresult =
                        u32::from_be_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
                    return Err(Error::Negotiate(hresult));
                }
                HandshakeType::Done => {
                    self.handshake_done = true;
                    debug!("NNS handshake done");
                }
                HandshakeType::InProgress => {}
            }

            self.inner.read_exact(payload_size)
        } else {
            let header = self.inner.read_exact(4)?;
            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            self.inner.read_exact(length)
        }
    }

    pub fn close(&mut self) {
        self.inner.close();
    }
}
