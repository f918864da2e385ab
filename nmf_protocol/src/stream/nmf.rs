// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::net::{TcpStream, ToSocketAddrs};

use crate::records::{KnownEncoding, Mode, Record};
use crate::stream::{ByteStream, Detached, GssClientContext, GssapiStream, SocketStream};
use crate::{Error, NEGOTIATE_PROTOCOL};

/// A client session speaking the message framing protocol over a stream
/// stack.
///
/// The stack starts as the stream the session was built over; when the
/// preamble requests an authenticated upgrade, the session rebinds itself
/// to a [`GssapiStream`] wrapping the previous stream, and every later read
/// and write goes through that wrapper.
pub struct NmfClient {
    stream: Box<dyn ByteStream + Send>,
    via: String,
    server_principal: Option<String>,
    preamble_acked: bool,
}

impl NmfClient {
    /// A session over an already-connected stream for the service URL
    /// `via`. Passing a server principal requests the authenticated
    /// upgrade during the preamble.
    pub fn new(
        stream: Box<dyn ByteStream + Send>,
        via: impl Into<String>,
        server_principal: Option<String>,
    ) -> Self {
        Self {
            stream,
            via: via.into(),
            server_principal,
            preamble_acked: false,
        }
    }

    /// Connect a TCP session to `addr` for the service URL `via`.
    pub fn connect(
        addr: impl ToSocketAddrs,
        via: impl Into<String>,
        server_principal: Option<String>,
    ) -> Result<Self, Error> {
        let socket = TcpStream::connect(addr)?;
        Ok(Self::new(
            Box::new(SocketStream::new(socket)),
            via,
            server_principal,
        ))
    }

    /// Run the opening preamble: version, mode, addressing and encoding
    /// records, the optional authenticated upgrade, and the end/ack
    /// exchange. The session is ready for messages once this returns.
    pub fn open(&mut self) -> Result<(), Error> {
        let mut preamble = Vec::new();
        preamble.extend_from_slice(&Record::Version { major: 1, minor: 0 }.to_bytes());
        preamble.extend_from_slice(&Record::Mode(Mode::Duplex).to_bytes());
        preamble.extend_from_slice(&Record::Via(self.via.clone()).to_bytes());
        preamble.extend_from_slice(&Record::KnownEncoding(KnownEncoding::BinaryDict).to_bytes());
        self.stream.write_all(&preamble)?;

        if let Some(principal) = &self.server_principal {
            self.stream
                .write_all(&Record::UpgradeRequest(NEGOTIATE_PROTOCOL.to_string()).to_bytes())?;

            match Record::parse_stream(&mut self.stream)? {
                Record::UpgradeResponse => {}
                other => {
                    debug!("upgrade refused with {other:?}");
                    return Err(Error::UpgradeRejected);
                }
            }

            // Rebind the stack to the confidentiality layer. The old stream
            // lives on only as the inner stream of the new one.
            let context = GssClientContext::for_service(principal)?;
            let inner = std::mem::replace(&mut self.stream, Box::new(Detached));
            let mut secure = GssapiStream::new(inner, context);
            secure.negotiate()?;
            self.stream = Box::new(secure);
        }

        self.stream.write_all(&Record::PreambleEnd.to_bytes())?;

        match Record::parse_stream(&mut self.stream)? {
            Record::PreambleAck => {}
            other => {
                debug!("preamble answered with {other:?}");
                return Err(Error::PreambleNotAcked);
            }
        }

        self.preamble_acked = true;
        debug!("preamble acknowledged for {}", self.via);
        Ok(())
    }

    /// Send one opaque message body as a sized envelope.
    pub fn send(&mut self, body: &[u8]) -> Result<(), Error> {
        debug_assert!(self.preamble_acked);
        self.stream
            .write_all(&Record::SizedEnvelopedMessage(body.to_vec()).to_bytes())
    }

    /// Receive one message body.
    ///
    /// A Fault record surfaces as [`Error::ServerFault`] and an End record
    /// as [`Error::PeerClosed`]; both describe the data path rather than a
    /// framing failure.
    pub fn receive(&mut self) -> Result<Vec<u8>, Error> {
        debug_assert!(self.preamble_acked);

        match Record::parse_stream(&mut self.stream)? {
            Record::SizedEnvelopedMessage(payload) => Ok(payload),
            Record::Fault(fault) => Err(Error::ServerFault(fault)),
            Record::End => Err(Error::PeerClosed),
            other => Err(Error::UnexpectedRecord(other.code() as u8)),
        }
    }

    /// End the session: emit an End record and close the stream stack.
    pub fn close(&mut self) -> Result<(), Error> {
        let result = self.stream.write_all(&Record::End.to_bytes());
        self.stream.close();
        result
    }
}
