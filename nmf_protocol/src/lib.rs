// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

pub mod records;
pub mod stream;

use std::fmt;

/// The upgrade protocol string that requests a NegotiateStream upgrade
/// during the preamble. Always sent as its exact 21 UTF-8 bytes.
pub const NEGOTIATE_PROTOCOL: &str = "application/negotiate";

/// The possible errors that can arise from driving a net.tcp connection,
/// from the record codec up to the client session and the proxy.
#[derive(Debug)]
pub enum Error {
    /// Codec errors are raised while parsing or encoding a record and are
    /// fatal to the session: the framing has no way to resynchronize.
    Codec(CodecError),

    /// The peer closed the stream in the middle of a read.
    StreamClosed,

    /// Any other I/O failure on the underlying transport.
    Stream(std::io::Error),

    /// The NegotiateStream handshake reported a failure. The value is the
    /// HRESULT carried in the error frame's trailer.
    Negotiate(u32),

    /// The security provider rejected a handshake step or a message
    /// protection call.
    AuthFailed(String),

    /// The server did not answer an upgrade request with UpgradeResponse.
    UpgradeRejected,

    /// The server did not acknowledge the end of the preamble.
    PreambleNotAcked,

    /// The peer sent a record that is not valid at this point of the
    /// session.
    UnexpectedRecord(u8),

    /// The server answered the data path with a Fault record.
    ServerFault(String),

    /// The peer ended the session with an End record.
    PeerClosed,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "Codec error: {e}"),
            Self::StreamClosed => write!(f, "Stream closed by the peer"),
            Self::Stream(e) => write!(f, "Stream error: {e}"),
            Self::Negotiate(hresult) => write!(f, "Negotiate error: {hresult:08x}"),
            Self::AuthFailed(detail) => write!(f, "Authentication failed: {detail}"),
            Self::UpgradeRejected => write!(f, "Upgrade to the negotiate protocol not supported"),
            Self::PreambleNotAcked => write!(f, "Preamble end not acked"),
            Self::UnexpectedRecord(code) => write!(f, "Unexpected record {code:#04x}"),
            Self::ServerFault(fault) => write!(f, "Server fault: {fault}"),
            Self::PeerClosed => write!(f, "Peer requested the end of the session"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        // A short read means the peer went away, which the session layers
        // treat differently from a transport failure.
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::StreamClosed
        } else {
            Self::Stream(e)
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// Errors raised by the record codec itself, independent of any transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before the record did.
    TruncatedInput,

    /// The record code is not in the registry of known schemas.
    UnknownRecord(u8),

    /// A field decoder failed, e.g. an over-long variable-length integer.
    MalformedField(&'static str),

    /// A length-prefixed string field did not hold valid UTF-8.
    InvalidUtf8,

    /// A fixed-width enum field held an unknown discriminant.
    UnknownEnum(&'static str, u32),
}

impl std::error::Error for CodecError {}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TruncatedInput => write!(f, "Truncated input"),
            Self::UnknownRecord(code) => write!(f, "Unknown record code {code:#04x}"),
            Self::MalformedField(name) => write!(f, "Malformed field {name}"),
            Self::InvalidUtf8 => write!(f, "Invalid UTF-8 in string field"),
            Self::UnknownEnum(name, value) => {
                write!(f, "Unknown {name} discriminant {value}")
            }
        }
    }
}

/// A "pipe", constructed using socketpair(2), that can be used for testing
/// the stream stack without a real TCP connection.
pub mod pipe {
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

    use std::io::{Read, Write};
    use std::net::Shutdown;
    use std::os::unix::net::UnixStream;

    pub struct Endpoint {
        stream: UnixStream,
    }

    pub fn pipe() -> std::io::Result<(Endpoint, Endpoint)> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )?;

        Ok((
            Endpoint {
                stream: UnixStream::from(a),
            },
            Endpoint {
                stream: UnixStream::from(b),
            },
        ))
    }

    impl Read for Endpoint {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.stream.read(buf)
        }
    }

    impl Write for Endpoint {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.stream.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.stream.flush()
        }
    }

    impl crate::stream::Transport for Endpoint {
        fn shutdown(&mut self) {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }
}
