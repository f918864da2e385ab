// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

pub mod gssapi;
pub mod negotiate;
pub mod nmf;
pub mod socket;

pub use gssapi::{GssClientContext, GssapiStream, SecurityContext};
pub use negotiate::NegotiateStream;
pub use nmf::NmfClient;
pub use socket::SocketStream;

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};

use crate::Error;

/// Byte-stream interface shared by every layer of the connection stack.
///
/// A session starts out reading and writing a plain socket and may rebind
/// itself to a wrapping stream mid-preamble, so the layers above talk to
/// this trait (usually through a `Box<dyn ByteStream + Send>`) rather than
/// to a concrete stream type.
pub trait ByteStream {
    /// Read exactly `count` bytes, blocking until they have all arrived.
    fn read_exact(&mut self, count: usize) -> Result<Vec<u8>, Error>;

    /// Read whatever the stream has available, up to an internal buffer
    /// size. Used on receive paths where the framing layer already knows
    /// how much payload is outstanding.
    fn read_some(&mut self) -> Result<Vec<u8>, Error>;

    /// Write the entire buffer.
    fn write_all(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Close this stream and every stream beneath it.
    fn close(&mut self);
}

impl<S: ByteStream + ?Sized> ByteStream for Box<S> {
    fn read_exact(&mut self, count: usize) -> Result<Vec<u8>, Error> {
        (**self).read_exact(count)
    }

    fn read_some(&mut self) -> Result<Vec<u8>, Error> {
        (**self).read_some()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        (**self).write_all(data)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// A connected transport endpoint. The stream stack needs blocking reads
/// and writes plus a full-duplex shutdown: tearing a session down must
/// release a peer that is blocked in a read on another handle of the same
/// connection.
pub trait Transport: Read + Write {
    fn shutdown(&mut self);
}

impl Transport for TcpStream {
    fn shutdown(&mut self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }
}

/// Stand-in used while a session detaches its stack to rebind it. Every
/// operation reports a closed stream.
pub struct Detached;

impl ByteStream for Detached {
    fn read_exact(&mut self, _count: usize) -> Result<Vec<u8>, Error> {
        Err(Error::StreamClosed)
    }

    fn read_some(&mut self) -> Result<Vec<u8>, Error> {
        Err(Error::StreamClosed)
    }

    fn write_all(&mut self, _data: &[u8]) -> Result<(), Error> {
        Err(Error::StreamClosed)
    }

    fn close(&mut self) {}
}
