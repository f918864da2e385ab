// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use crate::stream::{ByteStream, Transport};
use crate::Error;

/// How many bytes to ask for when the caller takes whatever is available.
const READ_SOME_BUFFER: usize = 4096;

/// A thin adapter between a connected socket and the stream stack.
pub struct SocketStream<S> {
    socket: S,
}

impl<S: Transport> SocketStream<S> {
    pub fn new(socket: S) -> Self {
        Self { socket }
    }
}

impl<S: Transport> ByteStream for SocketStream<S> {
    fn read_exact(&mut self, count: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0; count];
        self.socket.read_exact(&mut buf)?;
        trace!("received {count} bytes");
        Ok(buf)
    }

    fn read_some(&mut self) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0; READ_SOME_BUFFER];
        let received = self.socket.read(&mut buf)?;
        if received == 0 {
            return Err(Error::StreamClosed);
        }

        trace!("received up to {received} bytes");
        buf.truncate(received);
        Ok(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.socket.write_all(data)?;
        self.socket.flush()?;
        trace!("sent {} bytes", data.len());
        Ok(())
    }

    fn close(&mut self) {
        self.socket.shutdown();
    }
}
