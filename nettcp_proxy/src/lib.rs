// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use nmf_protocol::records::{Record, RecordCode};
use nmf_protocol::stream::{ByteStream, Detached, GssClientContext, GssapiStream, SocketStream};
use nmf_protocol::{Error, NEGOTIATE_PROTOCOL};

/// Which way a forwarded record travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::ClientToServer => "c>s",
            Self::ServerToClient => "s>c",
        })
    }
}

/// Append-only journal of the records a session forwarded, one
/// tab-separated row per record: timestamp, client address, direction, and
/// the record bytes in lowercase hex.
pub struct TraceSink {
    file: Mutex<File>,
}

impl TraceSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            file: Mutex::new(File::create(path)?),
        })
    }

    /// Journal one record. Rows are written whole and flushed, so the two
    /// forwarding directions never interleave within a line.
    fn record(&self, peer: SocketAddr, direction: Direction, data: &[u8]) {
        let row = format!(
            "{}\t{}\t{}\t{}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            peer,
            direction,
            to_hex(data),
        );

        let mut file = self.file.lock().unwrap();
        if let Err(e) = file.write_all(row.as_bytes()).and_then(|()| file.flush()) {
            warn!("Error writing trace row: {e}");
        }
    }
}

fn to_hex(data: &[u8]) -> String {
    use fmt::Write as _;

    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of one proxied connection pair.
///
/// Either forwarding half moves `OPEN → CLOSING` when it forwards an End
/// record; whichever half forwards the second End (or fails) finishes the
/// session, and a half that requested the end first blocks until then.
struct EndState {
    state: Mutex<u8>,
    cond: Condvar,
}

impl EndState {
    fn new() -> Self {
        Self {
            state: Mutex::new(OPEN),
            cond: Condvar::new(),
        }
    }

    /// Record that this half forwarded an End record. Returns true when the
    /// peer half had already done so, i.e. the session is finished.
    fn mark_end(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == OPEN {
            *state = CLOSING;
            return false;
        }

        *state = CLOSED;
        self.cond.notify_all();
        true
    }

    /// Mark the session finished and wake a half waiting on the end dance.
    fn finish(&self) {
        let mut state = self.state.lock().unwrap();
        *state = CLOSED;
        self.cond.notify_all();
    }

    /// Block until the peer half finishes the session.
    fn wait_finished(&self) {
        let mut state = self.state.lock().unwrap();
        while *state != CLOSED {
            state = self.cond.wait(state).unwrap();
        }
    }

    fn is_finished(&self) -> bool {
        *self.state.lock().unwrap() == CLOSED
    }
}

/// The intercepting proxy: accepts net.tcp clients, connects each of them
/// to the target service, and forwards records in both directions.
///
/// When a server principal is configured, the proxy interposes an
/// authenticated upgrade on the server side of each session; the client
/// side stays in the clear, which is the point of the interception.
pub struct Proxy {
    pub target_host: String,
    pub target_port: u16,

    /// Server principal to negotiate the upgrade with; `None` forwards
    /// everything without upgrading.
    pub server_principal: Option<String>,

    pub trace: Option<TraceSink>,
}

impl Proxy {
    /// Accept and serve connections forever, one session per thread.
    pub fn run(self, listener: TcpListener) -> ! {
        let proxy = Arc::new(self);

        loop {
            match listener.accept() {
                Ok((socket, peer)) => {
                    let proxy = Arc::clone(&proxy);
                    thread::spawn(move || {
                        info!("New connection from {peer}");
                        if let Err(e) = proxy.handle_connection(socket, peer) {
                            warn!("Session with {peer} failed: {e}");
                        }
                    });
                }
                Err(e) => warn!("Error accepting connection: {e}"),
            }
        }
    }

    /// Serve one accepted client: connect to the target and run the two
    /// forwarding halves until the session ends.
    fn handle_connection(&self, client: TcpStream, peer: SocketAddr) -> Result<(), Error> {
        let server = TcpStream::connect((self.target_host.as_str(), self.target_port))?;
        debug!(
            "Connected to {}:{} on behalf of {peer}",
            self.target_host, self.target_port
        );

        let client_read = SocketStream::new(client.try_clone()?);
        let client_write = SocketStream::new(client);
        let server_read = SocketStream::new(server.try_clone()?);
        let server_write: Box<dyn ByteStream + Send> = Box::new(SocketStream::new(server));

        let end_state = EndState::new();

        thread::scope(|scope| {
            self.forward_client_records(
                scope,
                peer,
                client_read,
                client_write,
                server_read,
                server_write,
                &end_state,
            )
        })
    }

    /// The client→server half. Runs on the session's own thread, forwards
    /// every client record, interposes the authenticated upgrade right
    /// after KnownEncoding, and only then starts the server→client half —
    /// otherwise that half would read handshake frames as records.
    #[allow(clippy::too_many_arguments)]
    fn forward_client_records<'scope, 'env>(
        &'env self,
        scope: &'scope thread::Scope<'scope, 'env>,
        peer: SocketAddr,
        mut client_read: SocketStream<TcpStream>,
        client_write: SocketStream<TcpStream>,
        server_read: SocketStream<TcpStream>,
        mut server_write: Box<dyn ByteStream + Send>,
        end_state: &'env EndState,
    ) -> Result<(), Error> {
        let mut pending = Some((server_read, client_write));

        let result = loop {
            let record = match Record::parse_stream(&mut client_read) {
                Ok(record) => record,
                Err(_) if end_state.is_finished() => break Ok(()),
                Err(e) => break Err(e),
            };

            debug!("Client record: {record:?}");
            let data = record.to_bytes();
            if let Some(trace) = &self.trace {
                trace.record(peer, Direction::ClientToServer, &data);
            }

            if let Err(e) = server_write.write_all(&data) {
                break Err(e);
            }

            match record.code() {
                RecordCode::KnownEncoding => {
                    // The preamble reached the point where the server side
                    // may upgrade and the server may start talking back.
                    if let Some((server_read, client_write)) = pending.take() {
                        let server_read: Box<dyn ByteStream + Send> =
                            match &self.server_principal {
                                Some(principal) => {
                                    match upgrade_server_side(
                                        &mut server_write,
                                        server_read,
                                        principal,
                                    ) {
                                        Ok(read_half) => {
                                            info!("Negotiated the server upgrade for {peer}");
                                            read_half
                                        }
                                        Err(e) => break Err(e),
                                    }
                                }
                                None => Box::new(server_read),
                            };

                        let trace = self.trace.as_ref();
                        scope.spawn(move || {
                            forward_server_records(
                                server_read,
                                client_write,
                                peer,
                                trace,
                                end_state,
                            );
                        });
                    }
                }
                RecordCode::End => {
                    if end_state.mark_end() {
                        info!("Client confirmed end for {peer}");
                        break Ok(());
                    }

                    info!("Client requested end for {peer}");
                    end_state.wait_finished();
                    break Ok(());
                }
                _ => {}
            }
        };

        client_read.close();
        server_write.close();
        if let Some((mut server_read, mut client_write)) = pending.take() {
            server_read.close();
            client_write.close();
        }
        end_state.finish();

        result
    }
}

/// The server→client half: forwards records read from the server until the
/// session ends or the peer half tears the socket pair down.
fn forward_server_records(
    mut server_read: Box<dyn ByteStream + Send>,
    mut client_write: SocketStream<TcpStream>,
    peer: SocketAddr,
    trace: Option<&TraceSink>,
    end_state: &EndState,
) {
    debug!("Handling data coming from the server for {peer}");

    loop {
        let record = match Record::parse_stream(&mut server_read) {
            Ok(record) => record,
            Err(e) => {
                if !end_state.is_finished() {
                    warn!("Error reading from the server for {peer}: {e}");
                }
                break;
            }
        };

        debug!("Got from server: {record:?}");
        let data = record.to_bytes();
        if let Some(trace) = trace {
            trace.record(peer, Direction::ServerToClient, &data);
        }

        if let Err(e) = client_write.write_all(&data) {
            warn!("Error writing to client {peer}: {e}");
            break;
        }

        if record.code() == RecordCode::End {
            if end_state.mark_end() {
                info!("Server confirmed end for {peer}");
                break;
            }

            info!("Server requested end for {peer}");
            end_state.wait_finished();
            break;
        }
    }

    server_read.close();
    client_write.close();
    end_state.finish();
}

/// Interpose the authenticated upgrade toward the server: request the
/// negotiate protocol, wrap the server-facing stream, and run the token
/// exchange. The wrapped stream replaces `server_write`; the returned read
/// half (sharing the same security context) belongs to the server→client
/// task. The client-facing stream is never upgraded.
fn upgrade_server_side(
    server_write: &mut Box<dyn ByteStream + Send>,
    server_read: SocketStream<TcpStream>,
    principal: &str,
) -> Result<Box<dyn ByteStream + Send>, Error> {
    server_write.write_all(&Record::UpgradeRequest(NEGOTIATE_PROTOCOL.to_string()).to_bytes())?;

    match Record::parse_stream(server_write)? {
        Record::UpgradeResponse => {}
        other => {
            warn!("Server refused the upgrade with {other:?}");
            return Err(Error::UpgradeRejected);
        }
    }

    let context = GssClientContext::for_service(principal)?;
    let inner = std::mem::replace(server_write, Box::new(Detached));
    let mut secure = GssapiStream::new(inner, context);
    secure.negotiate()?;

    let read_half: Box<dyn ByteStream + Send> = Box::new(secure.share(server_read));
    *server_write = Box::new(secure);

    Ok(read_half)
}
