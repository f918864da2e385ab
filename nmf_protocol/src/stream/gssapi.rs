// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::sync::{Arc, Mutex};

use libgssapi::context::{ClientCtx, CtxFlags, SecurityContext as _};
use libgssapi::name::Name;
use libgssapi::oid::{GSS_MECH_SPNEGO, GSS_NT_HOSTBASED_SERVICE};

use crate::stream::{ByteStream, NegotiateStream};
use crate::Error;

/// Largest plaintext handed to a single seal call. Each sealed chunk
/// becomes exactly one NegotiateStream payload.
const SEAL_CHUNK_LIMIT: usize = 0xfc00;

/// A security context that can run a token-exchange handshake and then
/// protect messages. One context belongs to exactly one upgraded
/// connection; no application data may pass before it is established.
pub trait SecurityContext {
    /// Advance the handshake with the peer's latest token (`None` on the
    /// first step). Returns the next token to send, if any.
    fn step(&mut self, token: Option<&[u8]>) -> Result<Option<Vec<u8>>, Error>;

    /// True once the handshake has completed and messages may flow.
    fn is_established(&self) -> bool;

    /// Protect one message. One call produces one sealed blob.
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error>;

    /// Undo `seal` for one received blob.
    fn unseal(&mut self, sealed: &[u8]) -> Result<Vec<u8>, Error>;
}

/// An initiator GSSAPI context for a hostbased service, negotiated through
/// SPNEGO and requesting mutual authentication, confidentiality and
/// integrity.
pub struct GssClientContext {
    context: ClientCtx,
}

impl GssClientContext {
    pub fn for_service(principal: &str) -> Result<Self, Error> {
        let name = Name::new(principal.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))
            .map_err(|e| Error::AuthFailed(e.to_string()))?;
        let flags = CtxFlags::GSS_C_MUTUAL_FLAG | CtxFlags::GSS_C_CONF_FLAG | CtxFlags::GSS_C_INTEG_FLAG;

        Ok(Self {
            context: ClientCtx::new(None, name, flags, Some(&GSS_MECH_SPNEGO)),
        })
    }
}

impl SecurityContext for GssClientContext {
    fn step(&mut self, token: Option<&[u8]>) -> Result<Option<Vec<u8>>, Error> {
        match self.context.step(token, None) {
            Ok(Some(token)) => Ok(Some(token.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::AuthFailed(e.to_string())),
        }
    }

    fn is_established(&self) -> bool {
        self.context.is_complete()
    }

    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.context
            .wrap(true, plaintext)
            .map(|sealed| sealed.to_vec())
            .map_err(|e| Error::AuthFailed(e.to_string()))
    }

    fn unseal(&mut self, sealed: &[u8]) -> Result<Vec<u8>, Error> {
        self.context
            .unwrap(sealed)
            .map(|plaintext| plaintext.to_vec())
            .map_err(|e| Error::AuthFailed(e.to_string()))
    }
}

/// The confidentiality layer of an upgraded connection: NegotiateStream
/// framing beneath, a security context for sealing, and a cache of
/// decrypted bytes not yet returned to the caller.
///
/// The context lives behind a shared handle so that one established
/// connection can be driven from two directions at once, each through its
/// own half (see [`GssapiStream::share`]).
pub struct GssapiStream<S, C> {
    inner: NegotiateStream<S>,
    context: Arc<Mutex<C>>,
    read_cache: Vec<u8>,
}

impl<S: ByteStream, C: SecurityContext> GssapiStream<S, C> {
    pub fn new(stream: S, context: C) -> Self {
        Self {
            inner: NegotiateStream::new(stream),
            context: Arc::new(Mutex::new(context)),
            read_cache: Vec::new(),
        }
    }

    /// A second stream protected by this stream's security context, over
    /// another handle of the same connection. The handshake must already be
    /// complete; the proxy uses this to give each forwarding direction its
    /// own half of one upgraded connection.
    pub fn share<S2: ByteStream>(&self, stream: S2) -> GssapiStream<S2, C> {
        debug_assert!(self.inner.is_established());

        GssapiStream {
            inner: NegotiateStream::established(stream),
            context: Arc::clone(&self.context),
            read_cache: Vec::new(),
        }
    }

    /// Run the token exchange until the provider reports completion.
    ///
    /// Does nothing on an already-established context. Reads and writes
    /// call this lazily, so no application data can pass through the
    /// stream before establishment.
    pub fn negotiate(&mut self) -> Result<(), Error> {
        let mut context = self.context.lock().unwrap();
        if context.is_established() {
            return Ok(());
        }

        let mut token: Option<Vec<u8>> = None;
        loop {
            debug!("stepping the security context");
            if let Some(out) = context.step(token.as_deref())? {
                if !out.is_empty() {
                    self.inner.write(&out)?;
                }
            }

            if context.is_established() {
                debug!("GSSAPI handshake done");
                return Ok(());
            }

            token = Some(self.inner.read_frame()?);
        }
    }
}

impl<S: ByteStream, C: SecurityContext> ByteStream for GssapiStream<S, C> {
    fn read_exact(&mut self, count: usize) -> Result<Vec<u8>, Error> {
        self.negotiate()?;

        // Refill only while the cache is short of `count`.
        while self.read_cache.len() < count {
            let sealed = self.inner.read_frame()?;
            let plaintext = self.context.lock().unwrap().unseal(&sealed)?;
            trace!("decrypted {} bytes into the read cache", plaintext.len());
            self.read_cache.extend_from_slice(&plaintext);
        }

        Ok(self.read_cache.drain(..count).collect())
    }

    fn read_some(&mut self) -> Result<Vec<u8>, Error> {
        self.negotiate()?;

        let sealed = self.inner.read_frame()?;
        self.context.lock().unwrap().unseal(&sealed)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.negotiate()?;

        for chunk in data.chunks(SEAL_CHUNK_LIMIT) {
            let sealed = self.context.lock().unwrap().seal(chunk)?;
            self.inner.write(&sealed)?;
        }

        Ok(())
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
