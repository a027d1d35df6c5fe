//! Client session table
//!
//! One session per connected client endpoint, created by the pseudo-TCP
//! handshake and replaced wholesale if the client handshakes again.

use crate::crypto::Crypt;
use crate::protocol::Endpoint;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// Per-client pseudo-TCP state
///
/// `seq` counts encrypted bytes sent to the client, `ack` encrypted bytes
/// received. Each counter has a single writer: the outbound worker for
/// `seq`, the inbound worker for `ack`. The other worker only reads.
pub struct ClientSession {
    crypt: Arc<dyn Crypt>,
    seq: AtomicU32,
    ack: AtomicU32,
}

impl ClientSession {
    pub fn new(crypt: Arc<dyn Crypt>, seq: u32, ack: u32) -> Self {
        Self {
            crypt,
            seq: AtomicU32::new(seq),
            ack: AtomicU32::new(ack),
        }
    }

    pub fn crypt(&self) -> &dyn Crypt {
        self.crypt.as_ref()
    }

    pub fn seq(&self) -> u32 {
        self.seq.load(Ordering::Relaxed)
    }

    pub fn ack(&self) -> u32 {
        self.ack.load(Ordering::Relaxed)
    }

    /// Advance the server->client sequence number after an emit
    pub fn advance_seq(&self, len: u32) {
        self.seq.fetch_add(len, Ordering::Relaxed);
    }

    /// Advance the expected client->server sequence number
    pub fn advance_ack(&self, len: u32) {
        self.ack.fetch_add(len, Ordering::Relaxed);
    }
}

/// Concurrent map of client endpoint to session
#[derive(Default)]
pub struct SessionTable {
    clients: RwLock<HashMap<Endpoint, Arc<ClientSession>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the session for a client endpoint
    pub fn insert(&self, client: Endpoint, session: ClientSession) {
        self.clients
            .write()
            .unwrap()
            .insert(client, Arc::new(session));
    }

    pub fn get(&self, client: &Endpoint) -> Option<Arc<ClientSession>> {
        self.clients.read().unwrap().get(client).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().unwrap().is_empty()
    }
}
