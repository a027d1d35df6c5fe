//! Symmetric cipher for the tunnel payloads
//!
//! Each client-bound or server-bound TCP segment carries exactly one inner IP
//! packet as `encrypt(plaintext)`. The cipher is shared between server and
//! clients; possession of the key is the only authentication.

use crate::{Error, Result};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Nonce};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::Arc;

/// Nonce length prefixed to every ChaCha20-Poly1305 ciphertext
const NONCE_SIZE: usize = 12;

/// Symmetric packet transformation
pub trait Crypt: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Supported cipher methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Plain,
    ChaCha20Poly1305,
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(Method::Plain),
            "chacha20-poly1305" => Ok(Method::ChaCha20Poly1305),
            other => Err(Error::Config(format!("unknown cipher method {:?}", other))),
        }
    }
}

/// Build a cipher from the configured method and shared password
pub fn new_crypt(method: Method, password: &str) -> Arc<dyn Crypt> {
    match method {
        Method::Plain => Arc::new(Plain),
        Method::ChaCha20Poly1305 => Arc::new(ChaCha20Poly1305Crypt::new(password)),
    }
}

/// Identity transformation, for trusted paths and tests
pub struct Plain;

impl Crypt for Plain {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

/// ChaCha20-Poly1305 AEAD with a random per-packet nonce
///
/// Wire format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`. The key
/// is the SHA-256 of the shared password.
pub struct ChaCha20Poly1305Crypt {
    cipher: ChaCha20Poly1305,
}

impl ChaCha20Poly1305Crypt {
    pub fn new(password: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        Self {
            cipher: ChaCha20Poly1305::new(&key.into()),
        }
    }
}

impl Crypt for ChaCha20Poly1305Crypt {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::Crypto("encrypt failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(Error::Crypto("ciphertext too short".into()));
        }

        let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| Error::Crypto("decrypt failed".into()))
    }
}
