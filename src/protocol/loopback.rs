//! Loopback (null) link layer
//!
//! Frames captured on a loopback device carry a 4-byte host-order protocol
//! family word instead of an Ethernet header.

use crate::{Error, Result};

/// Loopback pseudo-header size
pub const HEADER_SIZE: usize = 4;

/// Protocol family word for IPv4
pub const FAMILY_INET: u32 = 2;
/// Protocol family word for IPv6
pub const FAMILY_INET6: u32 = 10;

/// Parsed loopback frame (zero-copy reference)
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("loopback frame too short".into()));
        }

        Ok(Self { buffer })
    }

    pub fn family(&self) -> u32 {
        u32::from_ne_bytes(self.buffer[0..4].try_into().unwrap())
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }
}

/// Build a loopback frame around an IP packet
pub fn build(family: u32, payload: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload.len());
    buffer.extend_from_slice(&family.to_ne_bytes());
    buffer.extend_from_slice(payload);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_roundtrip() {
        let frame = build(FAMILY_INET, &[0x45, 0x00]);
        let parsed = Frame::parse(&frame).unwrap();
        assert_eq!(parsed.family(), FAMILY_INET);
        assert_eq!(parsed.payload(), &[0x45, 0x00]);
    }

    #[test]
    fn test_loopback_too_short() {
        assert!(Frame::parse(&[0u8; 3]).is_err());
    }
}
