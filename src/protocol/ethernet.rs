//! Ethernet frame parsing and construction

use super::{EtherType, MacAddr};
use crate::{Error, Result};

/// Minimum Ethernet frame size (without FCS)
pub const MIN_FRAME_SIZE: usize = 14;
/// Ethernet header size
pub const HEADER_SIZE: usize = 14;

/// Parsed Ethernet frame (zero-copy reference)
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse an Ethernet frame from a buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_FRAME_SIZE {
            return Err(Error::Parse("frame too short".into()));
        }

        Ok(Self { buffer })
    }

    pub fn dst_mac(&self) -> MacAddr {
        MacAddr(self.buffer[0..6].try_into().unwrap())
    }

    pub fn src_mac(&self) -> MacAddr {
        MacAddr(self.buffer[6..12].try_into().unwrap())
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.buffer[12], self.buffer[13]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }
}

/// Builder for constructing Ethernet frames
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1518),
        }
    }

    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn ethertype(mut self, ethertype: EtherType) -> Self {
        self.buffer
            .extend_from_slice(&(ethertype as u16).to_be_bytes());
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.buffer.extend_from_slice(payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let src = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
        let dst = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);

        let frame = FrameBuilder::new()
            .dst_mac(dst)
            .src_mac(src)
            .ethertype(EtherType::Ipv4)
            .payload(&[0x45, 0x00])
            .build();

        let parsed = Frame::parse(&frame).unwrap();
        assert_eq!(parsed.dst_mac(), dst);
        assert_eq!(parsed.src_mac(), src);
        assert_eq!(parsed.ethertype(), 0x0800);
        assert_eq!(parsed.payload(), &[0x45, 0x00]);
    }

    #[test]
    fn test_frame_too_short() {
        assert!(Frame::parse(&[0u8; 13]).is_err());
    }
}
