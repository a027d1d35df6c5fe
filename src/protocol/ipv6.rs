//! IPv6 protocol - RFC 8200
//!
//! Fixed-header handling only; extension headers are not walked. A tunnelled
//! datagram whose next header is not a supported transport is dropped.

use crate::{Error, Result};
use std::net::Ipv6Addr;

/// IPv6 fixed header size (always 40 bytes)
pub const HEADER_SIZE: usize = 40;

/// Parsed IPv6 header (zero-copy reference)
#[derive(Debug)]
pub struct Ipv6Header<'a> {
    buffer: &'a [u8],
}

impl<'a> Ipv6Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("IPv6 header too short".into()));
        }

        let version = buffer[0] >> 4;
        if version != 6 {
            return Err(Error::Parse("not an IPv6 packet".into()));
        }

        Ok(Self { buffer })
    }

    pub fn version(&self) -> u8 {
        self.buffer[0] >> 4
    }

    pub fn payload_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn next_header(&self) -> u8 {
        self.buffer[6]
    }

    pub fn hop_limit(&self) -> u8 {
        self.buffer[7]
    }

    pub fn src_addr(&self) -> Ipv6Addr {
        let octets: [u8; 16] = self.buffer[8..24].try_into().unwrap();
        Ipv6Addr::from(octets)
    }

    pub fn dst_addr(&self) -> Ipv6Addr {
        let octets: [u8; 16] = self.buffer[24..40].try_into().unwrap();
        Ipv6Addr::from(octets)
    }

    /// The raw fixed-header bytes
    pub fn header_bytes(&self) -> &'a [u8] {
        &self.buffer[..HEADER_SIZE]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }
}

/// Mutable IPv6 datagram assembled from a cloned header and a new payload
#[derive(Debug, Clone)]
pub struct Ipv6Packet {
    buffer: Vec<u8>,
}

impl Ipv6Packet {
    /// Clone a parsed header and attach a payload, fixing the payload length
    pub fn from_parts(header: &Ipv6Header, payload: &[u8]) -> Self {
        let mut buffer = Vec::with_capacity(HEADER_SIZE + payload.len());
        buffer.extend_from_slice(header.header_bytes());
        buffer.extend_from_slice(payload);
        buffer[4..6].copy_from_slice(&(payload.len() as u16).to_be_bytes());

        Self { buffer }
    }

    pub fn src_addr(&self) -> Ipv6Addr {
        let octets: [u8; 16] = self.buffer[8..24].try_into().unwrap();
        Ipv6Addr::from(octets)
    }

    pub fn dst_addr(&self) -> Ipv6Addr {
        let octets: [u8; 16] = self.buffer[24..40].try_into().unwrap();
        Ipv6Addr::from(octets)
    }

    pub fn set_src_addr(&mut self, addr: Ipv6Addr) {
        self.buffer[8..24].copy_from_slice(&addr.octets());
    }

    pub fn set_dst_addr(&mut self, addr: Ipv6Addr) {
        self.buffer[24..40].copy_from_slice(&addr.octets());
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Builder for fresh IPv6 fixed headers
pub struct Ipv6Builder {
    src_addr: Ipv6Addr,
    dst_addr: Ipv6Addr,
    next_header: u8,
    hop_limit: u8,
    payload: Vec<u8>,
}

impl Ipv6Builder {
    pub fn new() -> Self {
        Self {
            src_addr: Ipv6Addr::UNSPECIFIED,
            dst_addr: Ipv6Addr::UNSPECIFIED,
            next_header: 0,
            hop_limit: 64,
            payload: Vec::new(),
        }
    }

    pub fn src_addr(mut self, addr: Ipv6Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv6Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn next_header(mut self, next_header: u8) -> Self {
        self.next_header = next_header;
        self
    }

    pub fn hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_SIZE + self.payload.len());

        buffer.push(0x60); // version 6, traffic class high nibble
        buffer.extend_from_slice(&[0, 0, 0]); // traffic class low, flow label
        buffer.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buffer.push(self.next_header);
        buffer.push(self.hop_limit);
        buffer.extend_from_slice(&self.src_addr.octets());
        buffer.extend_from_slice(&self.dst_addr.octets());
        buffer.extend_from_slice(&self.payload);

        buffer
    }
}

impl Default for Ipv6Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_parse_roundtrip() {
        let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::2".parse().unwrap();

        let packet = Ipv6Builder::new()
            .src_addr(src)
            .dst_addr(dst)
            .next_header(6)
            .hop_limit(64)
            .payload(b"xyz")
            .build();

        let hdr = Ipv6Header::parse(&packet).unwrap();
        assert_eq!(hdr.version(), 6);
        assert_eq!(hdr.src_addr(), src);
        assert_eq!(hdr.dst_addr(), dst);
        assert_eq!(hdr.next_header(), 6);
        assert_eq!(hdr.hop_limit(), 64);
        assert_eq!(hdr.payload_length(), 3);
        assert_eq!(hdr.payload(), b"xyz");
    }

    #[test]
    fn test_from_parts_fixes_length() {
        let packet = Ipv6Builder::new()
            .next_header(17)
            .payload(&[0u8; 8])
            .build();
        let hdr = Ipv6Header::parse(&packet).unwrap();

        let rebuilt = Ipv6Packet::from_parts(&hdr, &[0u8; 20]);
        let out = Ipv6Header::parse(rebuilt.as_bytes()).unwrap();
        assert_eq!(out.payload_length(), 20);
    }

    #[test]
    fn test_parse_rejects_non_ipv6() {
        let mut packet = Ipv6Builder::new().build();
        packet[0] = 0x45;
        assert!(Ipv6Header::parse(&packet).is_err());
    }
}
