//! IPv4 protocol - RFC 791

use super::types::{fold_checksum, sum_words};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// Don't Fragment flag bit in the flags/fragment-offset word
const FLAG_DONT_FRAGMENT: u16 = 0x4000;

/// Parsed IPv4 header (zero-copy reference)
#[derive(Debug)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 header too short".into()));
        }

        let version = buffer[0] >> 4;
        if version != 4 {
            return Err(Error::Parse("not an IPv4 packet".into()));
        }

        let ihl = (buffer[0] & 0x0F) as usize;
        let header_len = ihl * 4;

        if header_len < MIN_HEADER_SIZE || buffer.len() < header_len {
            return Err(Error::Parse("IPv4 header truncated".into()));
        }

        Ok(Self { buffer, header_len })
    }

    pub fn version(&self) -> u8 {
        self.buffer[0] >> 4
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn identification(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[8]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[10], self.buffer[11]])
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// The raw header bytes (including options)
    pub fn header_bytes(&self) -> &'a [u8] {
        &self.buffer[..self.header_len]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.header_len..]
    }
}

/// Mutable IPv4 datagram assembled from a cloned header and a new payload
///
/// Every rewrite clones before mutating; the parsed view may still be
/// referenced for the original frame.
#[derive(Debug, Clone)]
pub struct Ipv4Packet {
    buffer: Vec<u8>,
    header_len: usize,
}

impl Ipv4Packet {
    /// Clone a parsed header and attach a payload, fixing the total length
    pub fn from_parts(header: &Ipv4Header, payload: &[u8]) -> Self {
        let header_len = header.header_len();
        let mut buffer = Vec::with_capacity(header_len + payload.len());
        buffer.extend_from_slice(header.header_bytes());
        buffer.extend_from_slice(payload);

        let total = (header_len + payload.len()) as u16;
        buffer[2..4].copy_from_slice(&total.to_be_bytes());

        Self { buffer, header_len }
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    /// Set source address (checksum must be updated separately)
    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        self.buffer[12..16].copy_from_slice(&addr.octets());
    }

    /// Set destination address (checksum must be updated separately)
    pub fn set_dst_addr(&mut self, addr: Ipv4Addr) {
        self.buffer[16..20].copy_from_slice(&addr.octets());
    }

    /// Recompute the header checksum
    pub fn update_checksum(&mut self) {
        self.buffer[10] = 0;
        self.buffer[11] = 0;
        let sum = header_checksum(&self.buffer[..self.header_len]);
        self.buffer[10..12].copy_from_slice(&sum.to_be_bytes());
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Builder for fresh IPv4 headers (no options)
pub struct Ipv4Builder {
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    protocol: u8,
    ttl: u8,
    identification: u16,
    payload: Vec<u8>,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            protocol: 0,
            ttl: 64,
            identification: 0,
            payload: Vec::new(),
        }
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total = MIN_HEADER_SIZE + self.payload.len();
        let mut buffer = Vec::with_capacity(total);

        buffer.push(0x45); // version 4, ihl 5
        buffer.push(0); // dscp/ecn
        buffer.extend_from_slice(&(total as u16).to_be_bytes());
        buffer.extend_from_slice(&self.identification.to_be_bytes());
        buffer.extend_from_slice(&FLAG_DONT_FRAGMENT.to_be_bytes());
        buffer.push(self.ttl);
        buffer.push(self.protocol);
        buffer.extend_from_slice(&[0, 0]); // checksum placeholder
        buffer.extend_from_slice(&self.src_addr.octets());
        buffer.extend_from_slice(&self.dst_addr.octets());

        let sum = header_checksum(&buffer[..MIN_HEADER_SIZE]);
        buffer[10..12].copy_from_slice(&sum.to_be_bytes());

        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculate the IPv4 header checksum (the checksum field must be zero)
pub fn header_checksum(header: &[u8]) -> u16 {
    fold_checksum(sum_words(header))
}
