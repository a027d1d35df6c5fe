//! UDP protocol - RFC 768

use super::types::{fold_checksum, pseudo_header_sum, sum_words};
use crate::{Error, Result};
use std::net::IpAddr;

/// UDP header size (fixed)
pub const HEADER_SIZE: usize = 8;

/// UDP protocol number for the pseudo-header
pub const PROTOCOL_NUMBER: u8 = 17;

/// Parsed UDP datagram (zero-copy reference)
#[derive(Debug)]
pub struct UdpHeader<'a> {
    buffer: &'a [u8],
}

impl<'a> UdpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("UDP header too short".into()));
        }

        Ok(Self { buffer })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Length of header plus data
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// Checksum; 0 means not computed (valid for UDP over IPv4)
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buffer
    }

    pub fn validate_checksum(&self, src_ip: IpAddr, dst_ip: IpAddr) -> bool {
        if self.checksum() == 0 {
            return true;
        }
        udp_checksum(src_ip, dst_ip, self.buffer) == 0
    }
}

/// Mutable UDP datagram (header + payload) for NAT rewrites
#[derive(Debug, Clone)]
pub struct UdpPacket {
    buffer: Vec<u8>,
}

impl UdpPacket {
    /// Create from raw datagram bytes (copies the data)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Parse("UDP datagram too short".into()));
        }

        Ok(Self {
            buffer: data.to_vec(),
        })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Set source port (checksum must be updated separately)
    pub fn set_src_port(&mut self, port: u16) {
        self.buffer[0..2].copy_from_slice(&port.to_be_bytes());
    }

    /// Set destination port (checksum must be updated separately)
    pub fn set_dst_port(&mut self, port: u16) {
        self.buffer[2..4].copy_from_slice(&port.to_be_bytes());
    }

    /// Recompute the checksum over the given pseudo-header addresses
    pub fn update_checksum(&mut self, src_ip: IpAddr, dst_ip: IpAddr) {
        self.buffer[6] = 0;
        self.buffer[7] = 0;

        let sum = udp_checksum(src_ip, dst_ip, &self.buffer);
        // An all-zero result is transmitted as all ones (RFC 768)
        let sum = if sum == 0 { 0xFFFF } else { sum };
        self.buffer[6..8].copy_from_slice(&sum.to_be_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Build a UDP datagram around a payload, checksum left zero
pub fn build(src_port: u16, dst_port: u16, payload: &[u8]) -> UdpPacket {
    let length = (HEADER_SIZE + payload.len()) as u16;
    let mut buffer = Vec::with_capacity(length as usize);
    buffer.extend_from_slice(&src_port.to_be_bytes());
    buffer.extend_from_slice(&dst_port.to_be_bytes());
    buffer.extend_from_slice(&length.to_be_bytes());
    buffer.extend_from_slice(&[0, 0]); // checksum
    buffer.extend_from_slice(payload);

    UdpPacket { buffer }
}

/// Calculate the UDP checksum with the IPv4 or IPv6 pseudo-header
pub fn udp_checksum(src_ip: IpAddr, dst_ip: IpAddr, datagram: &[u8]) -> u16 {
    let mut sum = pseudo_header_sum(src_ip, dst_ip, PROTOCOL_NUMBER, datagram.len());
    sum = sum.wrapping_add(sum_words(datagram));
    fold_checksum(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_build_parse() {
        let mut pkt = build(33000, 53, b"query");
        let src = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let dst = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        pkt.update_checksum(src, dst);

        let hdr = UdpHeader::parse(pkt.as_bytes()).unwrap();
        assert_eq!(hdr.src_port(), 33000);
        assert_eq!(hdr.dst_port(), 53);
        assert_eq!(hdr.length(), 13);
        assert_eq!(hdr.payload(), b"query");
        assert!(hdr.validate_checksum(src, dst));
    }

    #[test]
    fn test_rewrite_port_and_checksum() {
        let src = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let dst = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        let mut pkt = build(33000, 53, b"query");
        pkt.update_checksum(src, dst);

        pkt.set_src_port(49152);
        let new_src = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
        pkt.update_checksum(new_src, dst);

        let hdr = UdpHeader::parse(pkt.as_bytes()).unwrap();
        assert_eq!(hdr.src_port(), 49152);
        assert!(hdr.validate_checksum(new_src, dst));
    }

    #[test]
    fn test_zero_checksum_accepted() {
        let pkt = build(1, 2, b"nocsum");
        let src = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let dst = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));

        let hdr = UdpHeader::parse(pkt.as_bytes()).unwrap();
        assert_eq!(hdr.checksum(), 0);
        assert!(hdr.validate_checksum(src, dst));
    }

    #[test]
    fn test_parse_too_short() {
        assert!(UdpHeader::parse(&[0u8; 7]).is_err());
    }
}
