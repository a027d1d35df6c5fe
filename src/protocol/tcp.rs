//! TCP protocol - RFC 793
//!
//! Header parsing, checksum calculation, and the two segment shapes the
//! pseudo-TCP stream needs: SYN+ACK for the handshake reply and PSH+ACK for
//! data toward the client.

use super::types::{fold_checksum, pseudo_header_sum, sum_words};
use crate::{Error, Result};
use std::net::IpAddr;

/// Minimum TCP header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// TCP protocol number for the pseudo-header
pub const PROTOCOL_NUMBER: u8 = 6;

/// Default window advertised on synthesized segments
const DEFAULT_WINDOW: u16 = 65535;
/// MSS option value on the synthesized SYN+ACK
const DEFAULT_MSS: u16 = 1460;

/// TCP flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
}

impl TcpFlags {
    /// Parse flags from the 13th byte of the TCP header
    pub fn from_byte(byte: u8) -> Self {
        Self {
            fin: (byte & 0x01) != 0,
            syn: (byte & 0x02) != 0,
            rst: (byte & 0x04) != 0,
            psh: (byte & 0x08) != 0,
            ack: (byte & 0x10) != 0,
            urg: (byte & 0x20) != 0,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut byte = 0u8;
        if self.fin {
            byte |= 0x01;
        }
        if self.syn {
            byte |= 0x02;
        }
        if self.rst {
            byte |= 0x04;
        }
        if self.psh {
            byte |= 0x08;
        }
        if self.ack {
            byte |= 0x10;
        }
        if self.urg {
            byte |= 0x20;
        }
        byte
    }
}

/// Parsed TCP segment (zero-copy reference)
#[derive(Debug)]
pub struct TcpHeader<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> TcpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("TCP header too short".into()));
        }

        let data_offset = (buffer[12] >> 4) as usize;
        let header_len = data_offset * 4;

        if header_len < MIN_HEADER_SIZE {
            return Err(Error::Parse("TCP data offset too small".into()));
        }

        if buffer.len() < header_len {
            return Err(Error::Parse("TCP header truncated".into()));
        }

        Ok(Self { buffer, header_len })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn seq_num(&self) -> u32 {
        u32::from_be_bytes([
            self.buffer[4],
            self.buffer[5],
            self.buffer[6],
            self.buffer[7],
        ])
    }

    pub fn ack_num(&self) -> u32 {
        u32::from_be_bytes([
            self.buffer[8],
            self.buffer[9],
            self.buffer[10],
            self.buffer[11],
        ])
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_byte(self.buffer[13])
    }

    pub fn window(&self) -> u16 {
        u16::from_be_bytes([self.buffer[14], self.buffer[15]])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[16], self.buffer[17]])
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// The whole segment (header + payload)
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buffer
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.header_len..]
    }

    /// Validate checksum with the pseudo-header
    pub fn validate_checksum(&self, src_ip: IpAddr, dst_ip: IpAddr) -> bool {
        tcp_checksum(src_ip, dst_ip, self.buffer) == 0
    }
}

/// Mutable TCP segment (header + payload) for NAT rewrites
#[derive(Debug, Clone)]
pub struct TcpPacket {
    buffer: Vec<u8>,
}

impl TcpPacket {
    /// Create from raw segment bytes (copies the data)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        TcpHeader::parse(data)?;
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
        self.buffer[16] = 0;
        self.buffer[17] = 0;

        let sum = tcp_checksum(src_ip, dst_ip, &self.buffer);
        self.buffer[16..18].copy_from_slice(&sum.to_be_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Build a SYN+ACK segment for the pseudo-TCP handshake reply
///
/// Carries an MSS option and the default window; checksum is left zero until
/// `update_checksum` is called with the final addresses.
pub fn build_syn_ack(src_port: u16, dst_port: u16, seq: u32, ack: u32) -> TcpPacket {
    let mut buffer = Vec::with_capacity(24);
    buffer.extend_from_slice(&src_port.to_be_bytes());
    buffer.extend_from_slice(&dst_port.to_be_bytes());
    buffer.extend_from_slice(&seq.to_be_bytes());
    buffer.extend_from_slice(&ack.to_be_bytes());
    buffer.push(0x60); // data offset 6 (24 bytes)
    buffer.push(
        TcpFlags {
            syn: true,
            ack: true,
            ..Default::default()
        }
        .to_byte(),
    );
    buffer.extend_from_slice(&DEFAULT_WINDOW.to_be_bytes());
    buffer.extend_from_slice(&[0, 0]); // checksum
    buffer.extend_from_slice(&[0, 0]); // urgent pointer
    buffer.extend_from_slice(&[2, 4]); // MSS option
    buffer.extend_from_slice(&DEFAULT_MSS.to_be_bytes());

    TcpPacket { buffer }
}

/// Build a PSH+ACK data segment toward the client
pub fn build_psh_ack(src_port: u16, dst_port: u16, seq: u32, ack: u32, payload: &[u8]) -> TcpPacket {
    let mut buffer = Vec::with_capacity(MIN_HEADER_SIZE + payload.len());
    buffer.extend_from_slice(&src_port.to_be_bytes());
    buffer.extend_from_slice(&dst_port.to_be_bytes());
    buffer.extend_from_slice(&seq.to_be_bytes());
    buffer.extend_from_slice(&ack.to_be_bytes());
    buffer.push(0x50); // data offset 5 (20 bytes)
    buffer.push(
        TcpFlags {
            psh: true,
            ack: true,
            ..Default::default()
        }
        .to_byte(),
    );
    buffer.extend_from_slice(&DEFAULT_WINDOW.to_be_bytes());
    buffer.extend_from_slice(&[0, 0]); // checksum
    buffer.extend_from_slice(&[0, 0]); // urgent pointer
    buffer.extend_from_slice(payload);

    TcpPacket { buffer }
}

/// Calculate the TCP checksum with the IPv4 or IPv6 pseudo-header
pub fn tcp_checksum(src_ip: IpAddr, dst_ip: IpAddr, segment: &[u8]) -> u16 {
    let mut sum = pseudo_header_sum(src_ip, dst_ip, PROTOCOL_NUMBER, segment.len());
    sum = sum.wrapping_add(sum_words(segment));
    fold_checksum(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_ips() -> (IpAddr, IpAddr) {
        (
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
        )
    }

    #[test]
    fn test_flags_roundtrip() {
        let flags = TcpFlags::from_byte(0x12);
        assert!(flags.syn);
        assert!(flags.ack);
        assert!(!flags.psh);
        assert_eq!(flags.to_byte(), 0x12);

        let psh_ack = TcpFlags {
            psh: true,
            ack: true,
            ..Default::default()
        };
        assert_eq!(psh_ack.to_byte(), 0x18);
    }

    #[test]
    fn test_syn_ack_shape() {
        let (src, dst) = test_ips();
        let mut seg = build_syn_ack(8080, 50000, 0, 1001);
        seg.update_checksum(src, dst);

        let hdr = TcpHeader::parse(seg.as_bytes()).unwrap();
        assert_eq!(hdr.src_port(), 8080);
        assert_eq!(hdr.dst_port(), 50000);
        assert_eq!(hdr.seq_num(), 0);
        assert_eq!(hdr.ack_num(), 1001);
        assert!(hdr.flags().syn);
        assert!(hdr.flags().ack);
        assert!(!hdr.flags().psh);
        assert_eq!(hdr.header_len(), 24);
        assert!(hdr.payload().is_empty());
        assert!(hdr.validate_checksum(src, dst));
    }

    #[test]
    fn test_psh_ack_shape() {
        let (src, dst) = test_ips();
        let mut seg = build_psh_ack(8080, 50000, 1, 1041, b"encrypted");
        seg.update_checksum(src, dst);

        let hdr = TcpHeader::parse(seg.as_bytes()).unwrap();
        assert_eq!(hdr.seq_num(), 1);
        assert_eq!(hdr.ack_num(), 1041);
        assert!(hdr.flags().psh);
        assert!(hdr.flags().ack);
        assert!(!hdr.flags().syn);
        assert_eq!(hdr.payload(), b"encrypted");
        assert!(hdr.validate_checksum(src, dst));
    }

    #[test]
    fn test_rewrite_port_and_checksum() {
        let (src, dst) = test_ips();
        let mut seg = build_psh_ack(33000, 53, 5, 9, b"data");
        seg.update_checksum(src, dst);

        let mut pkt = TcpPacket::from_bytes(seg.as_bytes()).unwrap();
        pkt.set_src_port(49152);
        let new_src = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
        pkt.update_checksum(new_src, dst);

        let hdr = TcpHeader::parse(pkt.as_bytes()).unwrap();
        assert_eq!(hdr.src_port(), 49152);
        assert!(hdr.validate_checksum(new_src, dst));
    }

    #[test]
    fn test_checksum_ipv6_pseudo_header() {
        let src: IpAddr = "2001:db8::1".parse().unwrap();
        let dst: IpAddr = "2001:db8::2".parse().unwrap();

        let mut seg = build_psh_ack(1, 2, 0, 0, b"v6");
        seg.update_checksum(src, dst);

        let hdr = TcpHeader::parse(seg.as_bytes()).unwrap();
        assert!(hdr.validate_checksum(src, dst));
        assert!(!hdr.validate_checksum(dst, src));
    }

    #[test]
    fn test_parse_too_short() {
        assert!(TcpHeader::parse(&[0u8; 19]).is_err());
    }

    #[test]
    fn test_parse_bad_offset() {
        let seg = build_psh_ack(1, 2, 0, 0, b"").into_bytes();
        let mut bad = seg.clone();
        bad[12] = 0x10; // data offset 1
        assert!(TcpHeader::parse(&bad).is_err());
    }
}
