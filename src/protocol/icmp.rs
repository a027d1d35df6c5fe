//! ICMPv4 protocol - RFC 792
//!
//! Distinguishes query messages (which carry an identifier usable as a NAT
//! key) from error messages (which embed the offending datagram).

use super::types::{fold_checksum, sum_words};
use crate::{Error, Result};

/// ICMP header size (type, code, checksum, rest of header)
pub const HEADER_SIZE: usize = 8;

/// ICMP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    SourceQuench = 4,
    Redirect = 5,
    EchoRequest = 8,
    TimeExceeded = 11,
    ParameterProblem = 12,
    Timestamp = 13,
    TimestampReply = 14,
    InformationRequest = 15,
    InformationReply = 16,
    AddressMaskRequest = 17,
    AddressMaskReply = 18,
}

impl IcmpType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(IcmpType::EchoReply),
            3 => Some(IcmpType::DestinationUnreachable),
            4 => Some(IcmpType::SourceQuench),
            5 => Some(IcmpType::Redirect),
            8 => Some(IcmpType::EchoRequest),
            11 => Some(IcmpType::TimeExceeded),
            12 => Some(IcmpType::ParameterProblem),
            13 => Some(IcmpType::Timestamp),
            14 => Some(IcmpType::TimestampReply),
            15 => Some(IcmpType::InformationRequest),
            16 => Some(IcmpType::InformationReply),
            17 => Some(IcmpType::AddressMaskRequest),
            18 => Some(IcmpType::AddressMaskReply),
            _ => None,
        }
    }

    /// Query messages carry an identifier field in the rest-of-header
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            IcmpType::EchoRequest
                | IcmpType::EchoReply
                | IcmpType::Timestamp
                | IcmpType::TimestampReply
                | IcmpType::InformationRequest
                | IcmpType::InformationReply
                | IcmpType::AddressMaskRequest
                | IcmpType::AddressMaskReply
        )
    }

    /// Error messages embed the original datagram in their body
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            IcmpType::DestinationUnreachable
                | IcmpType::SourceQuench
                | IcmpType::Redirect
                | IcmpType::TimeExceeded
                | IcmpType::ParameterProblem
        )
    }
}

/// Parsed ICMP message (zero-copy reference)
#[derive(Debug)]
pub struct IcmpHeader<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("ICMP message too short".into()));
        }

        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[0]
    }

    pub fn code(&self) -> u8 {
        self.buffer[1]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// For query messages: the identifier
    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// For query messages: the sequence number
    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    /// The 4 rest-of-header bytes (identifier/sequence, unused word, or MTU)
    pub fn rest_of_header(&self) -> [u8; 4] {
        self.buffer[4..8].try_into().unwrap()
    }

    /// Message body after the 8-byte header
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buffer
    }

    pub fn validate_checksum(&self) -> bool {
        icmp_checksum(self.buffer) == 0
    }
}

/// Mutable ICMP message (header + body) for NAT rewrites
#[derive(Debug, Clone)]
pub struct IcmpPacket {
    buffer: Vec<u8>,
}

impl IcmpPacket {
    /// Create from raw message bytes (copies the data)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Parse("ICMP message too short".into()));
        }

        Ok(Self {
            buffer: data.to_vec(),
        })
    }

    /// Rebuild an error message: the original type, code and rest-of-header
    /// over a freshly translated embedded datagram
    pub fn from_error_parts(icmp_type: u8, code: u8, rest: [u8; 4], embedded: &[u8]) -> Self {
        let mut buffer = Vec::with_capacity(HEADER_SIZE + embedded.len());
        buffer.push(icmp_type);
        buffer.push(code);
        buffer.extend_from_slice(&[0, 0]); // checksum
        buffer.extend_from_slice(&rest);
        buffer.extend_from_slice(embedded);

        Self { buffer }
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[0]
    }

    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// Set the identifier (checksum must be updated separately)
    pub fn set_identifier(&mut self, id: u16) {
        self.buffer[4..6].copy_from_slice(&id.to_be_bytes());
    }

    /// Recompute the checksum over the whole message
    pub fn update_checksum(&mut self) {
        self.buffer[2] = 0;
        self.buffer[3] = 0;

        let sum = icmp_checksum(&self.buffer);
        self.buffer[2..4].copy_from_slice(&sum.to_be_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Build an echo message (request or reply) with identifier and sequence
pub fn build_echo(icmp_type: IcmpType, id: u16, seq: u16, payload: &[u8]) -> IcmpPacket {
    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload.len());
    buffer.push(icmp_type as u8);
    buffer.push(0); // code
    buffer.extend_from_slice(&[0, 0]); // checksum
    buffer.extend_from_slice(&id.to_be_bytes());
    buffer.extend_from_slice(&seq.to_be_bytes());
    buffer.extend_from_slice(payload);

    let mut pkt = IcmpPacket { buffer };
    pkt.update_checksum();
    pkt
}

/// Calculate the ICMP checksum over the whole message
pub fn icmp_checksum(data: &[u8]) -> u16 {
    fold_checksum(sum_words(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_classification() {
        assert!(IcmpType::EchoRequest.is_query());
        assert!(IcmpType::EchoReply.is_query());
        assert!(IcmpType::TimestampReply.is_query());
        assert!(IcmpType::AddressMaskRequest.is_query());
        assert!(!IcmpType::EchoRequest.is_error());

        assert!(IcmpType::DestinationUnreachable.is_error());
        assert!(IcmpType::TimeExceeded.is_error());
        assert!(!IcmpType::DestinationUnreachable.is_query());
    }

    #[test]
    fn test_build_echo_parse() {
        let pkt = build_echo(IcmpType::EchoRequest, 0x1234, 1, b"ping");
        let hdr = IcmpHeader::parse(pkt.as_bytes()).unwrap();

        assert_eq!(hdr.icmp_type(), 8);
        assert_eq!(hdr.code(), 0);
        assert_eq!(hdr.identifier(), 0x1234);
        assert_eq!(hdr.sequence(), 1);
        assert_eq!(hdr.payload(), b"ping");
        assert!(hdr.validate_checksum());
    }

    #[test]
    fn test_rewrite_identifier() {
        let pkt = build_echo(IcmpType::EchoRequest, 0x1234, 1, b"ping");
        let mut pkt = IcmpPacket::from_bytes(pkt.as_bytes()).unwrap();
        pkt.set_identifier(0);
        pkt.update_checksum();

        let hdr = IcmpHeader::parse(pkt.as_bytes()).unwrap();
        assert_eq!(hdr.identifier(), 0);
        assert!(hdr.validate_checksum());
    }

    #[test]
    fn test_error_parts_preserve_rest_of_header() {
        // A fragmentation-needed carries the next-hop MTU in the rest bytes
        let rest = [0, 0, 0x05, 0xDC];
        let embedded = [0u8; 28];
        let mut pkt = IcmpPacket::from_error_parts(3, 4, rest, &embedded);
        pkt.update_checksum();

        let hdr = IcmpHeader::parse(pkt.as_bytes()).unwrap();
        assert_eq!(hdr.icmp_type(), 3);
        assert_eq!(hdr.code(), 4);
        assert_eq!(hdr.rest_of_header(), rest);
        assert_eq!(hdr.payload(), &embedded);
        assert!(hdr.validate_checksum());
    }

    #[test]
    fn test_parse_too_short() {
        assert!(IcmpHeader::parse(&[0u8; 7]).is_err());
    }
}
