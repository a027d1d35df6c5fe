//! Parsed form of a captured frame
//!
//! A `PacketIndicator` holds zero-copy views of the network and transport
//! layers plus the derived NAT endpoints. For ICMPv4 error messages it also
//! exposes the embedded original datagram, whose flow identifies the NAT
//! entry the error belongs to.

use super::ethernet;
use super::icmp::{IcmpHeader, IcmpType};
use super::ipv4::Ipv4Header;
use super::ipv6::Ipv6Header;
use super::loopback;
use super::tcp::TcpHeader;
use super::types::{Endpoint, EtherType, TransportProtocol};
use super::udp::UdpHeader;
use crate::{Error, Result};
use std::net::IpAddr;

/// Link layer framing of a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    Loopback,
}

/// Network layer of a parsed packet
#[derive(Debug)]
pub enum NetworkLayer<'a> {
    Ipv4(Ipv4Header<'a>),
    Ipv6(Ipv6Header<'a>),
}

impl<'a> NetworkLayer<'a> {
    pub fn src_ip(&self) -> IpAddr {
        match self {
            NetworkLayer::Ipv4(hdr) => IpAddr::V4(hdr.src_addr()),
            NetworkLayer::Ipv6(hdr) => IpAddr::V6(hdr.src_addr()),
        }
    }

    pub fn dst_ip(&self) -> IpAddr {
        match self {
            NetworkLayer::Ipv4(hdr) => IpAddr::V4(hdr.dst_addr()),
            NetworkLayer::Ipv6(hdr) => IpAddr::V6(hdr.dst_addr()),
        }
    }

    /// TTL or hop limit
    pub fn ttl(&self) -> u8 {
        match self {
            NetworkLayer::Ipv4(hdr) => hdr.ttl(),
            NetworkLayer::Ipv6(hdr) => hdr.hop_limit(),
        }
    }

    fn protocol_number(&self) -> u8 {
        match self {
            NetworkLayer::Ipv4(hdr) => hdr.protocol(),
            NetworkLayer::Ipv6(hdr) => hdr.next_header(),
        }
    }

    fn payload(&self) -> &'a [u8] {
        match self {
            NetworkLayer::Ipv4(hdr) => hdr.payload(),
            NetworkLayer::Ipv6(hdr) => hdr.payload(),
        }
    }
}

/// The original datagram embedded in an ICMPv4 error message
///
/// Per RFC 792 the body carries the offending IPv4 header plus at least the
/// first 8 bytes of its transport header, so ports and ICMP identifiers are
/// always addressable even when the snippet is truncated.
#[derive(Debug)]
pub struct EmbeddedDatagram<'a> {
    pub ipv4: Ipv4Header<'a>,
    pub protocol: TransportProtocol,
    transport: &'a [u8],
}

impl<'a> EmbeddedDatagram<'a> {
    /// The transport snippet (possibly truncated past the first 8 bytes)
    pub fn transport_bytes(&self) -> &'a [u8] {
        self.transport
    }

    /// Source port, or identifier for an embedded ICMP query
    pub fn src_value(&self) -> u16 {
        match self.protocol {
            TransportProtocol::Tcp | TransportProtocol::Udp => {
                u16::from_be_bytes([self.transport[0], self.transport[1]])
            }
            TransportProtocol::Icmpv4 => self.identifier(),
        }
    }

    /// Destination port, or identifier for an embedded ICMP query
    pub fn dst_value(&self) -> u16 {
        match self.protocol {
            TransportProtocol::Tcp | TransportProtocol::Udp => {
                u16::from_be_bytes([self.transport[2], self.transport[3]])
            }
            TransportProtocol::Icmpv4 => self.identifier(),
        }
    }

    fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.transport[4], self.transport[5]])
    }

    /// Whether an embedded ICMP message is itself a query
    pub fn is_query(&self) -> bool {
        self.protocol == TransportProtocol::Icmpv4
            && IcmpType::from_u8(self.transport[0]).is_some_and(|t| t.is_query())
    }
}

/// Parsed ICMPv4 message with the embedded datagram of error messages
#[derive(Debug)]
pub struct Icmpv4Indicator<'a> {
    header: IcmpHeader<'a>,
    icmp_type: IcmpType,
    embedded: Option<EmbeddedDatagram<'a>>,
}

impl<'a> Icmpv4Indicator<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        let header = IcmpHeader::parse(buffer)?;
        let icmp_type = IcmpType::from_u8(header.icmp_type())
            .ok_or_else(|| Error::UnsupportedLayer(format!("icmp type {}", header.icmp_type())))?;

        let embedded = if icmp_type.is_error() {
            let ipv4 = Ipv4Header::parse(header.payload())?;
            let protocol = TransportProtocol::from_u8(ipv4.protocol()).ok_or_else(|| {
                Error::UnsupportedLayer(format!("embedded protocol {}", ipv4.protocol()))
            })?;
            let transport = ipv4.payload();
            if transport.len() < 8 {
                return Err(Error::Parse("embedded transport too short".into()));
            }
            Some(EmbeddedDatagram {
                ipv4,
                protocol,
                transport,
            })
        } else {
            None
        };

        Ok(Self {
            header,
            icmp_type,
            embedded,
        })
    }

    pub fn header(&self) -> &IcmpHeader<'a> {
        &self.header
    }

    pub fn icmp_type(&self) -> IcmpType {
        self.icmp_type
    }

    /// True for messages carrying an identifier field
    pub fn is_query(&self) -> bool {
        self.icmp_type.is_query()
    }

    /// The identifier of a query message
    pub fn id(&self) -> u16 {
        self.header.identifier()
    }

    /// The embedded datagram of an error message
    pub fn embedded(&self) -> Option<&EmbeddedDatagram<'a>> {
        self.embedded.as_ref()
    }
}

/// Transport layer of a parsed packet
#[derive(Debug)]
pub enum TransportLayer<'a> {
    Tcp(TcpHeader<'a>),
    Udp(UdpHeader<'a>),
    Icmpv4(Icmpv4Indicator<'a>),
}

impl TransportLayer<'_> {
    pub fn protocol(&self) -> TransportProtocol {
        match self {
            TransportLayer::Tcp(_) => TransportProtocol::Tcp,
            TransportLayer::Udp(_) => TransportProtocol::Udp,
            TransportLayer::Icmpv4(_) => TransportProtocol::Icmpv4,
        }
    }
}

/// The parsed form of one captured frame
#[derive(Debug)]
pub struct PacketIndicator<'a> {
    network: NetworkLayer<'a>,
    transport: TransportLayer<'a>,
}

impl<'a> PacketIndicator<'a> {
    /// Parse a captured frame, stripping the link layer of the device kind
    pub fn parse_frame(frame: &'a [u8], link: LinkKind) -> Result<Self> {
        let packet = match link {
            LinkKind::Ethernet => {
                let frame = ethernet::Frame::parse(frame)?;
                if EtherType::from_u16(frame.ethertype()).is_none() {
                    return Err(Error::UnsupportedLayer(format!(
                        "ethertype {:#06x}",
                        frame.ethertype()
                    )));
                }
                frame.payload()
            }
            LinkKind::Loopback => loopback::Frame::parse(frame)?.payload(),
        };

        Self::parse_packet(packet)
    }

    /// Parse a bare IP packet (a decrypted inner datagram)
    pub fn parse_packet(packet: &'a [u8]) -> Result<Self> {
        if packet.is_empty() {
            return Err(Error::Parse("empty packet".into()));
        }

        let network = match packet[0] >> 4 {
            4 => NetworkLayer::Ipv4(Ipv4Header::parse(packet)?),
            6 => NetworkLayer::Ipv6(Ipv6Header::parse(packet)?),
            version => {
                return Err(Error::UnsupportedLayer(format!("ip version {}", version)));
            }
        };

        let protocol = TransportProtocol::from_u8(network.protocol_number()).ok_or_else(|| {
            Error::UnsupportedLayer(format!("protocol {}", network.protocol_number()))
        })?;

        let body = network.payload();
        let transport = match protocol {
            TransportProtocol::Tcp => TransportLayer::Tcp(TcpHeader::parse(body)?),
            TransportProtocol::Udp => TransportLayer::Udp(UdpHeader::parse(body)?),
            TransportProtocol::Icmpv4 => {
                if matches!(network, NetworkLayer::Ipv6(_)) {
                    return Err(Error::UnsupportedLayer("icmpv4 over ipv6".into()));
                }
                TransportLayer::Icmpv4(Icmpv4Indicator::parse(body)?)
            }
        };

        Ok(Self { network, transport })
    }

    pub fn network(&self) -> &NetworkLayer<'a> {
        &self.network
    }

    pub fn transport(&self) -> &TransportLayer<'a> {
        &self.transport
    }

    pub fn transport_protocol(&self) -> TransportProtocol {
        self.transport.protocol()
    }

    pub fn src_ip(&self) -> IpAddr {
        self.network.src_ip()
    }

    pub fn dst_ip(&self) -> IpAddr {
        self.network.dst_ip()
    }

    /// TTL or hop limit of the network layer
    pub fn ttl(&self) -> u8 {
        self.network.ttl()
    }

    /// Source endpoint: port, ICMP query id, or 0
    pub fn src(&self) -> Endpoint {
        let value = match &self.transport {
            TransportLayer::Tcp(hdr) => hdr.src_port(),
            TransportLayer::Udp(hdr) => hdr.src_port(),
            TransportLayer::Icmpv4(ind) => {
                if ind.is_query() {
                    ind.id()
                } else {
                    0
                }
            }
        };
        Endpoint::new(self.src_ip(), value)
    }

    /// Destination endpoint: port, ICMP query id, or 0
    pub fn dst(&self) -> Endpoint {
        let value = match &self.transport {
            TransportLayer::Tcp(hdr) => hdr.dst_port(),
            TransportLayer::Udp(hdr) => hdr.dst_port(),
            TransportLayer::Icmpv4(ind) => {
                if ind.is_query() {
                    ind.id()
                } else {
                    0
                }
            }
        };
        Endpoint::new(self.dst_ip(), value)
    }

    /// The protocol a NAT entry for this packet is keyed on
    ///
    /// An ICMPv4 error translates on the flow of its embedded datagram, so it
    /// keys on the embedded transport protocol.
    pub fn nat_proto(&self) -> TransportProtocol {
        match &self.transport {
            TransportLayer::Icmpv4(ind) => match ind.embedded() {
                Some(emb) => emb.protocol,
                None => TransportProtocol::Icmpv4,
            },
            other => other.protocol(),
        }
    }

    /// The NAT key seen from the sender's side
    ///
    /// For an ICMPv4 error the flow's source is the embedded datagram's
    /// destination (the embedded datagram travelled in the opposite
    /// direction of the error).
    pub fn nat_src(&self) -> Endpoint {
        match &self.transport {
            TransportLayer::Icmpv4(ind) => match ind.embedded() {
                Some(emb) => Endpoint::new(IpAddr::V4(emb.ipv4.dst_addr()), emb.dst_value()),
                None => self.src(),
            },
            _ => self.src(),
        }
    }

    /// The NAT key seen from the receiver's side
    pub fn nat_dst(&self) -> Endpoint {
        match &self.transport {
            TransportLayer::Icmpv4(ind) => match ind.embedded() {
                Some(emb) => Endpoint::new(IpAddr::V4(emb.ipv4.src_addr()), emb.src_value()),
                None => self.dst(),
            },
            _ => self.dst(),
        }
    }

    /// Transport payload; for ICMP the message body after the 8-byte header
    pub fn payload(&self) -> &'a [u8] {
        match &self.transport {
            TransportLayer::Tcp(hdr) => hdr.payload(),
            TransportLayer::Udp(hdr) => hdr.payload(),
            TransportLayer::Icmpv4(ind) => ind.header().payload(),
        }
    }

    pub fn tcp(&self) -> Option<&TcpHeader<'a>> {
        match &self.transport {
            TransportLayer::Tcp(hdr) => Some(hdr),
            _ => None,
        }
    }

    pub fn icmpv4(&self) -> Option<&Icmpv4Indicator<'a>> {
        match &self.transport {
            TransportLayer::Icmpv4(ind) => Some(ind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{icmp, ipv4::Ipv4Builder, udp, MacAddr};
    use std::net::Ipv4Addr;

    fn udp_packet(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16) -> Vec<u8> {
        let mut seg = udp::build(sport, dport, b"payload");
        seg.update_checksum(IpAddr::V4(src), IpAddr::V4(dst));
        Ipv4Builder::new()
            .src_addr(src)
            .dst_addr(dst)
            .protocol(udp::PROTOCOL_NUMBER)
            .ttl(64)
            .payload(seg.as_bytes())
            .build()
    }

    #[test]
    fn test_parse_udp_endpoints() {
        let packet = udp_packet(
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(8, 8, 8, 8),
            33000,
            53,
        );
        let ind = PacketIndicator::parse_packet(&packet).unwrap();

        assert_eq!(ind.transport_protocol(), TransportProtocol::Udp);
        assert_eq!(ind.src().to_string(), "10.0.0.5:33000");
        assert_eq!(ind.dst().to_string(), "8.8.8.8:53");
        assert_eq!(ind.nat_src(), ind.src());
        assert_eq!(ind.nat_dst(), ind.dst());
        assert_eq!(ind.payload(), b"payload");
        assert_eq!(ind.ttl(), 64);
    }

    #[test]
    fn test_parse_ethernet_frame() {
        let packet = udp_packet(
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(8, 8, 8, 8),
            33000,
            53,
        );
        let frame = ethernet::FrameBuilder::new()
            .dst_mac(MacAddr([2, 0, 0, 0, 0, 2]))
            .src_mac(MacAddr([2, 0, 0, 0, 0, 1]))
            .ethertype(EtherType::Ipv4)
            .payload(&packet)
            .build();

        let ind = PacketIndicator::parse_frame(&frame, LinkKind::Ethernet).unwrap();
        assert_eq!(ind.src().to_string(), "10.0.0.5:33000");
    }

    #[test]
    fn test_parse_loopback_frame() {
        let packet = udp_packet(
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(8, 8, 8, 8),
            40000,
            53,
        );
        let frame = loopback::build(loopback::FAMILY_INET, &packet);

        let ind = PacketIndicator::parse_frame(&frame, LinkKind::Loopback).unwrap();
        assert_eq!(ind.src().to_string(), "127.0.0.1:40000");
    }

    #[test]
    fn test_icmp_query_nat_key_is_id() {
        let echo = icmp::build_echo(IcmpType::EchoRequest, 0x1234, 1, b"ping");
        let packet = Ipv4Builder::new()
            .src_addr(Ipv4Addr::new(10, 0, 0, 5))
            .dst_addr(Ipv4Addr::new(1, 1, 1, 1))
            .protocol(1)
            .ttl(64)
            .payload(echo.as_bytes())
            .build();

        let ind = PacketIndicator::parse_packet(&packet).unwrap();
        assert_eq!(ind.transport_protocol(), TransportProtocol::Icmpv4);
        assert_eq!(ind.nat_proto(), TransportProtocol::Icmpv4);
        assert_eq!(ind.nat_src(), Endpoint::new("10.0.0.5".parse().unwrap(), 0x1234));
        assert_eq!(ind.nat_dst(), Endpoint::new("1.1.1.1".parse().unwrap(), 0x1234));
        assert!(ind.icmpv4().unwrap().is_query());
    }

    #[test]
    fn test_icmp_error_nat_keys_follow_embedded_flow() {
        // Port-unreachable sent back to 8.8.8.8: embeds the UDP datagram
        // 8.8.8.8:53 -> 10.0.0.5:33000 that provoked it
        let embedded = udp_packet(
            Ipv4Addr::new(8, 8, 8, 8),
            Ipv4Addr::new(10, 0, 0, 5),
            53,
            33000,
        );
        let mut error = icmp::IcmpPacket::from_error_parts(3, 3, [0; 4], &embedded);
        error.update_checksum();
        let packet = Ipv4Builder::new()
            .src_addr(Ipv4Addr::new(10, 0, 0, 5))
            .dst_addr(Ipv4Addr::new(8, 8, 8, 8))
            .protocol(1)
            .ttl(64)
            .payload(error.as_bytes())
            .build();

        let ind = PacketIndicator::parse_packet(&packet).unwrap();
        assert_eq!(ind.nat_proto(), TransportProtocol::Udp);
        // The flow's source is the embedded destination
        assert_eq!(
            ind.nat_src(),
            Endpoint::new("10.0.0.5".parse().unwrap(), 33000)
        );
        assert_eq!(ind.nat_dst(), Endpoint::new("8.8.8.8".parse().unwrap(), 53));
        assert!(!ind.icmpv4().unwrap().is_query());
    }

    #[test]
    fn test_icmp_error_truncated_embedded_rejected() {
        // Embedded IPv4 header followed by fewer than 8 transport bytes
        let embedded = Ipv4Builder::new()
            .src_addr(Ipv4Addr::new(8, 8, 8, 8))
            .dst_addr(Ipv4Addr::new(10, 0, 0, 5))
            .protocol(17)
            .payload(&[0u8; 4])
            .build();
        let mut error = icmp::IcmpPacket::from_error_parts(3, 3, [0; 4], &embedded);
        error.update_checksum();
        let packet = Ipv4Builder::new()
            .src_addr(Ipv4Addr::new(10, 0, 0, 5))
            .dst_addr(Ipv4Addr::new(8, 8, 8, 8))
            .protocol(1)
            .payload(error.as_bytes())
            .build();

        assert!(PacketIndicator::parse_packet(&packet).is_err());
    }

    #[test]
    fn test_unsupported_protocol_rejected() {
        let packet = Ipv4Builder::new()
            .src_addr(Ipv4Addr::new(10, 0, 0, 5))
            .dst_addr(Ipv4Addr::new(8, 8, 8, 8))
            .protocol(47) // GRE
            .payload(&[0u8; 8])
            .build();

        assert!(matches!(
            PacketIndicator::parse_packet(&packet),
            Err(Error::UnsupportedLayer(_))
        ));
    }
}
