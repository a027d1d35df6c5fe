//! Software frame filters
//!
//! The capture layer delivers every frame on the device; these predicates
//! narrow the stream the way a BPF expression would.

use crate::protocol::{LinkKind, PacketIndicator, TransportProtocol};

/// Which frames a bound capture accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFilter {
    /// `tcp && dst port P` - the tunnel listener
    Listen { port: u16 },
    /// `((tcp || udp) && not dst port P) || icmp` - upstream replies
    Upstream { port: u16 },
}

impl FrameFilter {
    pub fn matches(&self, frame: &[u8], link: LinkKind) -> bool {
        let Ok(indicator) = PacketIndicator::parse_frame(frame, link) else {
            return false;
        };

        match self {
            FrameFilter::Listen { port } => {
                indicator.transport_protocol() == TransportProtocol::Tcp
                    && indicator.dst().value == *port
            }
            FrameFilter::Upstream { port } => match indicator.transport_protocol() {
                TransportProtocol::Tcp | TransportProtocol::Udp => {
                    indicator.dst().value != *port
                }
                TransportProtocol::Icmpv4 => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::icmp::{self, IcmpType};
    use crate::protocol::ipv4::Ipv4Builder;
    use crate::protocol::{tcp, udp};
    use std::net::{IpAddr, Ipv4Addr};

    fn tcp_frame(dst_port: u16) -> Vec<u8> {
        let src = Ipv4Addr::new(10, 0, 0, 5);
        let dst = Ipv4Addr::new(192, 0, 2, 1);
        let mut seg = tcp::build_psh_ack(50000, dst_port, 1, 1, b"x");
        seg.update_checksum(IpAddr::V4(src), IpAddr::V4(dst));
        let packet = Ipv4Builder::new()
            .src_addr(src)
            .dst_addr(dst)
            .protocol(tcp::PROTOCOL_NUMBER)
            .payload(seg.as_bytes())
            .build();
        crate::protocol::loopback::build(crate::protocol::loopback::FAMILY_INET, &packet)
    }

    #[test]
    fn test_listen_filter() {
        let filter = FrameFilter::Listen { port: 8080 };
        assert!(filter.matches(&tcp_frame(8080), LinkKind::Loopback));
        assert!(!filter.matches(&tcp_frame(8081), LinkKind::Loopback));
    }

    #[test]
    fn test_upstream_filter_excludes_tunnel_port() {
        let filter = FrameFilter::Upstream { port: 8080 };
        assert!(filter.matches(&tcp_frame(443), LinkKind::Loopback));
        assert!(!filter.matches(&tcp_frame(8080), LinkKind::Loopback));
    }

    #[test]
    fn test_upstream_filter_accepts_icmp() {
        let echo = icmp::build_echo(IcmpType::EchoReply, 7, 1, b"");
        let packet = Ipv4Builder::new()
            .src_addr(Ipv4Addr::new(1, 1, 1, 1))
            .dst_addr(Ipv4Addr::new(203, 0, 113, 7))
            .protocol(1)
            .payload(echo.as_bytes())
            .build();
        let frame = crate::protocol::loopback::build(crate::protocol::loopback::FAMILY_INET, &packet);

        let filter = FrameFilter::Upstream { port: 8080 };
        assert!(filter.matches(&frame, LinkKind::Loopback));
    }

    #[test]
    fn test_udp_on_listen_filter_rejected() {
        let src = Ipv4Addr::new(10, 0, 0, 5);
        let dst = Ipv4Addr::new(192, 0, 2, 1);
        let mut seg = udp::build(50000, 8080, b"x");
        seg.update_checksum(IpAddr::V4(src), IpAddr::V4(dst));
        let packet = Ipv4Builder::new()
            .src_addr(src)
            .dst_addr(dst)
            .protocol(udp::PROTOCOL_NUMBER)
            .payload(seg.as_bytes())
            .build();
        let frame = crate::protocol::loopback::build(crate::protocol::loopback::FAMILY_INET, &packet);

        let filter = FrameFilter::Listen { port: 8080 };
        assert!(!filter.matches(&frame, LinkKind::Loopback));
    }
}
