//! Capture devices and bound connections

use crate::capture::{Capture, FrameFilter};
use crate::protocol::{LinkKind, MacAddr};
use crate::protocol::{ethernet::FrameBuilder, loopback, EtherType};
use crate::Result;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Maximum frame size read from a capture
const READ_BUFFER_SIZE: usize = 65536;

/// A capture endpoint: a network device with its addresses
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub alias: String,
    pub hardware_addr: MacAddr,
    pub ip_addrs: Vec<IpAddr>,
    pub is_loopback: bool,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        alias: Option<String>,
        hardware_addr: MacAddr,
        ip_addrs: Vec<IpAddr>,
        is_loopback: bool,
    ) -> Self {
        let name = name.into();
        let alias = alias.unwrap_or_else(|| name.clone());
        Self {
            name,
            alias,
            hardware_addr,
            ip_addrs,
            is_loopback,
        }
    }

    /// First configured IPv4 address
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.ip_addrs.iter().find_map(|ip| match ip {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
    }

    /// First configured IPv6 address
    pub fn ipv6(&self) -> Option<Ipv6Addr> {
        self.ip_addrs.iter().find_map(|ip| match ip {
            IpAddr::V4(_) => None,
            IpAddr::V6(v6) => Some(*v6),
        })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.alias, self.hardware_addr)?;
        for ip in &self.ip_addrs {
            write!(f, " {}", ip)?;
        }
        Ok(())
    }
}

/// A capture bound to a (source device, destination device) pair
///
/// Reads deliver only frames matching the filter; writes are atomic per
/// call. Both take `&self`, so a reader task and the pipelines can share
/// one connection.
pub struct Conn<C> {
    src_dev: Device,
    dst_dev: Device,
    filter: FrameFilter,
    capture: C,
}

impl<C: Capture> Conn<C> {
    pub fn new(src_dev: Device, dst_dev: Device, filter: FrameFilter, capture: C) -> Self {
        Self {
            src_dev,
            dst_dev,
            filter,
            capture,
        }
    }

    /// Read the next frame matching the filter
    pub async fn read_frame(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let len = self.capture.recv(&mut buf).await?;
            let frame = &buf[..len];
            if self.filter.matches(frame, self.link_kind()) {
                return Ok(frame.to_vec());
            }
        }
    }

    /// Write one frame
    pub async fn write_frame(&self, frame: &[u8]) -> Result<usize> {
        self.capture.send(frame).await
    }

    /// Close the underlying capture; reads and writes fail from now on
    pub fn close(&self) {
        self.capture.close();
    }

    /// Wrap an IP packet in the link framing of this connection
    pub fn wrap_frame(&self, packet: &[u8], ipv6: bool) -> Vec<u8> {
        match self.link_kind() {
            LinkKind::Loopback => {
                let family = if ipv6 {
                    loopback::FAMILY_INET6
                } else {
                    loopback::FAMILY_INET
                };
                loopback::build(family, packet)
            }
            LinkKind::Ethernet => FrameBuilder::new()
                .dst_mac(self.dst_dev.hardware_addr)
                .src_mac(self.src_dev.hardware_addr)
                .ethertype(if ipv6 { EtherType::Ipv6 } else { EtherType::Ipv4 })
                .payload(packet)
                .build(),
        }
    }

    pub fn is_loopback(&self) -> bool {
        self.src_dev.is_loopback
    }

    pub fn link_kind(&self) -> LinkKind {
        if self.is_loopback() {
            LinkKind::Loopback
        } else {
            LinkKind::Ethernet
        }
    }

    /// Local IPv4 address of the bound source device
    pub fn local_ipv4(&self) -> Option<Ipv4Addr> {
        self.src_dev.ipv4()
    }

    /// Local IPv6 address of the bound source device
    pub fn local_ipv6(&self) -> Option<Ipv6Addr> {
        self.src_dev.ipv6()
    }

    pub fn src_dev(&self) -> &Device {
        &self.src_dev
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn dst_dev(&self) -> &Device {
        &self.dst_dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(addrs: &[&str], loopback: bool) -> Device {
        Device::new(
            "eth0",
            None,
            MacAddr([2, 0, 0, 0, 0, 1]),
            addrs.iter().map(|a| a.parse().unwrap()).collect(),
            loopback,
        )
    }

    #[test]
    fn test_device_address_selection() {
        let dev = device(&["192.0.2.1", "2001:db8::1"], false);
        assert_eq!(dev.ipv4(), Some("192.0.2.1".parse().unwrap()));
        assert_eq!(dev.ipv6(), Some("2001:db8::1".parse().unwrap()));

        let v4only = device(&["192.0.2.1"], false);
        assert_eq!(v4only.ipv6(), None);
    }

    #[test]
    fn test_device_alias_defaults_to_name() {
        let dev = device(&[], false);
        assert_eq!(dev.alias, "eth0");
    }
}
