//! Network protocol implementations
//!
//! All L2+ protocols are implemented from scratch in userspace; the tunnel
//! never hands packets to the kernel stack.

pub mod ethernet;
pub mod icmp;
pub mod indicator;
pub mod ipv4;
pub mod ipv6;
pub mod loopback;
pub mod tcp;
pub mod types;
pub mod udp;

pub use indicator::{Icmpv4Indicator, LinkKind, NetworkLayer, PacketIndicator, TransportLayer};
pub use types::*;
