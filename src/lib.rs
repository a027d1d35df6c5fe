//! Raptun - Raw-packet tunnel server
//!
//! The server half of a packet-level tunnel. Clients ship whole IP datagrams
//! (TCP, UDP, ICMPv4) encrypted inside a pseudo-TCP stream; the server NATs
//! them onto its upstream network via raw packet capture and tunnels the
//! replies back.

pub mod capture;
pub mod config;
pub mod crypto;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
