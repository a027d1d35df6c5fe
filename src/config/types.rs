//! Configuration types

use crate::telemetry::LogConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub interfaces: HashMap<String, InterfaceConfig>,
    pub gateway: GatewayConfig,
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Tunnel service section
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen port for the pseudo-TCP stream
    pub port: u16,
    /// Devices to accept client traffic on
    pub listen: Vec<String>,
    /// Device facing the upstream network
    pub upstream: String,
}

/// Per-device section
#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    pub alias: Option<String>,
    /// MAC address; read from sysfs when omitted
    pub mac: Option<String>,
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
    #[serde(default)]
    pub loopback: bool,
}

/// Next-hop gateway section
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub address: IpAddr,
    pub mac: String,
}

/// Cipher section
#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    /// "plain" or "chacha20-poly1305"
    pub method: String,
    #[serde(default)]
    pub password: String,
}
