//! Configuration validation

use super::Config;
use crate::crypto::Method;
use crate::protocol::MacAddr;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            eprintln!("[WARN] {}", warning);
        }
        for error in &self.errors {
            eprintln!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_server(config, &mut result);
    validate_interfaces(config, &mut result);
    validate_gateway(config, &mut result);
    validate_crypto(config, &mut result);

    result
}

fn validate_server(config: &Config, result: &mut ValidationResult) {
    if config.server.port == 0 {
        result.error("server.port: port 0 out of range");
    }

    if config.server.listen.is_empty() {
        result.error("server.listen: missing listen device");
    }

    for name in &config.server.listen {
        if !config.interfaces.contains_key(name) {
            result.error(format!(
                "server.listen: no [interfaces.{}] section for listen device",
                name
            ));
        }
    }

    if !config.interfaces.contains_key(&config.server.upstream) {
        result.error(format!(
            "server.upstream: no [interfaces.{}] section for upstream device",
            config.server.upstream
        ));
    }
}

fn validate_interfaces(config: &Config, result: &mut ValidationResult) {
    for (name, iface) in &config.interfaces {
        if iface.addresses.is_empty() {
            result.error(format!("interfaces.{}: no addresses configured", name));
        }

        if let Some(ref mac) = iface.mac {
            if mac.parse::<MacAddr>().is_err() {
                result.error(format!("interfaces.{}: invalid MAC {:?}", name, mac));
            }
        } else if !iface.loopback {
            result.warn(format!(
                "interfaces.{}: mac not specified, reading from sysfs",
                name
            ));
        }
    }
}

fn validate_gateway(config: &Config, result: &mut ValidationResult) {
    if config.gateway.mac.parse::<MacAddr>().is_err() {
        result.error(format!("gateway.mac: invalid MAC {:?}", config.gateway.mac));
    }
}

fn validate_crypto(config: &Config, result: &mut ValidationResult) {
    match config.crypto.method.parse::<Method>() {
        Ok(Method::Plain) => {
            result.warn("crypto.method: plain cipher sends tunnel payloads unencrypted");
        }
        Ok(_) => {
            if config.crypto.password.is_empty() {
                result.error("crypto.password: required for an encrypting cipher");
            }
        }
        Err(_) => {
            result.error(format!(
                "crypto.method: unknown cipher method {:?}",
                config.crypto.method
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn valid_toml() -> &'static str {
        r#"
            [server]
            port = 8080
            listen = ["eth0"]
            upstream = "eth0"

            [interfaces.eth0]
            mac = "02:00:00:00:00:01"
            addresses = ["192.0.2.1"]

            [gateway]
            address = "192.0.2.254"
            mac = "02:00:00:00:00:fe"

            [crypto]
            method = "chacha20-poly1305"
            password = "secret"
        "#
    }

    #[test]
    fn test_valid_config() {
        let cfg = config::parse(valid_toml()).unwrap();
        let result = validate(&cfg);
        assert!(!result.has_errors(), "{:?}", result.errors);
    }

    #[test]
    fn test_port_zero_rejected() {
        let toml = valid_toml().replace("port = 8080", "port = 0");
        let cfg = config::parse(&toml).unwrap();
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn test_empty_listen_rejected() {
        let toml = valid_toml().replace("listen = [\"eth0\"]", "listen = []");
        let cfg = config::parse(&toml).unwrap();
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn test_unknown_listen_device_rejected() {
        let toml = valid_toml().replace("listen = [\"eth0\"]", "listen = [\"eth9\"]");
        let cfg = config::parse(&toml).unwrap();
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn test_missing_password_rejected() {
        let toml = valid_toml().replace("password = \"secret\"", "password = \"\"");
        let cfg = config::parse(&toml).unwrap();
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn test_plain_cipher_warns() {
        let toml = valid_toml().replace("chacha20-poly1305", "plain");
        let cfg = config::parse(&toml).unwrap();
        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert!(!result.warnings.is_empty());
    }
}
