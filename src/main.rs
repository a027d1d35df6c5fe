use clap::{Parser, Subcommand};
use raptun::capture::{AfPacketSocket, FrameFilter};
use raptun::config::{self, Config, InterfaceConfig};
use raptun::crypto::{self, Method};
use raptun::dataplane::{Conn, Device, Server};
use raptun::protocol::MacAddr;
use raptun::telemetry::init_logging;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "raptun")]
#[command(about = "Raw-packet tunnel server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tunnel server
    Run {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Validate config.toml without starting
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Validate { config }) => {
            if let Err(e) = cmd_validate(&config) {
                eprintln!("[ERROR] {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = cmd_run(&config) {
                eprintln!("[ERROR] {}", e);
                std::process::exit(1);
            }
        }
        None => {
            if let Err(e) = cmd_run(&PathBuf::from("config.toml")) {
                eprintln!("[ERROR] {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn cmd_validate(config_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}

fn cmd_run(config_path: &PathBuf) -> Result<(), String> {
    use tokio::runtime::Runtime;

    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err("Validation failed with errors".to_string());
    }

    init_logging(Some(&cfg.log));

    let method: Method = cfg
        .crypto
        .method
        .parse()
        .map_err(|e| format!("Invalid cipher method: {}", e))?;
    let crypt = crypto::new_crypt(method, &cfg.crypto.password);

    let gateway = gateway_device(&cfg)?;
    let mut server = Server::new(cfg.server.port, crypt);

    for name in &cfg.server.listen {
        let iface = cfg
            .interfaces
            .get(name)
            .ok_or_else(|| format!("No [interfaces.{}] section", name))?;
        let dev = build_device(name, iface);

        info!("Binding to interface {}...", name);
        let socket = AfPacketSocket::bind(name).map_err(|e| {
            format!(
                "Failed to bind to {}: {}. Run with root privileges.",
                name, e
            )
        })?;

        let filter = FrameFilter::Listen {
            port: cfg.server.port,
        };
        let conn = if dev.is_loopback {
            Conn::new(dev.clone(), dev, filter, socket)
        } else {
            Conn::new(dev, gateway.clone(), filter, socket)
        };
        server.add_listener(conn);
    }

    let up_iface = cfg
        .interfaces
        .get(&cfg.server.upstream)
        .ok_or_else(|| format!("No [interfaces.{}] section", cfg.server.upstream))?;
    let up_dev = build_device(&cfg.server.upstream, up_iface);

    info!("Binding to upstream interface {}...", cfg.server.upstream);
    let socket = AfPacketSocket::bind(&cfg.server.upstream).map_err(|e| {
        format!(
            "Failed to bind to {}: {}. Run with root privileges.",
            cfg.server.upstream, e
        )
    })?;
    server.set_upstream(Conn::new(
        up_dev,
        gateway,
        FrameFilter::Upstream {
            port: cfg.server.port,
        },
        socket,
    ));

    let server = Arc::new(server);

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;
    rt.block_on(async move {
        let runner = Arc::clone(&server);
        tokio::select! {
            result = runner.run() => result.map_err(|e| e.to_string()),
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                server.close();
                Ok(())
            }
        }
    })
}

fn gateway_device(cfg: &Config) -> Result<Device, String> {
    let mac: MacAddr = cfg
        .gateway
        .mac
        .parse()
        .map_err(|_| format!("Invalid gateway MAC {:?}", cfg.gateway.mac))?;

    Ok(Device::new(
        "gateway",
        None,
        mac,
        vec![cfg.gateway.address],
        false,
    ))
}

fn build_device(name: &str, iface: &InterfaceConfig) -> Device {
    let mac = iface
        .mac
        .as_deref()
        .and_then(|m| m.parse().ok())
        .unwrap_or_else(|| read_interface_mac(name));

    Device::new(
        name,
        iface.alias.clone(),
        mac,
        iface.addresses.clone(),
        iface.loopback,
    )
}

fn read_interface_mac(name: &str) -> MacAddr {
    // Read MAC from /sys/class/net/{name}/address
    let path = format!("/sys/class/net/{}/address", name);
    if let Ok(content) = std::fs::read_to_string(&path) {
        if let Ok(mac) = content.trim().parse() {
            return mac;
        }
    }
    MacAddr::ZERO
}
