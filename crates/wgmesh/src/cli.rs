//! Command-line argument parsing with clap.
//!
//! Every flag falls back to an environment variable so the tool can run as a
//! container entrypoint configured purely through the environment.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::settings::{
    default_server_file, parse_network, parse_subnet_v4, parse_subnet_v6, ProvisionSettings,
    DEFAULT_ALLOWED_IPS, DEFAULT_CONFIG_DIR, DEFAULT_DNS, DEFAULT_EGRESS_INTERFACES,
    DEFAULT_LISTEN_PORT, DEFAULT_PEER_PREFIX, DEFAULT_SUBNET_V4, DEFAULT_SUBNET_V6,
};

/// Provision a WireGuard server and its client configurations.
#[derive(Parser, Debug, Clone)]
#[command(name = "wgmesh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the server config and one directory per client.
    #[arg(long, env = "CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,

    /// Server config file [default: <CONFIG_DIR>/wg0.conf].
    #[arg(long, env = "SERVER_CONFIG_FILE")]
    pub server_file: Option<PathBuf>,

    /// IPv4 tunnel subnet (a bare address gets /24).
    #[arg(long, env = "INTERNAL_SUBNETv4", default_value = DEFAULT_SUBNET_V4, value_parser = parse_subnet_v4)]
    pub subnet_v4: Ipv4Net,

    /// IPv6 tunnel subnet (a bare address gets /64).
    #[arg(long, env = "INTERNAL_SUBNETv6", default_value = DEFAULT_SUBNET_V6, value_parser = parse_subnet_v6)]
    pub subnet_v6: Ipv6Net,

    /// Provision IPv4 addresses only.
    #[arg(long, env = "DISABLE_IPV6", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub disable_ipv6: bool,

    /// WireGuard listen port.
    #[arg(long, env = "SERVERPORT", default_value_t = DEFAULT_LISTEN_PORT)]
    pub port: u16,

    /// Public domain name or IP address clients connect to.
    #[arg(long, env = "SERVERURL")]
    pub server_url: String,

    /// DNS resolvers for clients.
    #[arg(long, env = "PEERDNS", value_delimiter = ',', default_values = DEFAULT_DNS, value_parser = parse_dns)]
    pub dns: Vec<IpAddr>,

    /// Networks clients route through the tunnel.
    #[arg(long, env = "AllowedIPs", value_delimiter = ',', default_values = DEFAULT_ALLOWED_IPS, value_parser = parse_network)]
    pub allowed_ips: Vec<IpNet>,

    /// Number of client configurations to create.
    #[arg(long, env = "PEERS", default_value_t = 1)]
    pub peers: usize,

    /// Client name prefix.
    #[arg(long, env = "PEER_PREFIX", default_value = DEFAULT_PEER_PREFIX)]
    pub peer_prefix: String,

    /// Egress interface names, tried in order.
    #[arg(long, env = "EGRESS_INTERFACES", value_delimiter = ',', default_values = DEFAULT_EGRESS_INTERFACES)]
    pub egress_interfaces: Vec<String>,

    /// Extra command appended to the server's PostUp rules.
    #[arg(long, env = "POST_UP_HOOK")]
    pub post_up_hook: Option<String>,

    /// Extra command appended to the server's PostDown rules.
    #[arg(long, env = "POST_DOWN_HOOK")]
    pub post_down_hook: Option<String>,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Output format for the run summary.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,
}

impl Cli {
    /// Resolves the arguments into provisioning settings.
    #[must_use]
    pub fn into_settings(self) -> ProvisionSettings {
        let server_file = self
            .server_file
            .unwrap_or_else(|| default_server_file(&self.config_dir));
        ProvisionSettings {
            config_dir: self.config_dir,
            server_file,
            subnet_v4: self.subnet_v4,
            subnet_v6: (!self.disable_ipv6).then_some(self.subnet_v6),
            listen_port: self.port,
            server_url: self.server_url,
            dns: self.dns,
            allowed_ips: self.allowed_ips,
            peers: self.peers,
            peer_prefix: self.peer_prefix,
            egress_interfaces: self
                .egress_interfaces
                .into_iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
            post_up_hook: self.post_up_hook.filter(|hook| !hook.trim().is_empty()),
            post_down_hook: self.post_down_hook.filter(|hook| !hook.trim().is_empty()),
        }
    }
}

fn parse_dns(value: &str) -> Result<IpAddr, String> {
    value
        .trim()
        .parse()
        .map_err(|e| format!("invalid DNS resolver {value:?}: {e}"))
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Output format for the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}
