//! Provisioning settings.
//!
//! Settings come from CLI flags with environment-variable fallbacks (see
//! [`crate::cli`]); this module holds the resolved values, their defaults and
//! validation.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use thiserror::Error;
use wgmesh_network::Endpoint;

/// Default configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "/config";
/// File name of the server configuration inside the configuration directory.
pub const SERVER_CONFIG_FILE_NAME: &str = "wg0.conf";
/// Default IPv4 tunnel subnet.
pub const DEFAULT_SUBNET_V4: &str = "10.13.13.0/24";
/// Default IPv6 tunnel subnet.
pub const DEFAULT_SUBNET_V6: &str = "fc00:bfb7:3bdb:ae33::/64";
/// Default WireGuard listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 51820;
/// Default DNS resolvers handed to clients.
pub const DEFAULT_DNS: &[&str] = &[
    "77.88.8.8",
    "77.88.8.1",
    "2a02:6b8::feed:0ff",
    "2a02:6b8:0:1::feed:0ff",
];
/// Default client routing policy (full tunnel).
pub const DEFAULT_ALLOWED_IPS: &[&str] = &["0.0.0.0/0", "::/0"];
/// Default client name prefix.
pub const DEFAULT_PEER_PREFIX: &str = "peer_";
/// Egress interface names tried in order.
pub const DEFAULT_EGRESS_INTERFACES: &[&str] = &["eth0", "ens3"];

/// Prefix applied when an IPv4 subnet is given as a bare address.
const BARE_V4_PREFIX: u8 = 24;
/// Prefix applied when an IPv6 subnet is given as a bare address.
const BARE_V6_PREFIX: u8 = 64;

/// Errors in provisioning settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// A subnet could not be parsed.
    #[error("invalid {family} subnet {value:?}: {message}")]
    InvalidSubnet {
        /// `IPv4` or `IPv6`.
        family: &'static str,
        /// The rejected input.
        value: String,
        /// Parser message.
        message: String,
    },
    /// A network in a list could not be parsed.
    #[error("invalid network {value:?}: {message}")]
    InvalidNetwork {
        /// The rejected input.
        value: String,
        /// Parser message.
        message: String,
    },
    /// A setting has an unusable value.
    #[error("{field}: {message}")]
    Invalid {
        /// Setting name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl SettingsError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Resolved settings for one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionSettings {
    /// Directory holding the server file and one directory per client.
    pub config_dir: PathBuf,
    /// Path of the server configuration file.
    pub server_file: PathBuf,
    /// IPv4 tunnel subnet.
    pub subnet_v4: Ipv4Net,
    /// IPv6 tunnel subnet, if dual-stack.
    pub subnet_v6: Option<Ipv6Net>,
    /// Server listen port.
    pub listen_port: u16,
    /// Public domain name or IP clients connect to.
    pub server_url: String,
    /// DNS resolvers for clients.
    pub dns: Vec<IpAddr>,
    /// Networks clients route through the tunnel.
    pub allowed_ips: Vec<IpNet>,
    /// Number of clients to provision.
    pub peers: usize,
    /// Client name prefix; client `i` is `<prefix><i>`.
    pub peer_prefix: String,
    /// Egress interface names in priority order.
    pub egress_interfaces: Vec<String>,
    /// Extra command appended to `PostUp`.
    pub post_up_hook: Option<String>,
    /// Extra command appended to `PostDown`.
    pub post_down_hook: Option<String>,
}

impl ProvisionSettings {
    /// Settings with every default applied.
    ///
    /// # Errors
    ///
    /// Only fails if the built-in defaults are malformed.
    pub fn with_defaults(
        config_dir: impl Into<PathBuf>,
        server_url: impl Into<String>,
    ) -> Result<Self, SettingsError> {
        let config_dir = config_dir.into();
        Ok(Self {
            server_file: default_server_file(&config_dir),
            config_dir,
            subnet_v4: parse_subnet_v4(DEFAULT_SUBNET_V4)?,
            subnet_v6: Some(parse_subnet_v6(DEFAULT_SUBNET_V6)?),
            listen_port: DEFAULT_LISTEN_PORT,
            server_url: server_url.into(),
            dns: DEFAULT_DNS
                .iter()
                .map(|s| {
                    s.parse::<IpAddr>()
                        .map_err(|e| SettingsError::invalid("dns", e.to_string()))
                })
                .collect::<Result<_, _>>()?,
            allowed_ips: DEFAULT_ALLOWED_IPS
                .iter()
                .map(|s| parse_network(s))
                .collect::<Result<_, _>>()?,
            peers: 1,
            peer_prefix: DEFAULT_PEER_PREFIX.to_string(),
            egress_interfaces: DEFAULT_EGRESS_INTERFACES
                .iter()
                .map(ToString::to_string)
                .collect(),
            post_up_hook: None,
            post_down_hook: None,
        })
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.listen_port == 0 {
            return Err(SettingsError::invalid("port", "must not be 0"));
        }
        let url = self.server_url.trim();
        if url.is_empty() {
            return Err(SettingsError::invalid("server-url", "must not be empty"));
        }
        if url.contains(char::is_whitespace) || url.contains('/') {
            return Err(SettingsError::invalid(
                "server-url",
                format!("{url:?} is not a host name or IP address"),
            ));
        }
        if self.dns.is_empty() {
            return Err(SettingsError::invalid("dns", "at least one resolver is required"));
        }
        if self.allowed_ips.is_empty() {
            return Err(SettingsError::invalid("allowed-ips", "at least one network is required"));
        }
        if self.peer_prefix.is_empty() || self.peer_prefix.contains(['/', '\\', '\0']) {
            return Err(SettingsError::invalid(
                "peer-prefix",
                format!("{:?} cannot be used in a directory name", self.peer_prefix),
            ));
        }
        if self.egress_interfaces.iter().all(|name| name.trim().is_empty()) {
            return Err(SettingsError::invalid(
                "egress-interfaces",
                "at least one interface name is required",
            ));
        }
        Ok(())
    }

    /// The address pools to allocate from, IPv4 first.
    #[must_use]
    pub fn pools(&self) -> Vec<IpNet> {
        let mut pools = vec![IpNet::V4(self.subnet_v4)];
        pools.extend(self.subnet_v6.map(IpNet::V6));
        pools
    }

    /// The server endpoint written into client configs.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.server_url.trim(), self.listen_port)
    }

    /// Name of client `index`.
    #[must_use]
    pub fn client_name(&self, index: usize) -> String {
        format!("{}{index}", self.peer_prefix)
    }
}

/// Server file location for a configuration directory.
#[must_use]
pub fn default_server_file(config_dir: &Path) -> PathBuf {
    config_dir.join(SERVER_CONFIG_FILE_NAME)
}

/// Parses an IPv4 subnet; a bare address gets a /24 prefix.
///
/// # Errors
///
/// Returns [`SettingsError::InvalidSubnet`] for anything that is not an
/// IPv4 network, including networks with host bits set.
pub fn parse_subnet_v4(value: &str) -> Result<Ipv4Net, SettingsError> {
    parse_subnet(value, "IPv4", BARE_V4_PREFIX)
}

/// Parses an IPv6 subnet; a bare address gets a /64 prefix.
///
/// # Errors
///
/// Returns [`SettingsError::InvalidSubnet`] for anything that is not an
/// IPv6 network, including networks with host bits set.
pub fn parse_subnet_v6(value: &str) -> Result<Ipv6Net, SettingsError> {
    parse_subnet(value, "IPv6", BARE_V6_PREFIX)
}

trait Subnet: FromStr + Copy + PartialEq {
    type Addr: FromStr;
    fn with_prefix(addr: Self::Addr, prefix: u8) -> Option<Self>;
    fn truncated(self) -> Self;
}

impl Subnet for Ipv4Net {
    type Addr = std::net::Ipv4Addr;
    fn with_prefix(addr: Self::Addr, prefix: u8) -> Option<Self> {
        Self::new(addr, prefix).ok()
    }
    fn truncated(self) -> Self {
        self.trunc()
    }
}

impl Subnet for Ipv6Net {
    type Addr = std::net::Ipv6Addr;
    fn with_prefix(addr: Self::Addr, prefix: u8) -> Option<Self> {
        Self::new(addr, prefix).ok()
    }
    fn truncated(self) -> Self {
        self.trunc()
    }
}

fn parse_subnet<N: Subnet>(value: &str, family: &'static str, bare_prefix: u8) -> Result<N, SettingsError> {
    let value = value.trim();
    let error = |message: &str| SettingsError::InvalidSubnet {
        family,
        value: value.to_string(),
        message: message.to_string(),
    };

    let net = if value.contains('/') {
        value
            .parse::<N>()
            .map_err(|_| error("not a network in CIDR notation"))?
    } else {
        let addr = value
            .parse::<N::Addr>()
            .map_err(|_| error("not an address"))?;
        N::with_prefix(addr, bare_prefix).ok_or_else(|| error("invalid prefix length"))?
    };

    if net.truncated() != net {
        return Err(error("host bits are set"));
    }
    Ok(net)
}

/// Parses one network of an allowed-IPs list.
///
/// # Errors
///
/// Returns [`SettingsError::InvalidNetwork`] if `value` is not CIDR notation.
pub fn parse_network(value: &str) -> Result<IpNet, SettingsError> {
    let value = value.trim();
    value.parse().map_err(|e: ipnet::AddrParseError| SettingsError::InvalidNetwork {
        value: value.to_string(),
        message: e.to_string(),
    })
}
