//! Core types shared by the allocator and the peer registry.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// IP address family of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

impl AddressFamily {
    /// Family of an address.
    #[must_use]
    pub const fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Prefix length of a single-host network in this family.
    #[must_use]
    pub const fn host_prefix_len(self) -> u8 {
        match self {
            Self::V4 => 32,
            Self::V6 => 128,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "ipv4"),
            Self::V6 => write!(f, "ipv6"),
        }
    }
}

/// One address handed to a party, in both of the forms the configs need.
///
/// `tunnel` keeps the pool's prefix length and is what the party puts on its
/// own interface. `host` is the same address as a single-host network and is
/// what the server routes to that party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignedAddress {
    /// Address with the pool prefix, e.g. `10.13.13.2/24`.
    pub tunnel: IpNet,
    /// Address with the single-host prefix, e.g. `10.13.13.2/32`.
    pub host: IpNet,
}

impl AssignedAddress {
    /// The bare address.
    #[must_use]
    pub fn addr(&self) -> IpAddr {
        self.host.addr()
    }

    /// Family of the address.
    #[must_use]
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.addr())
    }
}

impl fmt::Display for AssignedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tunnel)
    }
}

/// Joins networks into the comma-separated form used by `Address` and
/// `AllowedIPs` directives.
#[must_use]
pub fn join_networks<'a>(networks: impl IntoIterator<Item = &'a IpNet>) -> String {
    networks
        .into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Externally reachable address of the server, as written into client
/// `Endpoint` directives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a domain name or IP literal and a port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Domain name or IP literal.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// UDP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
