//! Address allocation and peer registry for wgmesh.
//!
//! Carves unique tunnel addresses out of the configured IPv4/IPv6 pools and
//! keeps the server/client star topology of a provisioning run consistent.

#![forbid(unsafe_code)]

pub mod allocation;
pub mod registry;
pub mod types;

pub use allocation::{AddressAllocator, AddressPool, AllocationError};
pub use registry::{
    Client, ClientPeer, ClientRef, PeerRegistry, RegistryError, Server, ServerPeer,
};
pub use types::{join_networks, AddressFamily, AssignedAddress, Endpoint};
