//! In-memory model of the server and its clients.
//!
//! The registry is append-only for the lifetime of a provisioning run. It
//! keeps the star topology symmetric: every client linked to the server
//! appears exactly once in the server's peer set, and every linked client
//! holds the server as its single peer.

use std::collections::HashSet;

use ipnet::IpNet;
use tracing::{debug, info};
use wgmesh_wireguard::{KeyPair, PublicKey};

use crate::types::{AssignedAddress, Endpoint};

/// Errors that can occur while registering parties.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The server was registered twice.
    #[error("server is already registered")]
    ServerAlreadyRegistered,
    /// The server has not been registered yet.
    #[error("server is not registered")]
    ServerNotRegistered,
    /// A client with this name already exists.
    #[error("client {name} is already registered")]
    DuplicateClientName {
        /// The repeated name.
        name: String,
    },
    /// The public key already belongs to another party.
    #[error("public key {public_key} already belongs to another party")]
    DuplicatePublicKey {
        /// The repeated key.
        public_key: PublicKey,
    },
    /// The client name cannot be used as a directory name.
    #[error("invalid client name {name:?}")]
    InvalidClientName {
        /// The rejected name.
        name: String,
    },
    /// A party was registered without any address.
    #[error("{party} has no assigned address")]
    NoAddresses {
        /// Name of the party.
        party: String,
    },
    /// The client reference does not belong to this registry.
    #[error("unknown client reference {0}")]
    UnknownClient(usize),
    /// The client is already linked to the server.
    #[error("client {name} is already linked to the server")]
    AlreadyLinked {
        /// The client name.
        name: String,
    },
}

/// Handle to a registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientRef(usize);

impl ClientRef {
    /// Position of the client in registration order.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A client as seen from the server: routed to its host address(es) only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPeer {
    /// The client's public key.
    pub public_key: PublicKey,
    /// The client's single-host networks.
    pub allowed_ips: Vec<IpNet>,
}

/// The server as seen from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPeer {
    /// The server's public key.
    pub public_key: PublicKey,
    /// Where the client reaches the server.
    pub endpoint: Endpoint,
    /// Networks the client routes through the tunnel.
    pub allowed_ips: Vec<IpNet>,
}

/// The singular server party.
#[derive(Debug, Clone)]
pub struct Server {
    identity: KeyPair,
    addresses: Vec<AssignedAddress>,
    peers: Vec<ServerPeer>,
}

impl Server {
    /// The server identity.
    #[must_use]
    pub const fn identity(&self) -> &KeyPair {
        &self.identity
    }

    /// The server's tunnel addresses, one per family.
    #[must_use]
    pub fn addresses(&self) -> &[AssignedAddress] {
        &self.addresses
    }

    /// Linked clients, in link order.
    #[must_use]
    pub fn peers(&self) -> &[ServerPeer] {
        &self.peers
    }
}

/// One client party.
#[derive(Debug, Clone)]
pub struct Client {
    name: String,
    identity: KeyPair,
    addresses: Vec<AssignedAddress>,
    peer: Option<ClientPeer>,
}

impl Client {
    /// The client label, also its directory name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The client identity.
    #[must_use]
    pub const fn identity(&self) -> &KeyPair {
        &self.identity
    }

    /// The client's tunnel addresses, one per family.
    #[must_use]
    pub fn addresses(&self) -> &[AssignedAddress] {
        &self.addresses
    }

    /// The server entry, once the client is linked.
    #[must_use]
    pub const fn peer(&self) -> Option<&ClientPeer> {
        self.peer.as_ref()
    }
}

/// Registry of the server and all clients of one provisioning run.
#[derive(Debug)]
pub struct PeerRegistry {
    endpoint: Endpoint,
    client_allowed_ips: Vec<IpNet>,
    server: Option<Server>,
    clients: Vec<Client>,
    public_keys: HashSet<PublicKey>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    ///
    /// `endpoint` and `client_allowed_ips` are written into every client's
    /// server entry when it is linked.
    #[must_use]
    pub fn new(endpoint: Endpoint, client_allowed_ips: Vec<IpNet>) -> Self {
        Self {
            endpoint,
            client_allowed_ips,
            server: None,
            clients: Vec::new(),
            public_keys: HashSet::new(),
        }
    }

    /// Registers the server and returns it.
    ///
    /// # Errors
    ///
    /// Fails if a server is already registered or `addresses` is empty.
    pub fn register_server(
        &mut self,
        identity: KeyPair,
        addresses: Vec<AssignedAddress>,
    ) -> Result<&Server, RegistryError> {
        if self.server.is_some() {
            return Err(RegistryError::ServerAlreadyRegistered);
        }
        if addresses.is_empty() {
            return Err(RegistryError::NoAddresses {
                party: "server".to_string(),
            });
        }

        info!(public_key = %identity.public_key(), "registered server");
        self.public_keys.insert(*identity.public_key());
        Ok(&*self.server.insert(Server {
            identity,
            addresses,
            peers: Vec::new(),
        }))
    }

    /// Registers a client.
    ///
    /// # Errors
    ///
    /// Fails if the server is not registered yet, the name is unusable or
    /// taken, the key is already in use, or `addresses` is empty.
    pub fn register_client(
        &mut self,
        name: impl Into<String>,
        identity: KeyPair,
        addresses: Vec<AssignedAddress>,
    ) -> Result<ClientRef, RegistryError> {
        let name = name.into();
        if self.server.is_none() {
            return Err(RegistryError::ServerNotRegistered);
        }
        if !is_valid_client_name(&name) {
            return Err(RegistryError::InvalidClientName { name });
        }
        if self.clients.iter().any(|client| client.name == name) {
            return Err(RegistryError::DuplicateClientName { name });
        }
        if self.public_keys.contains(identity.public_key()) {
            return Err(RegistryError::DuplicatePublicKey {
                public_key: *identity.public_key(),
            });
        }
        if addresses.is_empty() {
            return Err(RegistryError::NoAddresses { party: name });
        }

        debug!(peer = %name, public_key = %identity.public_key(), "registered client");
        self.public_keys.insert(*identity.public_key());
        self.clients.push(Client {
            name,
            identity,
            addresses,
            peer: None,
        });
        Ok(ClientRef(self.clients.len() - 1))
    }

    /// Links a client and the server to each other.
    ///
    /// The server gains a peer entry with the client's key and host
    /// addresses; the client gains the server's key, endpoint and the
    /// configured allowed-IPs policy.
    ///
    /// # Errors
    ///
    /// Fails for an unknown reference or a client that is already linked.
    pub fn link_client_to_server(&mut self, client_ref: ClientRef) -> Result<(), RegistryError> {
        let server = self
            .server
            .as_mut()
            .ok_or(RegistryError::ServerNotRegistered)?;
        let client = self
            .clients
            .get_mut(client_ref.0)
            .ok_or(RegistryError::UnknownClient(client_ref.0))?;
        if client.peer.is_some() {
            return Err(RegistryError::AlreadyLinked {
                name: client.name.clone(),
            });
        }

        server.peers.push(ServerPeer {
            public_key: *client.identity.public_key(),
            allowed_ips: client.addresses.iter().map(|a| a.host).collect(),
        });
        client.peer = Some(ClientPeer {
            public_key: *server.identity.public_key(),
            endpoint: self.endpoint.clone(),
            allowed_ips: self.client_allowed_ips.clone(),
        });

        debug!(peer = %client.name, "linked client to server");
        Ok(())
    }

    /// The server, once registered.
    #[must_use]
    pub const fn server(&self) -> Option<&Server> {
        self.server.as_ref()
    }

    /// The server, or [`RegistryError::ServerNotRegistered`].
    ///
    /// # Errors
    ///
    /// Fails when no server is registered.
    pub fn registered_server(&self) -> Result<&Server, RegistryError> {
        self.server.as_ref().ok_or(RegistryError::ServerNotRegistered)
    }

    /// Looks up a client.
    #[must_use]
    pub fn client(&self, client_ref: ClientRef) -> Option<&Client> {
        self.clients.get(client_ref.0)
    }

    /// Looks up a client together with the server it is linked to.
    ///
    /// # Errors
    ///
    /// Fails for an unknown reference or when no server is registered.
    pub fn client_with_server(
        &self,
        client_ref: ClientRef,
    ) -> Result<(&Client, &Server), RegistryError> {
        let client = self
            .client(client_ref)
            .ok_or(RegistryError::UnknownClient(client_ref.0))?;
        Ok((client, self.registered_server()?))
    }

    /// All clients in registration order.
    #[must_use]
    pub fn clients(&self) -> &[Client] {
        &self.clients
    }
}

fn is_valid_client_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
