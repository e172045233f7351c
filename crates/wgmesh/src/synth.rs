//! Configuration synthesis.
//!
//! Turns registry parties into [`ConfigDocument`]s. The server and client
//! views of the same link differ: the server routes a client's single-host
//! address (`/32`, `/128`), while the client puts the pool-prefixed address
//! on its own interface.

use std::net::IpAddr;

use thiserror::Error;
use tracing::debug;
use wgmesh_network::{join_networks, AssignedAddress, Client, Server};
use wgmesh_wireguard::{ConfigDocument, PublicKey, WireGuardError};

/// Errors raised while building documents.
///
/// These indicate a party handed over in an inconsistent state, never bad
/// user input.
#[derive(Debug, Error)]
pub enum SynthError {
    /// The client has not been linked to the server.
    #[error("client {name} is not linked to the server")]
    Unlinked {
        /// The client name.
        name: String,
    },
    /// A peer section would reference the document owner's own key.
    #[error("{name} cannot be its own peer")]
    SelfPeer {
        /// The party name.
        name: String,
    },
    /// The client's server entry names a different server.
    #[error("client {name} is linked to a different server")]
    PeerMismatch {
        /// The client name.
        name: String,
    },
    /// A party has no addresses to put on its interface.
    #[error("{name} has no assigned address")]
    NoAddresses {
        /// The party name.
        name: String,
    },
    /// The document model rejected a directive.
    #[error(transparent)]
    Document(#[from] WireGuardError),
}

/// Server-side routing rules run when the interface comes up or goes down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRules {
    /// UDP port the server listens on.
    pub listen_port: u16,
    /// Host interface NAT traffic leaves through.
    pub egress_interface: String,
    /// Also emit ip6tables rules.
    pub ipv6_forwarding: bool,
    /// Operator command appended to `PostUp`.
    pub post_up_hook: Option<String>,
    /// Operator command appended to `PostDown`.
    pub post_down_hook: Option<String>,
}

impl ServerRules {
    /// The `PostUp` command line.
    #[must_use]
    pub fn post_up(&self) -> String {
        self.commands('A', self.post_up_hook.as_deref())
    }

    /// The `PostDown` command line.
    #[must_use]
    pub fn post_down(&self) -> String {
        self.commands('D', self.post_down_hook.as_deref())
    }

    // `action` is the iptables chain operation: A(ppend) or D(elete).
    fn commands(&self, action: char, hook: Option<&str>) -> String {
        let mut tools = vec!["iptables"];
        if self.ipv6_forwarding {
            tools.push("ip6tables");
        }

        let mut commands = Vec::new();
        for tool in tools {
            commands.push(format!("{tool} -{action} FORWARD -i %i -j ACCEPT"));
            commands.push(format!("{tool} -{action} FORWARD -o %i -j ACCEPT"));
            commands.push(format!(
                "{tool} -t nat -{action} POSTROUTING -o {} -j MASQUERADE",
                self.egress_interface
            ));
        }
        commands.extend(hook.map(str::to_string));
        commands.join("; ")
    }
}

/// Builds server and client documents.
#[derive(Debug, Clone)]
pub struct ConfigSynthesizer {
    rules: ServerRules,
    dns: Vec<IpAddr>,
}

impl ConfigSynthesizer {
    /// Creates a synthesizer.
    #[must_use]
    pub fn new(rules: ServerRules, dns: Vec<IpAddr>) -> Self {
        Self { rules, dns }
    }

    /// The server rules in use.
    #[must_use]
    pub const fn rules(&self) -> &ServerRules {
        &self.rules
    }

    /// Builds the server's Interface section with no peers.
    ///
    /// # Errors
    ///
    /// Fails if the server has no addresses.
    pub fn build_server_interface(&self, server: &Server) -> Result<ConfigDocument, SynthError> {
        let address = tunnel_addresses(server.addresses(), "server")?;

        let mut doc = ConfigDocument::new();
        doc.add_attr(None, "Address", address)?;
        doc.add_attr(None, "SaveConfig", "true")?;
        doc.add_attr(None, "ListenPort", self.rules.listen_port.to_string())?;
        doc.add_attr(None, "PostUp", self.rules.post_up())?;
        doc.add_attr(None, "PostDown", self.rules.post_down())?;
        doc.add_attr(None, "PrivateKey", server.identity().private_key().to_base64())?;
        Ok(doc)
    }

    /// Builds the full server document: the Interface section plus one Peer
    /// section per linked client.
    ///
    /// # Errors
    ///
    /// Fails if the server has no addresses or a client entry repeats a key
    /// or carries the server's own key.
    pub fn build_server_document(&self, server: &Server) -> Result<ConfigDocument, SynthError> {
        let mut doc = self.build_server_interface(server)?;
        let own_key = server.identity().public_key();

        for peer in server.peers() {
            ensure_foreign_peer(own_key, &peer.public_key, "server")?;
            doc.add_peer(peer.public_key)?;
            doc.add_attr(Some(&peer.public_key), "AllowedIPs", join_networks(&peer.allowed_ips))?;
        }

        debug!(peers = doc.peer_count(), "built server document");
        Ok(doc)
    }

    /// Builds a client's document. Its single Peer section is the server.
    ///
    /// # Errors
    ///
    /// Fails if the client is unlinked, linked to another server, has no
    /// addresses, or shares the server's key.
    pub fn build_client_document(
        &self,
        client: &Client,
        server: &Server,
    ) -> Result<ConfigDocument, SynthError> {
        let name = client.name();
        let peer = client.peer().ok_or_else(|| SynthError::Unlinked {
            name: name.to_string(),
        })?;
        if &peer.public_key != server.identity().public_key() {
            return Err(SynthError::PeerMismatch {
                name: name.to_string(),
            });
        }
        ensure_foreign_peer(client.identity().public_key(), &peer.public_key, name)?;

        let mut doc = ConfigDocument::new();
        doc.add_attr(None, "Address", tunnel_addresses(client.addresses(), name)?)?;
        doc.add_attr(None, "PrivateKey", client.identity().private_key().to_base64())?;
        doc.add_attr(None, "DNS", join_display(&self.dns))?;

        doc.add_peer(peer.public_key)?;
        doc.add_attr(Some(&peer.public_key), "Endpoint", peer.endpoint.to_string())?;
        doc.add_attr(Some(&peer.public_key), "AllowedIPs", join_networks(&peer.allowed_ips))?;
        Ok(doc)
    }
}

// A document never lists its owner as a peer.
fn ensure_foreign_peer(
    owner: &PublicKey,
    peer: &PublicKey,
    name: &str,
) -> Result<(), SynthError> {
    if owner == peer {
        return Err(SynthError::SelfPeer {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn tunnel_addresses(addresses: &[AssignedAddress], name: &str) -> Result<String, SynthError> {
    if addresses.is_empty() {
        return Err(SynthError::NoAddresses {
            name: name.to_string(),
        });
    }
    Ok(join_networks(addresses.iter().map(|a| &a.tunnel)))
}

fn join_display<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgmesh_network::{AddressAllocator, ClientRef, Endpoint, PeerRegistry};
    use wgmesh_wireguard::{KeyPair, PrivateKey, KEY_SIZE};

    fn identity(byte: u8) -> KeyPair {
        KeyPair::from_private_key(PrivateKey::from_bytes_array([byte; KEY_SIZE]))
    }

    fn rules(ipv6: bool) -> ServerRules {
        ServerRules {
            listen_port: 51820,
            egress_interface: "eth0".to_string(),
            ipv6_forwarding: ipv6,
            post_up_hook: None,
            post_down_hook: None,
        }
    }

    fn synthesizer(ipv6: bool) -> ConfigSynthesizer {
        ConfigSynthesizer::new(
            rules(ipv6),
            vec!["1.1.1.1".parse().expect("ip"), "2606:4700:4700::1111".parse().expect("ip")],
        )
    }

    /// Registry with a server and `peers` linked clients drawn from `pools`.
    fn provisioned(pools: &[&str], peers: u8) -> (PeerRegistry, Vec<ClientRef>) {
        let mut allocator = AddressAllocator::new(pools.iter().map(|p| p.parse().expect("cidr")))
            .expect("allocator");
        let mut registry = PeerRegistry::new(
            Endpoint::new("vpn.example.com", 51820),
            vec!["0.0.0.0/0".parse().expect("cidr"), "::/0".parse().expect("cidr")],
        );
        registry
            .register_server(identity(1), allocator.server_addresses().to_vec())
            .expect("server");
        let mut refs = Vec::new();
        for i in 0..peers {
            let addresses = allocator.next_client().expect("addresses");
            let client_ref = registry
                .register_client(format!("peer_{i}"), identity(i + 2), addresses)
                .expect("client");
            registry.link_client_to_server(client_ref).expect("link");
            refs.push(client_ref);
        }
        (registry, refs)
    }

    // ==================== Server rules ====================

    #[test]
    fn ipv4_rules_use_egress_interface() {
        assert_eq!(
            rules(false).post_up(),
            "iptables -A FORWARD -i %i -j ACCEPT; iptables -A FORWARD -o %i -j ACCEPT; \
             iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE"
        );
        assert_eq!(
            rules(false).post_down(),
            "iptables -D FORWARD -i %i -j ACCEPT; iptables -D FORWARD -o %i -j ACCEPT; \
             iptables -t nat -D POSTROUTING -o eth0 -j MASQUERADE"
        );
    }

    #[test]
    fn ipv6_rules_only_when_forwarding() {
        assert!(!rules(false).post_up().contains("ip6tables"));
        let up = rules(true).post_up();
        assert!(up.contains("ip6tables -t nat -A POSTROUTING -o eth0 -j MASQUERADE"));
        assert_eq!(up.matches("; ").count(), 5);
    }

    #[test]
    fn hooks_are_appended() {
        let mut rules = rules(false);
        rules.post_up_hook = Some("/usr/local/bin/notify up".to_string());
        assert!(rules.post_up().ends_with("; /usr/local/bin/notify up"));
        assert!(!rules.post_down().contains("notify"));
    }

    // ==================== Server document ====================

    #[test]
    fn server_interface_attribute_order() {
        let (registry, _) = provisioned(&["10.13.13.0/24"], 0);
        let server = registry.server().expect("server");
        let doc = synthesizer(false).build_server_interface(server).expect("doc");

        let keys: Vec<&str> = doc.interface().iter().map(|a| a.key.as_str()).collect();
        assert_eq!(
            keys,
            ["Address", "SaveConfig", "ListenPort", "PostUp", "PostDown", "PrivateKey"]
        );
        assert_eq!(doc.interface_value("Address"), Some("10.13.13.1/24"));
        assert_eq!(doc.interface_value("SaveConfig"), Some("true"));
        assert_eq!(doc.interface_value("ListenPort"), Some("51820"));
        assert_eq!(
            doc.interface_value("PrivateKey").map(str::to_string),
            Some(identity(1).private_key().to_base64())
        );
        assert_eq!(doc.lines().len(), 7);
    }

    #[test]
    fn server_routes_single_host_per_client() {
        let (registry, refs) = provisioned(&["10.13.13.0/24"], 2);
        let server = registry.server().expect("server");
        let doc = synthesizer(false).build_server_document(server).expect("doc");

        assert_eq!(doc.peer_count(), 2);
        for (client_ref, expected) in refs.iter().zip(["10.13.13.2/32", "10.13.13.3/32"]) {
            let client = registry.client(*client_ref).expect("client");
            let section = doc.peer(client.identity().public_key()).expect("peer section");
            assert_eq!(section.value("AllowedIPs"), Some(expected));
        }
    }

    #[test]
    fn dual_stack_server_record() {
        let (registry, refs) = provisioned(&["10.13.13.0/24", "fc00::/64"], 1);
        let server = registry.server().expect("server");
        let doc = synthesizer(true).build_server_document(server).expect("doc");
        let client = registry.client(refs[0]).expect("client");

        assert_eq!(doc.interface_value("Address"), Some("10.13.13.1/24,fc00::1/64"));
        let section = doc.peer(client.identity().public_key()).expect("peer section");
        assert_eq!(section.value("AllowedIPs"), Some("10.13.13.2/32,fc00::2/128"));
    }

    // ==================== Client document ====================

    #[test]
    fn client_document_points_at_server() {
        let (registry, refs) = provisioned(&["10.13.13.0/24"], 2);
        let (client, server) = registry.client_with_server(refs[1]).expect("lookup");
        let doc = synthesizer(false).build_client_document(client, server).expect("doc");

        let keys: Vec<&str> = doc.interface().iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, ["Address", "PrivateKey", "DNS"]);
        assert_eq!(doc.interface_value("Address"), Some("10.13.13.3/24"));
        assert_eq!(doc.interface_value("DNS"), Some("1.1.1.1,2606:4700:4700::1111"));

        assert_eq!(doc.peer_count(), 1);
        let section = doc.peer(server.identity().public_key()).expect("server section");
        assert_eq!(section.value("Endpoint"), Some("vpn.example.com:51820"));
        assert_eq!(section.value("AllowedIPs"), Some("0.0.0.0/0,::/0"));
    }

    #[test]
    fn dual_stack_client_address() {
        let (registry, refs) = provisioned(&["10.13.13.0/24", "fc00::/64"], 1);
        let (client, server) = registry.client_with_server(refs[0]).expect("lookup");
        let doc = synthesizer(true).build_client_document(client, server).expect("doc");
        assert_eq!(doc.interface_value("Address"), Some("10.13.13.2/24,fc00::2/64"));
    }

    #[test]
    fn unlinked_client_is_rejected() {
        let (mut registry, _) = provisioned(&["10.13.13.0/24"], 0);
        let client_ref = registry
            .register_client(
                "peer_0",
                identity(2),
                vec![AssignedAddress {
                    tunnel: "10.13.13.2/24".parse().expect("cidr"),
                    host: "10.13.13.2/32".parse().expect("cidr"),
                }],
            )
            .expect("client");
        let (client, server) = registry.client_with_server(client_ref).expect("lookup");
        assert!(matches!(
            synthesizer(false).build_client_document(client, server),
            Err(SynthError::Unlinked { .. })
        ));
    }

    #[test]
    fn client_of_another_server_is_rejected() {
        let (registry, refs) = provisioned(&["10.13.13.0/24"], 1);
        let client = registry.client(refs[0]).expect("client");
        let addresses = registry.server().expect("server").addresses().to_vec();

        let mut stranger = PeerRegistry::new(Endpoint::new("other.example.com", 51820), Vec::new());
        let server = stranger.register_server(identity(99), addresses).expect("server");
        assert!(matches!(
            synthesizer(false).build_client_document(client, server),
            Err(SynthError::PeerMismatch { .. })
        ));
    }

    #[test]
    fn owner_key_is_never_a_peer() {
        let (registry, _) = provisioned(&["10.13.13.0/24"], 0);
        let own_key = registry.server().expect("server").identity().public_key();

        let err = ensure_foreign_peer(own_key, own_key, "server").expect_err("self peer");
        assert_eq!(err.to_string(), "server cannot be its own peer");
        assert!(ensure_foreign_peer(own_key, identity(2).public_key(), "server").is_ok());
    }
}
