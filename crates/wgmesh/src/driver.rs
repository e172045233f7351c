//! The provisioning driver.
//!
//! A run is in one of two states, decided by whether the server document
//! exists:
//!
//! - **Uninitialized**: the server and every requested client are created
//!   from scratch.
//! - **Provisioned**: nothing is written. The number of client directories
//!   is compared with the requested peer count and a mismatch is reported
//!   as [`PeerDrift`]. Missing peers are not added.
//!
//! A failure part-way through creation leaves whatever was already written
//! in place.

use std::path::PathBuf;

use ipnet::IpNet;
use serde::Serialize;
use tracing::{info, info_span, warn, Span};
use wgmesh_network::{join_networks, AddressAllocator, PeerRegistry};
use wgmesh_wireguard::{IdentityFactory, OsIdentityFactory, PublicKey};

use crate::error::ProvisionError;
use crate::interface::{discover_interface, InterfaceSource, SysfsInterfaces};
use crate::qr::{PngQrRenderer, QrRenderer};
use crate::settings::ProvisionSettings;
use crate::store::{ConfigStore, FsConfigStore};
use crate::synth::{ConfigSynthesizer, ServerRules};

/// Whether the configuration directory already holds a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    /// No server document exists.
    Uninitialized,
    /// A server document exists.
    Provisioned,
}

/// Mismatch between requested peers and existing client directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeerDrift {
    /// Peers requested by the settings.
    pub requested: usize,
    /// Client directories found on disk.
    pub existing: usize,
}

/// One client created by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedPeer {
    /// Client name.
    pub name: String,
    /// Client public key.
    pub public_key: PublicKey,
    /// Interface addresses with the pool prefix.
    pub addresses: Vec<IpNet>,
    /// The client document.
    pub config_path: PathBuf,
    /// The QR code image.
    pub image_path: PathBuf,
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// The server and all clients were created.
    Created {
        /// The server document.
        server_file: PathBuf,
        /// Server public key.
        server_public_key: PublicKey,
        /// Server interface addresses.
        server_addresses: Vec<IpNet>,
        /// Egress interface used in the NAT rules.
        egress_interface: String,
        /// Created clients, in order.
        peers: Vec<ProvisionedPeer>,
    },
    /// A server document already existed; nothing was written.
    AlreadyProvisioned {
        /// The server document.
        server_file: PathBuf,
        /// Client directories found.
        existing_client_dirs: usize,
        /// Peer sections in the server document, if it could be read.
        server_peers: Option<usize>,
        /// Set when the requested peer count differs from the directories found.
        drift: Option<PeerDrift>,
    },
}

/// Orchestrates allocation, identities, registry, synthesis and persistence.
pub struct ProvisioningDriver {
    settings: ProvisionSettings,
    store: Box<dyn ConfigStore>,
    identities: Box<dyn IdentityFactory>,
    renderer: Box<dyn QrRenderer>,
    interfaces: Box<dyn InterfaceSource>,
    span: Span,
}

impl std::fmt::Debug for ProvisioningDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningDriver")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ProvisioningDriver {
    /// Creates a driver that works on the filesystem, draws keys from the
    /// OS and reads interfaces from sysfs.
    #[must_use]
    pub fn new(settings: ProvisionSettings) -> Self {
        let store = FsConfigStore::new(settings.config_dir.clone(), settings.server_file.clone());
        let span = info_span!("provision", config_dir = %settings.config_dir.display());
        Self {
            settings,
            store: Box::new(store),
            identities: Box::new(OsIdentityFactory),
            renderer: Box::new(PngQrRenderer::new()),
            interfaces: Box::new(SysfsInterfaces::new()),
            span,
        }
    }

    /// Replaces the configuration store.
    #[must_use]
    pub fn with_store(mut self, store: impl ConfigStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Replaces the identity factory.
    #[must_use]
    pub fn with_identity_factory(mut self, identities: impl IdentityFactory + 'static) -> Self {
        self.identities = Box::new(identities);
        self
    }

    /// Replaces the QR renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: impl QrRenderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    /// Replaces the interface source.
    #[must_use]
    pub fn with_interface_source(mut self, interfaces: impl InterfaceSource + 'static) -> Self {
        self.interfaces = Box::new(interfaces);
        self
    }

    /// Replaces the span events of this driver are recorded in.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The settings in use.
    #[must_use]
    pub const fn settings(&self) -> &ProvisionSettings {
        &self.settings
    }

    /// Current state of the configuration directory.
    #[must_use]
    pub fn state(&self) -> ProvisioningState {
        if self.store.server_config_exists() {
            ProvisioningState::Provisioned
        } else {
            ProvisioningState::Uninitialized
        }
    }

    /// Runs provisioning once.
    ///
    /// # Errors
    ///
    /// Any failure aborts the run. Files written before the failure stay.
    pub fn run(&self) -> Result<ProvisionOutcome, ProvisionError> {
        let _entered = self.span.enter();
        self.settings.validate()?;

        match self.state() {
            ProvisioningState::Provisioned => self.inspect_existing(),
            ProvisioningState::Uninitialized => self.create(),
        }
    }

    fn create(&self) -> Result<ProvisionOutcome, ProvisionError> {
        let settings = &self.settings;
        let egress_interface = self.egress_interface()?;
        info!(interface = %egress_interface, "found egress interface");

        let mut allocator = AddressAllocator::new(settings.pools())?;
        let mut registry = PeerRegistry::new(settings.endpoint(), settings.allowed_ips.clone());
        let synth = ConfigSynthesizer::new(
            ServerRules {
                listen_port: settings.listen_port,
                egress_interface: egress_interface.clone(),
                ipv6_forwarding: settings.subnet_v6.is_some(),
                post_up_hook: settings.post_up_hook.clone(),
                post_down_hook: settings.post_down_hook.clone(),
            },
            settings.dns.clone(),
        );

        let server = registry.register_server(
            self.identities.generate(),
            allocator.server_addresses().to_vec(),
        )?;
        let server_public_key = *server.identity().public_key();
        let server_addresses: Vec<IpNet> = server.addresses().iter().map(|a| a.tunnel).collect();
        let server_file = self.store.write_server(&synth.build_server_interface(server)?)?;
        info!(
            address = %join_networks(&server_addresses),
            path = %server_file.display(),
            "created server interface"
        );

        let mut peers = Vec::new();
        for index in 0..settings.peers {
            let name = settings.client_name(index);
            let addresses = allocator.next_client()?;
            let client_ref =
                registry.register_client(name.as_str(), self.identities.generate(), addresses)?;
            registry.link_client_to_server(client_ref)?;

            let (client, server) = registry.client_with_server(client_ref)?;
            let document = synth.build_client_document(client, server)?;

            self.store.create_client_dir(&name)?;
            let image_path = self.store.client_image_path(&name);
            self.renderer
                .render(&document.lines().join("\n"), &image_path)
                .map_err(|source| ProvisionError::Qr {
                    peer: name.clone(),
                    source,
                })?;
            let config_path = self.store.write_client(&name, &document)?;

            let addresses: Vec<IpNet> = client.addresses().iter().map(|a| a.tunnel).collect();
            info!(peer = %name, address = %join_networks(&addresses), "created peer");
            peers.push(ProvisionedPeer {
                name,
                public_key: *client.identity().public_key(),
                addresses,
                config_path,
                image_path,
            });
        }

        let server = registry.registered_server()?;
        let server_file = self.store.write_server(&synth.build_server_document(server)?)?;
        info!(
            peers = peers.len(),
            path = %server_file.display(),
            "wrote server config"
        );

        Ok(ProvisionOutcome::Created {
            server_file,
            server_public_key,
            server_addresses,
            egress_interface,
            peers,
        })
    }

    fn inspect_existing(&self) -> Result<ProvisionOutcome, ProvisionError> {
        let server_file = self.settings.server_file.clone();
        let existing = self.store.client_dir_count()?;
        let requested = self.settings.peers;

        let server_peers = match self.store.load_server() {
            Ok(document) => Some(document.peer_count()),
            Err(e) => {
                warn!(
                    error = &e as &(dyn std::error::Error + 'static),
                    "could not read existing server config"
                );
                None
            }
        };

        let drift = (existing != requested).then_some(PeerDrift {
            requested,
            existing,
        });
        if drift.is_some() {
            warn!(
                requested,
                existing,
                "peer count differs from existing client directories; new peers are not provisioned"
            );
        } else {
            info!(
                path = %server_file.display(),
                peers = existing,
                "server config exists, nothing to do"
            );
        }

        Ok(ProvisionOutcome::AlreadyProvisioned {
            server_file,
            existing_client_dirs: existing,
            server_peers,
            drift,
        })
    }

    fn egress_interface(&self) -> Result<String, ProvisionError> {
        let found = self
            .interfaces
            .interface_names()
            .map_err(ProvisionError::InterfaceDiscovery)?;
        let known = &self.settings.egress_interfaces;
        discover_interface(found.as_slice(), known.as_slice()).ok_or_else(|| {
            ProvisionError::InterfaceNotFound {
                known: known.clone(),
                found,
            }
        })
    }
}
