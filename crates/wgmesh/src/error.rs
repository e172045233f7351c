//! Provisioning errors.
//!
//! Every variant names the step that failed, so a single line is enough for
//! the operator.

use thiserror::Error;
use wgmesh_network::{AllocationError, RegistryError};

use crate::qr::QrError;
use crate::settings::SettingsError;
use crate::store::StoreError;
use crate::synth::SynthError;

/// Errors that abort a provisioning run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Settings are unusable.
    #[error("invalid settings")]
    Settings(#[from] SettingsError),

    /// Address allocation failed, typically pool exhaustion.
    #[error("address allocation failed")]
    Allocation(#[from] AllocationError),

    /// A party could not be registered or linked.
    #[error("peer registration failed")]
    Registry(#[from] RegistryError),

    /// A document could not be built.
    #[error("config synthesis failed")]
    Synth(#[from] SynthError),

    /// Reading or writing the configuration directory failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A client's QR code could not be rendered.
    #[error("failed to render QR code for {peer}")]
    Qr {
        /// The client name.
        peer: String,
        /// The renderer error.
        #[source]
        source: QrError,
    },

    /// None of the known egress interfaces exists on this host.
    #[error("no egress interface found: none of [{}] among host interfaces [{}]", .known.join(", "), .found.join(", "))]
    InterfaceNotFound {
        /// The names that were tried, in priority order.
        known: Vec<String>,
        /// The host's interfaces.
        found: Vec<String>,
    },

    /// Host interfaces could not be listed.
    #[error("failed to list host network interfaces")]
    InterfaceDiscovery(#[source] std::io::Error),
}

impl ProvisionError {
    /// Whether the error is a filesystem conflict with existing client
    /// state.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::AlreadyExists { .. }))
    }
}
