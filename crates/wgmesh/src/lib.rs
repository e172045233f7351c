//! # wgmesh
//!
//! Provisions a WireGuard server and a fixed number of client
//! configurations in a star topology.
//!
//! ```text
//!             ┌──────────┐
//!   peer_0 ──►│          │
//!   peer_1 ──►│  server  │──► egress interface (NAT)
//!   peer_N ──►│          │
//!             └──────────┘
//! ```
//!
//! The [`ProvisioningDriver`] allocates tunnel addresses, mints identities,
//! records the links in a [`wgmesh_network::PeerRegistry`], and writes the
//! server document, one directory per client holding its document, and a
//! QR code of that document.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod driver;
pub mod error;
pub mod interface;
pub mod output;
pub mod qr;
pub mod settings;
pub mod store;
pub mod synth;

pub use cli::{Cli, Format, LogFormat};
pub use driver::{
    PeerDrift, ProvisionOutcome, ProvisionedPeer, ProvisioningDriver, ProvisioningState,
};
pub use error::ProvisionError;
pub use interface::{discover_interface, InterfaceSource, StaticInterfaces, SysfsInterfaces};
pub use output::{OutputFormat, TableDisplay};
pub use qr::{PngQrRenderer, QrError, QrRenderer};
pub use settings::{ProvisionSettings, SettingsError};
pub use store::{ConfigStore, FsConfigStore, StoreError};
pub use synth::{ConfigSynthesizer, ServerRules, SynthError};
