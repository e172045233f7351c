//! WireGuard key material and configuration documents for wgmesh.
//!
//! This crate provides the Curve25519 identities handed to every party of
//! the mesh and the INI-style document model the provisioning engine fills
//! in and writes to disk.

pub mod document;
pub mod error;
mod keys;

pub use document::{Attribute, ConfigDocument, PeerSection};
pub use error::{Result, WireGuardError};
pub use keys::{IdentityFactory, KeyPair, OsIdentityFactory, PrivateKey, PublicKey, KEY_SIZE};
