//! Curve25519 identities.
//!
//! Every party of the mesh owns one [`KeyPair`]. Keys are 32 bytes and are
//! written into configuration documents as standard base64, 44 characters
//! with padding.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand_core::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as DalekPublic, StaticSecret};

use crate::error::WireGuardError;

/// Length of a private or public key in bytes.
pub const KEY_SIZE: usize = 32;

type KeyBytes = [u8; KEY_SIZE];

fn decode(text: &str) -> Result<KeyBytes, WireGuardError> {
    let raw = STANDARD
        .decode(text.trim())
        .map_err(|e| WireGuardError::InvalidBase64(e.to_string()))?;
    KeyBytes::try_from(raw.as_slice()).map_err(|_| WireGuardError::InvalidKeyLength(raw.len()))
}

/// Public half of an identity. Shared with every peer of its owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(KeyBytes);

impl PublicKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes_array(bytes: KeyBytes) -> Self {
        Self(bytes)
    }

    /// The key as it appears in a `PublicKey = ...` line.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parses the base64 form; surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Fails on malformed base64 or a decoded length other than
    /// [`KEY_SIZE`].
    pub fn from_base64(text: &str) -> Result<Self, WireGuardError> {
        decode(text).map(Self)
    }
}

impl FromStr for PublicKey {
    type Err = WireGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PublicKey {
    // Eight characters are plenty to tell peers apart in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.to_base64();
        write!(f, "PublicKey({}..)", encoded.get(..8).unwrap_or(encoded.as_str()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Secret half of an identity. Only ever written into its owner's document.
///
/// Comparison runs in constant time and `Debug` never shows the bytes.
#[derive(Clone)]
pub struct PrivateKey(KeyBytes);

impl PrivateKey {
    /// Draws a fresh secret from the operating system's CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng).to_bytes())
    }

    /// Wraps raw key bytes. Clamping happens when the public key is derived.
    #[must_use]
    pub const fn from_bytes_array(bytes: KeyBytes) -> Self {
        Self(bytes)
    }

    /// Derives the matching public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(DalekPublic::from(&secret).to_bytes())
    }

    /// The key as it appears in a `PrivateKey = ...` line.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parses the base64 form; surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Fails on malformed base64 or a decoded length other than
    /// [`KEY_SIZE`].
    pub fn from_base64(text: &str) -> Result<Self, WireGuardError> {
        decode(text).map(Self)
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for PrivateKey {}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// The identity of one party: a private key and the public key derived
/// from it. Immutable once minted.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Builds the identity owning `private`.
    #[must_use]
    pub fn from_private_key(private: PrivateKey) -> Self {
        Self {
            public: private.public_key(),
            private,
        }
    }

    /// The secret half.
    #[must_use]
    pub const fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    /// The shareable half.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Source of fresh identities.
///
/// Called once per party; an identity is never regenerated.
pub trait IdentityFactory {
    /// Mints a new identity.
    fn generate(&self) -> KeyPair;
}

/// [`IdentityFactory`] drawing from the operating system's CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsIdentityFactory;

impl IdentityFactory for OsIdentityFactory {
    fn generate(&self) -> KeyPair {
        KeyPair::from_private_key(PrivateKey::generate())
    }
}
