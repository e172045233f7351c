//! WireGuard configuration documents.
//!
//! A [`ConfigDocument`] is the ordered list of directives that ends up in a
//! `wg-quick` style INI file: exactly one `[Interface]` section followed by
//! any number of `[Peer]` sections, each identified by the peer's public key.
//! Attribute order is preserved so that rendering is deterministic.

use std::fmt;

use crate::error::{Result, WireGuardError};
use crate::keys::PublicKey;

/// A single `Key = value` directive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    /// Directive name, e.g. `AllowedIPs`.
    pub key: String,
    /// Directive value, already formatted.
    pub value: String,
}

impl Attribute {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.key, self.value)
    }
}

/// A `[Peer]` section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSection {
    public_key: PublicKey,
    attributes: Vec<Attribute>,
}

impl PeerSection {
    /// The peer's public key.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Attributes other than `PublicKey`, in insertion order.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Returns the value of the first attribute named `key`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        find_value(&self.attributes, key)
    }
}

fn find_value<'a>(attributes: &'a [Attribute], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|attr| attr.key == key)
        .map(|attr| attr.value.as_str())
}

/// An ordered WireGuard configuration document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    interface: Vec<Attribute>,
    peers: Vec<PeerSection>,
}

impl ConfigDocument {
    /// Creates an empty document (an `[Interface]` section with no attributes).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a directive.
    ///
    /// With `peer == None` the directive goes to the `[Interface]` section,
    /// otherwise to the `[Peer]` section for that key.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::UnknownPeer`] if no section exists for `peer`.
    pub fn add_attr(
        &mut self,
        peer: Option<&PublicKey>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        let attribute = Attribute::new(key, value);
        match peer {
            None => self.interface.push(attribute),
            Some(public_key) => {
                let section = self
                    .peers
                    .iter_mut()
                    .find(|section| section.public_key == *public_key)
                    .ok_or_else(|| WireGuardError::UnknownPeer(public_key.to_base64()))?;
                section.attributes.push(attribute);
            }
        }
        Ok(())
    }

    /// Opens a new `[Peer]` section for `public_key`.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::DuplicatePeer`] if the key already has a section.
    pub fn add_peer(&mut self, public_key: PublicKey) -> Result<()> {
        if self.peer(&public_key).is_some() {
            return Err(WireGuardError::DuplicatePeer(public_key.to_base64()));
        }
        self.peers.push(PeerSection {
            public_key,
            attributes: Vec::new(),
        });
        Ok(())
    }

    /// Interface attributes in insertion order.
    #[must_use]
    pub fn interface(&self) -> &[Attribute] {
        &self.interface
    }

    /// Returns the value of the first interface attribute named `key`.
    #[must_use]
    pub fn interface_value(&self, key: &str) -> Option<&str> {
        find_value(&self.interface, key)
    }

    /// All peer sections in insertion order.
    #[must_use]
    pub fn peers(&self) -> &[PeerSection] {
        &self.peers
    }

    /// Looks up the peer section for `public_key`.
    #[must_use]
    pub fn peer(&self, public_key: &PublicKey) -> Option<&PeerSection> {
        self.peers
            .iter()
            .find(|section| section.public_key == *public_key)
    }

    /// Number of peer sections.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// The document as individual text lines (no trailing newlines).
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(1 + self.interface.len() + self.peers.len() * 4);
        lines.push("[Interface]".to_string());
        lines.extend(self.interface.iter().map(ToString::to_string));

        for peer in &self.peers {
            lines.push(String::new());
            lines.push("[Peer]".to_string());
            lines.push(format!("PublicKey = {}", peer.public_key.to_base64()));
            lines.extend(peer.attributes.iter().map(ToString::to_string));
        }

        lines
    }

    /// Renders the document as configuration file text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut output = self.lines().join("\n");
        output.push('\n');
        output
    }

    /// Parses configuration file text.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::ParseError`] for directives outside a
    /// section, unknown sections, malformed lines, and peer sections without
    /// a valid `PublicKey`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut document = Self::new();
        let mut section = Section::None;
        let mut seen_interface = false;

        for (index, raw) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                if let Section::Peer(peer) = std::mem::replace(&mut section, Section::None) {
                    peer.finish(&mut document)?;
                }

                section = match &line[1..line.len() - 1] {
                    "Interface" if seen_interface => {
                        return Err(parse_error(line_number, "duplicate [Interface] section"));
                    }
                    "Interface" => {
                        seen_interface = true;
                        Section::Interface
                    }
                    "Peer" => Section::Peer(PendingPeer::new(line_number)),
                    other => {
                        return Err(parse_error(line_number, format!("unknown section: {other}")));
                    }
                };
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(parse_error(line_number, format!("invalid line format: {line}")));
            };
            let (key, value) = (key.trim(), value.trim());

            match &mut section {
                Section::None => {
                    return Err(parse_error(line_number, "key-value pair outside of section"));
                }
                Section::Interface => document.interface.push(Attribute::new(key, value)),
                Section::Peer(peer) => peer.push(key, value, line_number)?,
            }
        }

        if let Section::Peer(peer) = section {
            peer.finish(&mut document)?;
        }

        Ok(document)
    }
}

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Parser state for configuration files.
enum Section {
    None,
    Interface,
    Peer(PendingPeer),
}

/// Peer section being collected during parsing.
struct PendingPeer {
    header_line: usize,
    public_key: Option<PublicKey>,
    attributes: Vec<Attribute>,
}

impl PendingPeer {
    fn new(header_line: usize) -> Self {
        Self {
            header_line,
            public_key: None,
            attributes: Vec::new(),
        }
    }

    fn push(&mut self, key: &str, value: &str, line_number: usize) -> Result<()> {
        if key == "PublicKey" {
            let public_key = PublicKey::from_base64(value)
                .map_err(|e| parse_error(line_number, format!("invalid PublicKey: {e}")))?;
            self.public_key = Some(public_key);
        } else {
            self.attributes.push(Attribute::new(key, value));
        }
        Ok(())
    }

    fn finish(self, document: &mut ConfigDocument) -> Result<()> {
        let public_key = self
            .public_key
            .ok_or_else(|| parse_error(self.header_line, "missing PublicKey in [Peer] section"))?;
        document
            .add_peer(public_key)
            .map_err(|e| parse_error(self.header_line, e.to_string()))?;
        for attribute in self.attributes {
            document.add_attr(Some(&public_key), attribute.key, attribute.value)?;
        }
        Ok(())
    }
}

fn parse_error(line: usize, message: impl Into<String>) -> WireGuardError {
    WireGuardError::ParseError {
        line,
        message: message.into(),
    }
}
