//! Output formatting for the run summary.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::{self, Write};

use serde::Serialize;
use thiserror::Error;
use wgmesh_network::join_networks;

use crate::cli::Format;
use crate::driver::ProvisionOutcome;

/// Errors while writing output.
#[derive(Debug, Error)]
pub enum OutputError {
    /// JSON serialization failed.
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    /// Writing failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), OutputError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)?;
                writeln!(writer)?;
            }
            Format::Table => value.write_table(writer)?,
        }
        Ok(())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> io::Result<()>;
}

impl TableDisplay for ProvisionOutcome {
    fn write_table<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Self::Created {
                server_file,
                server_public_key,
                server_addresses,
                egress_interface,
                peers,
            } => {
                writeln!(writer, "WireGuard Server")?;
                writeln!(writer, "══════════════════════════════════")?;
                writeln!(writer, "Config:           {}", server_file.display())?;
                writeln!(writer, "Address:          {}", join_networks(server_addresses))?;
                writeln!(writer, "Public Key:       {server_public_key}")?;
                writeln!(writer, "Egress Interface: {egress_interface}")?;
                writeln!(writer)?;

                if peers.is_empty() {
                    writeln!(writer, "No peers created")?;
                    return Ok(());
                }
                writeln!(writer, "{:<16}  {:<44}  {}", "PEER", "PUBLIC KEY", "ADDRESS")?;
                writeln!(writer, "{}", "─".repeat(96))?;
                for peer in peers {
                    writeln!(
                        writer,
                        "{:<16}  {:<44}  {}",
                        peer.name,
                        peer.public_key,
                        join_networks(&peer.addresses)
                    )?;
                }
                writeln!(writer)?;
                writeln!(writer, "Total: {} peer(s)", peers.len())?;
            }
            Self::AlreadyProvisioned {
                server_file,
                existing_client_dirs,
                server_peers,
                drift,
            } => {
                writeln!(writer, "Already provisioned: {}", server_file.display())?;
                writeln!(writer, "  Client directories: {existing_client_dirs}")?;
                match server_peers {
                    Some(count) => writeln!(writer, "  Server peers:       {count}")?,
                    None => writeln!(writer, "  Server peers:       unreadable")?,
                }
                if let Some(drift) = drift {
                    writeln!(
                        writer,
                        "  {} peer(s) requested but {} exist; new peers are not provisioned",
                        drift.requested, drift.existing
                    )?;
                }
            }
        }
        Ok(())
    }
}
