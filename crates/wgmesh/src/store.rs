//! On-disk configuration store.
//!
//! Layout under the configuration directory:
//!
//! ```text
//! <config-dir>/wg0.conf              server document
//! <config-dir>/<name>/<name>.conf    client document
//! <config-dir>/<name>/<name>.png     client QR code
//! ```
//!
//! Documents carry private keys, so files are created owner-readable only.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use wgmesh_wireguard::{ConfigDocument, WireGuardError};

/// Errors from the configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The target already exists; nothing is merged or overwritten.
    #[error("{path} already exists")]
    AlreadyExists {
        /// The conflicting path.
        path: PathBuf,
    },
    /// A filesystem operation failed.
    #[error("failed to {action} {path}")]
    Io {
        /// What was being done.
        action: &'static str,
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
    /// An existing document could not be parsed.
    #[error("failed to parse {path}")]
    Parse {
        /// The document path.
        path: PathBuf,
        /// The parse error.
        #[source]
        source: WireGuardError,
    },
}

impl StoreError {
    fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persistence for server and client documents.
pub trait ConfigStore {
    /// Whether a server document exists.
    fn server_config_exists(&self) -> bool;

    /// Reads and parses the server document.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    fn load_server(&self) -> Result<ConfigDocument, StoreError>;

    /// Writes the server document, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    fn write_server(&self, document: &ConfigDocument) -> Result<PathBuf, StoreError>;

    /// Creates the directory of a new client.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the directory exists.
    fn create_client_dir(&self, name: &str) -> Result<PathBuf, StoreError>;

    /// Writes a new client document into its directory.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the file exists.
    fn write_client(&self, name: &str, document: &ConfigDocument) -> Result<PathBuf, StoreError>;

    /// Where a client's QR code image goes.
    fn client_image_path(&self, name: &str) -> PathBuf;

    /// Number of client directories present. A directory holding the
    /// server document is not a client directory.
    ///
    /// # Errors
    ///
    /// Fails if the configuration directory exists but cannot be listed.
    fn client_dir_count(&self) -> Result<usize, StoreError>;
}

/// [`ConfigStore`] backed by a directory tree.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    config_dir: PathBuf,
    server_file: PathBuf,
}

impl FsConfigStore {
    /// Creates a store rooted at `config_dir` with the server document at
    /// `server_file`.
    #[must_use]
    pub fn new(config_dir: impl Into<PathBuf>, server_file: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            server_file: server_file.into(),
        }
    }

    /// The configuration directory.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// The server document path.
    #[must_use]
    pub fn server_file(&self) -> &Path {
        &self.server_file
    }

    /// A client's directory.
    #[must_use]
    pub fn client_dir(&self, name: &str) -> PathBuf {
        self.config_dir.join(name)
    }

    /// A client's document path.
    #[must_use]
    pub fn client_config_path(&self, name: &str) -> PathBuf {
        self.client_dir(name).join(format!("{name}.conf"))
    }
}

impl ConfigStore for FsConfigStore {
    fn server_config_exists(&self) -> bool {
        self.server_file.is_file()
    }

    fn load_server(&self) -> Result<ConfigDocument, StoreError> {
        let path = &self.server_file;
        let text = fs::read_to_string(path).map_err(StoreError::io("read server config", path))?;
        ConfigDocument::parse(&text).map_err(|source| StoreError::Parse {
            path: path.clone(),
            source,
        })
    }

    fn write_server(&self, document: &ConfigDocument) -> Result<PathBuf, StoreError> {
        let path = &self.server_file;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(StoreError::io("create directory", parent))?;
        }
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        write_document(&options, path, document)
            .map_err(StoreError::io("write server config", path))?;
        debug!(path = %path.display(), "wrote server config");
        Ok(path.clone())
    }

    fn create_client_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.config_dir)
            .map_err(StoreError::io("create directory", &self.config_dir))?;
        let path = self.client_dir(name);
        match fs::create_dir(&path) {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists { path })
            }
            Err(source) => Err(StoreError::Io {
                action: "create client directory",
                path,
                source,
            }),
        }
    }

    fn write_client(&self, name: &str, document: &ConfigDocument) -> Result<PathBuf, StoreError> {
        let path = self.client_config_path(name);
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        match write_document(&options, &path, document) {
            Ok(()) => {
                debug!(peer = name, path = %path.display(), "wrote client config");
                Ok(path)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists { path })
            }
            Err(source) => Err(StoreError::Io {
                action: "write client config",
                path,
                source,
            }),
        }
    }

    fn client_image_path(&self, name: &str) -> PathBuf {
        self.client_dir(name).join(format!("{name}.png"))
    }

    fn client_dir_count(&self) -> Result<usize, StoreError> {
        let dir = &self.config_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(StoreError::Io {
                    action: "list config directory",
                    path: dir.clone(),
                    source,
                })
            }
        };

        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(StoreError::io("list config directory", dir))?;
            let file_type = entry
                .file_type()
                .map_err(StoreError::io("inspect", &entry.path()))?;
            if file_type.is_dir() && !self.server_file.starts_with(entry.path()) {
                count += 1;
            }
        }
        Ok(count)
    }
}

fn write_document(options: &OpenOptions, path: &Path, document: &ConfigDocument) -> io::Result<()> {
    let mut options = options.clone();
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(document.render().as_bytes())?;
    file.sync_all()
}
