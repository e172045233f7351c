//! Egress interface discovery.
//!
//! The server's `PostUp`/`PostDown` NAT rules need the name of the host
//! interface that carries traffic to the internet. It is picked from a
//! prioritized list of well-known names.

use std::io;
use std::path::PathBuf;

/// Where host interface names come from.
pub trait InterfaceSource {
    /// Lists the names of the host's network interfaces.
    fn interface_names(&self) -> io::Result<Vec<String>>;
}

/// Reads interface names from `/sys/class/net`.
#[derive(Debug, Clone)]
pub struct SysfsInterfaces {
    root: PathBuf,
}

impl SysfsInterfaces {
    /// Uses `/sys/class/net`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root("/sys/class/net")
    }

    /// Uses another directory laid out like `/sys/class/net`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsInterfaces {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceSource for SysfsInterfaces {
    fn interface_names(&self) -> io::Result<Vec<String>> {
        let mut names = std::fs::read_dir(&self.root)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }
}

/// A fixed list of interface names.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(Vec<String>);

impl StaticInterfaces {
    /// Creates a source that always reports `names`.
    #[must_use]
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self(names.into_iter().map(Into::into).collect())
    }
}

impl InterfaceSource for StaticInterfaces {
    fn interface_names(&self) -> io::Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Returns the first of `known` (in priority order) present in `host`.
#[must_use]
pub fn discover_interface<H, K>(host: &[H], known: &[K]) -> Option<String>
where
    H: AsRef<str>,
    K: AsRef<str>,
{
    known
        .iter()
        .map(AsRef::as_ref)
        .find(|candidate| host.iter().any(|name| name.as_ref() == *candidate))
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const KNOWN: &[&str] = &["eth0", "ens3"];

    #[test_case(&["lo", "eth0"], Some("eth0") ; "wired ethernet")]
    #[test_case(&["lo", "eth0", "eth"], Some("eth0") ; "ignores prefixes")]
    #[test_case(&["lo", "ens3", "ens"], Some("ens3") ; "cloud provider name")]
    #[test_case(&["ens3", "eth0"], Some("eth0") ; "priority follows known list")]
    #[test_case(&["lo", "ens"], None ; "no match")]
    #[test_case(&["lo", "ens", "enh", "ens4", "eth1"], None ; "near misses")]
    #[test_case(&[], None ; "no interfaces")]
    fn discovery(host: &[&str], expected: Option<&str>) {
        assert_eq!(discover_interface(host, KNOWN).as_deref(), expected);
    }

    #[test]
    fn sysfs_lists_directory_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["lo", "eth0"] {
            std::fs::create_dir(dir.path().join(name)).expect("create entry");
        }
        let names = SysfsInterfaces::with_root(dir.path())
            .interface_names()
            .expect("list");
        assert_eq!(names, ["eth0", "lo"]);
    }

    #[test]
    fn sysfs_missing_root_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = SysfsInterfaces::with_root(dir.path().join("missing"));
        assert!(source.interface_names().is_err());
    }
}
