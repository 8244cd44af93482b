//! Mount point identities.

use std::fmt;
use std::sync::Arc;

use crate::{EntryName, FsError};

/// Lowercase identifier of a container format, e.g. `zip` or `tar`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scheme(String);

impl Scheme {
    /// The scheme of the host file system.
    pub const HOST: &'static str = "file";

    /// Parse a scheme.
    ///
    /// A scheme starts with an ASCII letter and continues with ASCII
    /// letters, digits, `+`, `-` or `.`. It is stored lowercase.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidScheme`] if the input is not a valid scheme
    pub fn new(scheme: &str) -> Result<Self, FsError> {
        let mut chars = scheme.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid {
            return Err(FsError::InvalidScheme {
                scheme: scheme.to_owned(),
            });
        }
        Ok(Self(scheme.to_ascii_lowercase()))
    }

    /// The scheme as a string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable identity of one federated file system.
///
/// A mount point is a scheme plus a hierarchical path from the federation
/// root. Every mount point except the host root knows its parent mount point
/// and the entry name under which its container is stored in the parent.
///
/// # Example
///
/// ```rust
/// use fedfs_kernel::{EntryName, MountPoint, Scheme};
///
/// let zip = Scheme::new("zip").unwrap();
/// let outer = MountPoint::new(zip.clone(), &MountPoint::host(), &EntryName::new("data/a.zip").unwrap());
/// let inner = MountPoint::new(zip, &outer, &EntryName::new("nested/b.zip").unwrap());
///
/// assert_eq!(outer.to_string(), "zip:/data/a.zip");
/// assert_eq!(inner.to_string(), "zip:/data/a.zip/nested/b.zip");
/// assert_eq!(inner.entry_in_parent().as_str(), "nested/b.zip");
/// assert_eq!(inner.depth(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MountPoint {
    scheme: Scheme,
    path: EntryName,
    parent: Option<Arc<MountPoint>>,
    entry: EntryName,
}

impl MountPoint {
    /// The root of the host file system.
    pub fn host() -> Self {
        Self {
            scheme: Scheme(Scheme::HOST.to_owned()),
            path: EntryName::root(),
            parent: None,
            entry: EntryName::root(),
        }
    }

    /// A mount point for the container stored at `entry` inside `parent`.
    pub fn new(scheme: Scheme, parent: &MountPoint, entry: &EntryName) -> Self {
        Self {
            scheme,
            path: parent.path.join(entry),
            parent: Some(Arc::new(parent.clone())),
            entry: entry.clone(),
        }
    }

    /// The container format scheme.
    #[inline]
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// The hierarchical path from the federation root.
    #[inline]
    pub fn path(&self) -> &EntryName {
        &self.path
    }

    /// The parent mount point, `None` for the host root.
    pub fn parent(&self) -> Option<&MountPoint> {
        self.parent.as_deref()
    }

    /// The entry name of this container inside its parent.
    #[inline]
    pub fn entry_in_parent(&self) -> &EntryName {
        &self.entry
    }

    /// Number of ancestors (`0` for the host root).
    pub fn depth(&self) -> usize {
        self.parent.as_ref().map_or(0, |p| p.depth() + 1)
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}", self.scheme, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> EntryName {
        EntryName::new(s).unwrap()
    }

    #[test]
    fn scheme_is_lowercased() {
        assert_eq!(Scheme::new("ZIP").unwrap().as_str(), "zip");
        assert_eq!(Scheme::new("tar.gz").unwrap().as_str(), "tar.gz");
    }

    #[test]
    fn scheme_rejects_garbage() {
        assert!(Scheme::new("").is_err());
        assert!(Scheme::new("1zip").is_err());
        assert!(Scheme::new("zi p").is_err());
    }

    #[test]
    fn host_is_root() {
        let host = MountPoint::host();
        assert_eq!(host.depth(), 0);
        assert!(host.parent().is_none());
        assert_eq!(host.to_string(), "file:/");
    }

    #[test]
    fn equality_covers_scheme_and_path() {
        let zip = Scheme::new("zip").unwrap();
        let tar = Scheme::new("tar").unwrap();
        let a = MountPoint::new(zip.clone(), &MountPoint::host(), &name("a"));
        let b = MountPoint::new(zip, &MountPoint::host(), &name("a"));
        let c = MountPoint::new(tar, &MountPoint::host(), &name("a"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn nested_path_and_parent() {
        let zip = Scheme::new("zip").unwrap();
        let outer = MountPoint::new(zip.clone(), &MountPoint::host(), &name("x.zip"));
        let inner = MountPoint::new(zip, &outer, &name("y.zip"));
        assert_eq!(inner.path().as_str(), "x.zip/y.zip");
        assert_eq!(inner.parent(), Some(&outer));
        assert_eq!(inner.depth(), 2);
    }
}
