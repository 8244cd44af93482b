//! Entry names: normalized paths relative to a mount point.

use std::fmt;
use std::str::FromStr;

use crate::FsError;

/// A normalized, relative entry name inside one federated file system.
///
/// Segments are separated by `/`. The empty name denotes the root of the
/// mount point. Leading, trailing and repeated separators are collapsed;
/// `.` and `..` segments are rejected because resolving them is the job of
/// the (external) path layer.
///
/// # Example
///
/// ```rust
/// use fedfs_kernel::EntryName;
///
/// let name = EntryName::new("/docs//readme.txt/").unwrap();
/// assert_eq!(name.as_str(), "docs/readme.txt");
/// assert_eq!(name.base_name(), "readme.txt");
/// assert_eq!(name.parent().unwrap().as_str(), "docs");
/// assert!(EntryName::new("../etc").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntryName(String);

impl EntryName {
    /// The root entry name (the empty string).
    #[inline]
    pub const fn root() -> Self {
        Self(String::new())
    }

    /// Parse and normalize an entry name.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidName`] for `.`/`..` segments or NUL characters
    pub fn new(name: &str) -> Result<Self, FsError> {
        if name.contains('\0') {
            return Err(FsError::InvalidName {
                name: name.to_owned(),
                reason: "contains NUL",
            });
        }
        let mut normalized = String::with_capacity(name.len());
        for segment in name.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(FsError::InvalidName {
                    name: name.to_owned(),
                    reason: "dot segments are not allowed",
                });
            }
            if !normalized.is_empty() {
                normalized.push('/');
            }
            normalized.push_str(segment);
        }
        Ok(Self(normalized))
    }

    /// Returns `true` for the root entry name.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The normalized string form.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last segment, or `""` for the root.
    pub fn base_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(i) => &self.0[i + 1..],
            None => &self.0,
        }
    }

    /// The parent entry name, or `None` for the root.
    pub fn parent(&self) -> Option<EntryName> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(i) => Self(self.0[..i].to_owned()),
            None => Self::root(),
        })
    }

    /// Resolve `child` against this name.
    pub fn join(&self, child: &EntryName) -> EntryName {
        match (self.is_root(), child.is_root()) {
            (_, true) => self.clone(),
            (true, false) => child.clone(),
            (false, false) => Self(format!("{}/{}", self.0, child.0)),
        }
    }

    /// Resolve a single member name against this name.
    pub(crate) fn child(&self, member: &str) -> EntryName {
        if self.is_root() {
            Self(member.to_owned())
        } else {
            Self(format!("{}/{}", self.0, member))
        }
    }

    /// Number of segments (`0` for the root).
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.split('/').count()
        }
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntryName {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators() {
        assert_eq!(EntryName::new("a//b/").unwrap().as_str(), "a/b");
        assert_eq!(EntryName::new("/").unwrap(), EntryName::root());
        assert!(EntryName::new("").unwrap().is_root());
    }

    #[test]
    fn rejects_dot_segments() {
        assert!(matches!(
            EntryName::new("a/./b"),
            Err(FsError::InvalidName { .. })
        ));
        assert!(matches!(
            EntryName::new("a/.."),
            Err(FsError::InvalidName { .. })
        ));
    }

    #[test]
    fn parent_and_base_name() {
        let name = EntryName::new("a/b/c").unwrap();
        assert_eq!(name.base_name(), "c");
        assert_eq!(name.parent().unwrap().as_str(), "a/b");
        assert_eq!(EntryName::new("a").unwrap().parent(), Some(EntryName::root()));
        assert_eq!(EntryName::root().parent(), None);
    }

    #[test]
    fn join_handles_root() {
        let a = EntryName::new("a").unwrap();
        let b = EntryName::new("b/c").unwrap();
        assert_eq!(a.join(&b).as_str(), "a/b/c");
        assert_eq!(EntryName::root().join(&b), b);
        assert_eq!(a.join(&EntryName::root()), a);
    }

    #[test]
    fn depth_counts_segments() {
        assert_eq!(EntryName::root().depth(), 0);
        assert_eq!(EntryName::new("a/b/c").unwrap().depth(), 3);
    }
}
