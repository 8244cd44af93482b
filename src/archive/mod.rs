//! Archive containers: driver interface, entry table and the innermost
//! controller.
//!
//! A driver only converts between container bytes and a flat list of
//! [`ArchiveEntry`] values. Everything else (mounting, staging mutations,
//! writing the container back through the parent) is done by
//! [`ArchiveController`].

mod controller;
mod fs;
mod ops;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::{EntryName, EntryType, FsError, Scheme};

pub use controller::ArchiveController;
pub use fs::{ArchiveFileSystem, EntryId};
pub use ops::{Mknod, Unlink};

/// One entry of a container as a driver sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArchiveEntry {
    /// Entry name inside the container.
    pub name: EntryName,
    /// Kind of entry.
    pub entry_type: EntryType,
    /// Last modification time.
    pub modified: SystemTime,
    /// File content; empty for other kinds.
    pub data: Vec<u8>,
    /// Symlink target.
    pub link_target: Option<PathBuf>,
}

impl ArchiveEntry {
    /// A file entry.
    pub fn file(name: EntryName, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name,
            entry_type: EntryType::File,
            modified: SystemTime::now(),
            data: data.into(),
            link_target: None,
        }
    }

    /// A directory entry.
    pub fn directory(name: EntryName) -> Self {
        Self {
            name,
            entry_type: EntryType::Directory,
            modified: SystemTime::now(),
            data: Vec::new(),
            link_target: None,
        }
    }

    /// A symbolic link entry.
    pub fn symlink(name: EntryName, target: impl Into<PathBuf>) -> Self {
        Self {
            name,
            entry_type: EntryType::Symlink,
            modified: SystemTime::now(),
            data: Vec::new(),
            link_target: Some(target.into()),
        }
    }
}

/// Codec of one container format.
///
/// Implementations must be stateless with respect to individual containers;
/// one driver instance serves every mount point of its scheme.
pub trait ArchiveDriver: Send + Sync {
    /// Probe and decode a container.
    ///
    /// # Errors
    ///
    /// Any error marks the bytes as not being a container of this format; the
    /// mount point is then treated as an ordinary file.
    fn read_container(&self, bytes: &[u8]) -> Result<Vec<ArchiveEntry>, FsError>;

    /// Encode a container.
    ///
    /// # Errors
    ///
    /// Encoding failures are reported as fatal sync failures.
    fn write_container(&self, entries: &[ArchiveEntry]) -> Result<Vec<u8>, FsError>;
}

/// Resolves the driver for a scheme.
pub trait DriverLookup: Send + Sync {
    /// The driver for `scheme`, if any.
    fn driver(&self, scheme: &Scheme) -> Option<Arc<dyn ArchiveDriver>>;
}

/// Map-backed [`DriverLookup`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use fedfs_kernel::{ArchiveDriver, ArchiveEntry, DriverLookup, Drivers, FsError, Scheme};
///
/// struct Empty;
///
/// impl ArchiveDriver for Empty {
///     fn read_container(&self, _: &[u8]) -> Result<Vec<ArchiveEntry>, FsError> {
///         Ok(Vec::new())
///     }
///     fn write_container(&self, _: &[ArchiveEntry]) -> Result<Vec<u8>, FsError> {
///         Ok(Vec::new())
///     }
/// }
///
/// let drivers = Drivers::new().with(Scheme::new("empty").unwrap(), Arc::new(Empty));
/// assert!(drivers.driver(&Scheme::new("empty").unwrap()).is_some());
/// assert!(drivers.driver(&Scheme::new("zip").unwrap()).is_none());
/// ```
#[derive(Default, Clone)]
pub struct Drivers {
    map: HashMap<Scheme, Arc<dyn ArchiveDriver>>,
}

impl Drivers {
    /// Create an empty lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver, builder style.
    pub fn with(mut self, scheme: Scheme, driver: Arc<dyn ArchiveDriver>) -> Self {
        self.insert(scheme, driver);
        self
    }

    /// Register a driver, replacing any previous one for the scheme.
    pub fn insert(&mut self, scheme: Scheme, driver: Arc<dyn ArchiveDriver>) {
        self.map.insert(scheme, driver);
    }
}

impl DriverLookup for Drivers {
    fn driver(&self, scheme: &Scheme) -> Option<Arc<dyn ArchiveDriver>> {
        self.map.get(scheme).cloned()
    }
}

impl fmt::Debug for Drivers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.map.keys().map(Scheme::as_str).collect();
        schemes.sort_unstable();
        f.debug_struct("Drivers").field("schemes", &schemes).finish()
    }
}
