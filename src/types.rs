//! Core value types of the controller chain contract.

use std::path::PathBuf;
use std::time::SystemTime;

use crate::EntryName;

/// Type of one view of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntryType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

/// Snapshot of an entry as seen through a controller.
///
/// Archive entries are *covariant*: the same name may resolve to a file view
/// and a directory view at once (archives may hold both `a` and `a/`).
/// [`types`](Node::types) lists every view; [`entry_type`](Node::entry_type)
/// is the primary one.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Entry name relative to the mount point that answered.
    pub name: EntryName,
    /// Primary view.
    pub entry_type: EntryType,
    /// All views, sorted.
    pub types: Vec<EntryType>,
    /// Size of the file view in bytes, `0` without one.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
    /// Target of the symlink view, if any.
    pub link_target: Option<PathBuf>,
}

impl Node {
    /// Returns `true` if the entry has a view of the given type.
    pub fn is_type(&self, entry_type: EntryType) -> bool {
        self.types.contains(&entry_type)
    }

    /// Returns `true` if the entry has a file view.
    #[inline]
    pub fn is_file(&self) -> bool {
        self.is_type(EntryType::File)
    }

    /// Returns `true` if the entry has a directory view.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_type(EntryType::Directory)
    }

    /// Returns `true` if the entry has a symlink view.
    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.is_type(EntryType::Symlink)
    }
}

/// A directory member returned from `read_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DirEntry {
    /// Member name (last segment only).
    pub name: String,
    /// Primary view of the member.
    pub entry_type: EntryType,
    /// Size of the member's file view.
    pub size: u64,
}

/// Options for creating a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MknodOptions {
    /// Create missing parent directories.
    pub create_parents: bool,
    /// Fail if the node already exists.
    pub exclusive: bool,
}

impl MknodOptions {
    /// Replace existing files, parents must exist.
    pub const NONE: Self = Self {
        create_parents: false,
        exclusive: false,
    };

    /// Create missing parents, replace existing files.
    pub const CREATE_PARENTS: Self = Self {
        create_parents: true,
        exclusive: false,
    };

    /// Fail on existing nodes, parents must exist.
    pub const EXCLUSIVE: Self = Self {
        create_parents: false,
        exclusive: true,
    };
}

/// Options for opening an entry for writing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteOptions {
    /// Create missing parent directories.
    pub create_parents: bool,
    /// Keep existing content and write after it.
    pub append: bool,
}

impl WriteOptions {
    /// Truncate, parents must exist.
    pub const TRUNCATE: Self = Self {
        create_parents: false,
        append: false,
    };

    /// Truncate, create missing parents.
    pub const CREATE_PARENTS: Self = Self {
        create_parents: true,
        append: false,
    };

    /// Append, parents must exist.
    pub const APPEND: Self = Self {
        create_parents: false,
        append: true,
    };
}

/// Options of a sync request.
///
/// # Example
///
/// ```rust
/// use fedfs_kernel::SyncOptions;
///
/// let opts = SyncOptions::UMOUNT;
/// assert!(opts.force_close_io && opts.clear_cache);
/// assert!(!opts.abort_changes);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncOptions {
    /// Wait until other threads closed their streams before checking them.
    pub wait_close_io: bool,
    /// Close open streams of all threads before flushing.
    pub force_close_io: bool,
    /// Discard pending changes instead of flushing them.
    pub abort_changes: bool,
    /// Unmount after flushing.
    pub clear_cache: bool,
}

impl SyncOptions {
    /// Flush, fail if streams are open.
    pub const NONE: Self = Self {
        wait_close_io: false,
        force_close_io: false,
        abort_changes: false,
        clear_cache: false,
    };

    /// Flush after other threads closed their streams.
    pub const SYNC: Self = Self {
        wait_close_io: true,
        force_close_io: false,
        abort_changes: false,
        clear_cache: false,
    };

    /// Close all streams, flush and unmount.
    pub const UMOUNT: Self = Self {
        wait_close_io: false,
        force_close_io: true,
        abort_changes: false,
        clear_cache: true,
    };

    /// Discard changes and unmount.
    pub const RESET: Self = Self {
        wait_close_io: false,
        force_close_io: false,
        abort_changes: true,
        clear_cache: true,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(types: Vec<EntryType>) -> Node {
        Node {
            name: EntryName::root(),
            entry_type: types[0],
            types,
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
            link_target: None,
        }
    }

    #[test]
    fn covariant_node_reports_all_views() {
        let n = node(vec![EntryType::File, EntryType::Directory]);
        assert!(n.is_file());
        assert!(n.is_dir());
        assert!(!n.is_symlink());
    }

    #[test]
    fn sync_option_presets() {
        assert_eq!(SyncOptions::default(), SyncOptions::NONE);
        assert!(SyncOptions::SYNC.wait_close_io);
        assert!(SyncOptions::RESET.abort_changes);
        assert!(SyncOptions::RESET.clear_cache);
        assert!(!SyncOptions::RESET.force_close_io);
    }

    #[test]
    fn mknod_option_presets() {
        assert!(MknodOptions::CREATE_PARENTS.create_parents);
        assert!(!MknodOptions::CREATE_PARENTS.exclusive);
        assert!(MknodOptions::EXCLUSIVE.exclusive);
        assert_eq!(MknodOptions::default(), MknodOptions::NONE);
    }

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EntryType>();
        assert_send_sync::<Node>();
        assert_send_sync::<DirEntry>();
        assert_send_sync::<SyncOptions>();
    }
}
