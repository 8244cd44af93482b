//! Application-facing view of one federated file system.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{
    Controller, DirEntry, EntryName, EntryReader, EntryType, EntryWriter, FsError, MknodOptions,
    MountPoint, Node, SyncOptions, WriteOptions, settle,
};

/// Entry point for applications into a controller chain.
///
/// Every method enters the outermost layer of the chain and converts the
/// outcome into a plain `Result<_, FsError>`. Control signals never reach the
/// caller: an unabsorbed false positive is reported as its cause, any other
/// leftover signal as [`FsError::Internal`].
///
/// Views are cheap to clone; all clones share the chain.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use fedfs_kernel::{EntryName, FsView, MemoryStore};
///
/// let view = FsView::new(Arc::new(MemoryStore::new()));
/// let dir = EntryName::new("docs").unwrap();
/// view.create_dir(&dir).unwrap();
/// assert!(view.exists(&dir).unwrap());
/// assert!(view.create_dir(&dir).is_err());
/// ```
#[derive(Clone)]
pub struct FsView {
    controller: Arc<dyn Controller>,
}

impl FsView {
    /// Wrap the outermost controller of a chain.
    pub fn new(controller: Arc<dyn Controller>) -> Self {
        Self { controller }
    }

    /// The mount point this view serves.
    pub fn mount_point(&self) -> &MountPoint {
        self.controller.model().mount_point()
    }

    /// The chain behind this view.
    #[inline]
    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    /// Look up an entry; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidData`] if the mount point is neither an archive nor
    ///   a plain entry of its parent
    pub fn node(&self, name: &EntryName) -> Result<Option<Node>, FsError> {
        settle(self.controller.node(name))
    }

    /// Returns `true` if the entry exists.
    ///
    /// # Errors
    ///
    /// See [`FsView::node`].
    pub fn exists(&self, name: &EntryName) -> Result<bool, FsError> {
        self.node(name).map(|node| node.is_some())
    }

    /// List the members of a directory.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the directory does not exist
    /// - [`FsError::NotADirectory`] if the entry has no directory view
    pub fn read_dir(&self, name: &EntryName) -> Result<Vec<DirEntry>, FsError> {
        settle(self.controller.read_dir(name))
    }

    /// Read the target of a symbolic link.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the entry does not exist
    /// - [`FsError::NotASymlink`] if the entry has no symlink view
    pub fn read_link(&self, name: &EntryName) -> Result<PathBuf, FsError> {
        settle(self.controller.read_link(name))
    }

    /// Create an empty file, replacing an existing one.
    ///
    /// # Errors
    ///
    /// See [`FsView::mknod`].
    pub fn create_file(&self, name: &EntryName) -> Result<(), FsError> {
        self.mknod(name, EntryType::File, MknodOptions::NONE)
    }

    /// Create a directory; its parent must exist.
    ///
    /// # Errors
    ///
    /// See [`FsView::mknod`].
    pub fn create_dir(&self, name: &EntryName) -> Result<(), FsError> {
        self.mknod(name, EntryType::Directory, MknodOptions::NONE)
    }

    /// Create a file or directory node.
    ///
    /// # Errors
    ///
    /// - [`FsError::AlreadyExists`] if the node exists and is not a file being
    ///   replaced without [`MknodOptions::exclusive`]
    /// - [`FsError::NotFound`] if a parent is missing and
    ///   [`MknodOptions::create_parents`] is not set
    /// - [`FsError::NotADirectory`] if a parent is not a directory
    pub fn mknod(
        &self,
        name: &EntryName,
        entry_type: EntryType,
        options: MknodOptions,
    ) -> Result<(), FsError> {
        settle(self.controller.mknod(name, entry_type, options))
    }

    /// Create a symbolic link.
    ///
    /// # Errors
    ///
    /// See [`FsView::mknod`].
    pub fn symlink(
        &self,
        name: &EntryName,
        target: &Path,
        options: MknodOptions,
    ) -> Result<(), FsError> {
        settle(self.controller.symlink(name, target, options))
    }

    /// Remove a node.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the node does not exist
    /// - [`FsError::DirectoryNotEmpty`] if it is a directory with members
    pub fn unlink(&self, name: &EntryName) -> Result<(), FsError> {
        settle(self.controller.unlink(name))
    }

    /// Open a file for reading.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the file does not exist
    /// - [`FsError::NotAFile`] if the entry has no file view
    pub fn open_read(&self, name: &EntryName) -> Result<EntryReader, FsError> {
        settle(self.controller.open_read(name))
    }

    /// Open a file for writing; closing the writer commits its content.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotAFile`] if the entry exists without a file view
    /// - [`FsError::NotFound`] if the parent is missing and
    ///   [`WriteOptions::create_parents`] is not set
    pub fn open_write(
        &self,
        name: &EntryName,
        options: WriteOptions,
    ) -> Result<EntryWriter, FsError> {
        settle(self.controller.open_write(name, options))
    }

    /// Flush pending changes of this mount point to its parent.
    ///
    /// # Errors
    ///
    /// - [`FsError::ThreadLocalBusy`] / [`FsError::GlobalBusy`] if streams are
    ///   open and neither waiting nor forced closing was requested
    /// - [`FsError::Sync`] for the aggregate of failures and warnings
    pub fn sync(&self, options: SyncOptions) -> Result<(), FsError> {
        settle(self.controller.sync(options))
    }
}

impl AsRef<FsView> for FsView {
    fn as_ref(&self) -> &FsView {
        self
    }
}

impl std::fmt::Debug for FsView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsView")
            .field("mount_point", &self.mount_point().to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Control, Flow, MemoryStore, Model};

    fn name(s: &str) -> EntryName {
        EntryName::new(s).unwrap()
    }

    /// Answers every call with a signal no layer catches.
    struct Leaky {
        model: Arc<Model>,
    }

    impl Controller for Leaky {
        fn model(&self) -> &Arc<Model> {
            &self.model
        }

        fn node(&self, _: &EntryName) -> Flow<Option<Node>> {
            Err(Control::NeedsLockRetry)
        }

        fn read_dir(&self, _: &EntryName) -> Flow<Vec<DirEntry>> {
            Err(Control::NeedsSync)
        }

        fn read_link(&self, name: &EntryName) -> Flow<PathBuf> {
            Err(Control::FalsePositive(FsError::NotASymlink { name: name.clone() }))
        }

        fn mknod(&self, _: &EntryName, _: EntryType, _: MknodOptions) -> Flow<()> {
            Err(Control::NeedsWriteLock)
        }

        fn symlink(&self, _: &EntryName, _: &Path, _: MknodOptions) -> Flow<()> {
            Err(Control::NeedsWriteLock)
        }

        fn unlink(&self, _: &EntryName) -> Flow<()> {
            Err(Control::NeedsWriteLock)
        }

        fn open_read(&self, _: &EntryName) -> Flow<EntryReader> {
            Err(Control::NeedsSync)
        }

        fn open_write(&self, _: &EntryName, _: WriteOptions) -> Flow<EntryWriter> {
            Err(Control::NeedsSync)
        }

        fn sync(&self, _: SyncOptions) -> Flow<()> {
            Ok(())
        }
    }

    fn leaky() -> FsView {
        FsView::new(Arc::new(Leaky {
            model: Arc::new(Model::new(MountPoint::host(), None)),
        }))
    }

    #[test]
    fn escaped_signals_become_internal_errors() {
        let view = leaky();
        assert!(matches!(
            view.node(&name("a")),
            Err(FsError::Internal { signal: "needs-lock-retry" })
        ));
        assert!(matches!(
            view.create_file(&name("a")),
            Err(FsError::Internal { signal: "needs-write-lock" })
        ));
        assert!(matches!(
            view.read_dir(&name("a")),
            Err(FsError::Internal { signal: "needs-sync" })
        ));
    }

    #[test]
    fn escaped_false_positive_reports_cause() {
        assert!(matches!(
            leaky().read_link(&name("a")),
            Err(FsError::NotASymlink { .. })
        ));
    }

    #[test]
    fn host_view_round_trip() {
        use std::io::{Read, Write};

        let view = FsView::new(Arc::new(MemoryStore::new()));
        view.create_dir(&name("d")).unwrap();
        let mut writer = view
            .open_write(&name("d/f"), WriteOptions::TRUNCATE)
            .unwrap();
        writer.write_all(b"content").unwrap();
        writer.close().unwrap();

        let mut text = String::new();
        view.open_read(&name("d/f"))
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "content");
        assert_eq!(view.read_dir(&name("d")).unwrap().len(), 1);
        assert!(view.unlink(&name("d")).is_err());
        view.unlink(&name("d/f")).unwrap();
        view.unlink(&name("d")).unwrap();
        assert!(!view.exists(&name("d")).unwrap());
    }

    #[test]
    fn view_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FsView>();
    }
}
