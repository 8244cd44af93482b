//! # Controller Chain
//!
//! Every mount point is served by a chain of controllers. Each layer owns the
//! next-inner one and adds one cross-cutting protocol:
//!
//! ```text
//! FsView ─▶ FalsePositive ─▶ Lock ─▶ Sync ─▶ Resource ─▶ Archive ─▶ (parent chain)
//! ```
//!
//! | Layer | Catches | Purpose |
//! |-------|---------|---------|
//! | [`FalsePositiveController`] | [`Control::FalsePositive`] | Reroute to the parent file system |
//! | [`LockController`] | [`Control::NeedsWriteLock`], [`Control::NeedsLockRetry`] | Read/write locking, back-off |
//! | [`SyncController`] | [`Control::NeedsSync`] | Flush, then re-issue the operation |
//! | [`ResourceController`] | n/a | Stream accounting, busy checks before sync |
//! | `ArchiveController` | n/a | Mounted archive state, raises the signals |
//!
//! ## Control Signals
//!
//! Layers abort a call by returning a [`Control`] other than
//! [`Control::Failed`]. A signal is caught by its designated layer and never
//! reaches the application: [`FsView`](crate::FsView) turns whatever is left
//! into an [`FsError`].

mod false_positive;
mod lock;
mod resource;
mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{
    DirEntry, EntryName, EntryReader, EntryType, EntryWriter, FsError, MknodOptions, Model, Node,
    SyncOptions, WriteOptions,
};

pub use false_positive::{FalsePositiveController, FalsePositiveLayer};
pub use lock::{LockController, LockLayer};
pub use resource::{ResourceController, ResourceLayer};
pub use sync::{SyncController, SyncLayer};

/// Outcome of a chain call other than success.
#[derive(Debug)]
pub enum Control {
    /// The operation needs the write lock, but the calling frame holds only a
    /// read lock. Caught by the [`LockController`] frame that took it.
    NeedsWriteLock,
    /// A nested lock could not be taken without risking a deadlock. Caught by
    /// the outermost [`LockController`] frame of the thread.
    NeedsLockRetry,
    /// The operation conflicts with unflushed state. Caught by the
    /// [`SyncController`].
    NeedsSync,
    /// The mount point is not a valid container. Caught by the
    /// [`FalsePositiveController`].
    FalsePositive(FsError),
    /// A reported failure.
    Failed(FsError),
}

impl Control {
    /// Name of the signal, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Control::NeedsWriteLock => "needs-write-lock",
            Control::NeedsLockRetry => "needs-lock-retry",
            Control::NeedsSync => "needs-sync",
            Control::FalsePositive(_) => "false-positive",
            Control::Failed(_) => "failed",
        }
    }

    /// Convert into a reported failure at the application boundary.
    ///
    /// A false positive that no fallback layer absorbed is reported as its
    /// cause. Any other signal escaping the chain is a defect and becomes
    /// [`FsError::Internal`].
    pub fn into_error(self) -> FsError {
        match self {
            Control::Failed(e) | Control::FalsePositive(e) => e,
            signal => {
                tracing::error!(signal = signal.name(), "control signal escaped the controller chain");
                FsError::Internal {
                    signal: signal.name(),
                }
            }
        }
    }

    /// Split a reported failure from a signal that must keep travelling.
    pub(crate) fn into_reported(self) -> Result<FsError, Control> {
        match self {
            Control::Failed(e) => Ok(e),
            signal => Err(signal),
        }
    }
}

impl From<FsError> for Control {
    fn from(error: FsError) -> Self {
        Control::Failed(error)
    }
}

/// Result of a chain call.
pub type Flow<T> = Result<T, Control>;

/// Convert a chain result into an application result.
pub fn settle<T>(flow: Flow<T>) -> Result<T, FsError> {
    flow.map_err(Control::into_error)
}

/// The chain contract implemented by every controller layer.
///
/// Names are relative to the controller's mount point.
///
/// # Thread Safety
///
/// Controllers are shared as `Arc<dyn Controller>` across threads; all
/// methods take `&self`.
pub trait Controller: Send + Sync {
    /// The model of this controller's mount point.
    fn model(&self) -> &Arc<Model>;

    /// Look up an entry; `None` if it does not exist.
    fn node(&self, name: &EntryName) -> Flow<Option<Node>>;

    /// List the members of a directory.
    fn read_dir(&self, name: &EntryName) -> Flow<Vec<DirEntry>>;

    /// Read the target of a symbolic link.
    fn read_link(&self, name: &EntryName) -> Flow<PathBuf>;

    /// Create a file or directory node.
    fn mknod(&self, name: &EntryName, entry_type: EntryType, options: MknodOptions) -> Flow<()>;

    /// Create a symbolic link.
    fn symlink(&self, name: &EntryName, target: &Path, options: MknodOptions) -> Flow<()>;

    /// Remove a node.
    fn unlink(&self, name: &EntryName) -> Flow<()>;

    /// Open a file entry for reading.
    fn open_read(&self, name: &EntryName) -> Flow<EntryReader>;

    /// Open a file entry for writing; data is committed when the writer closes.
    fn open_write(&self, name: &EntryName, options: WriteOptions) -> Flow<EntryWriter>;

    /// Flush pending changes to the parent file system.
    fn sync(&self, options: SyncOptions) -> Flow<()>;
}

impl<C: Controller + ?Sized> Controller for Arc<C> {
    fn model(&self) -> &Arc<Model> {
        (**self).model()
    }

    fn node(&self, name: &EntryName) -> Flow<Option<Node>> {
        (**self).node(name)
    }

    fn read_dir(&self, name: &EntryName) -> Flow<Vec<DirEntry>> {
        (**self).read_dir(name)
    }

    fn read_link(&self, name: &EntryName) -> Flow<PathBuf> {
        (**self).read_link(name)
    }

    fn mknod(&self, name: &EntryName, entry_type: EntryType, options: MknodOptions) -> Flow<()> {
        (**self).mknod(name, entry_type, options)
    }

    fn symlink(&self, name: &EntryName, target: &Path, options: MknodOptions) -> Flow<()> {
        (**self).symlink(name, target, options)
    }

    fn unlink(&self, name: &EntryName) -> Flow<()> {
        (**self).unlink(name)
    }

    fn open_read(&self, name: &EntryName) -> Flow<EntryReader> {
        (**self).open_read(name)
    }

    fn open_write(&self, name: &EntryName, options: WriteOptions) -> Flow<EntryWriter> {
        (**self).open_write(name, options)
    }

    fn sync(&self, options: SyncOptions) -> Flow<()> {
        (**self).sync(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_is_object_safe() {
        fn _check(_: &dyn Controller) {}
    }

    #[test]
    fn failures_pass_through_settle() {
        let flow: Flow<()> = Err(FsError::NotFound {
            name: EntryName::root(),
        }
        .into());
        assert!(matches!(settle(flow), Err(FsError::NotFound { .. })));
    }

    #[test]
    fn escaped_false_positive_reports_cause() {
        let flow: Flow<()> = Err(Control::FalsePositive(FsError::NotFound {
            name: EntryName::root(),
        }));
        assert!(matches!(settle(flow), Err(FsError::NotFound { .. })));
    }

    #[test]
    fn escaped_signal_is_internal_error() {
        let flow: Flow<()> = Err(Control::NeedsSync);
        match settle(flow) {
            Err(FsError::Internal { signal }) => assert_eq!(signal, "needs-sync"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
