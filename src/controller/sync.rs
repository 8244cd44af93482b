//! Sync protocol layer.
//!
//! Catches [`Control::NeedsSync`]: flushes the mount point and re-issues the
//! interrupted operation from scratch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{
    Control, Controller, DirEntry, EntryName, EntryReader, EntryType, EntryWriter, Flow, FsError,
    Layer, MknodOptions, Model, Node, SyncOptions, WriteOptions,
};

/// Layer adding [`SyncController`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncLayer;

impl SyncLayer {
    /// Create the layer.
    pub fn new() -> Self {
        Self
    }
}

impl<C: Controller> Layer<C> for SyncLayer {
    type Controller = SyncController<C>;

    fn layer(self, inner: C) -> Self::Controller {
        SyncController { inner }
    }
}

/// Performs the flush-and-retry cycle for operations that conflict with
/// unflushed state.
pub struct SyncController<C> {
    inner: C,
}

impl<C: Controller> SyncController<C> {
    fn synced<T>(&self, op: impl Fn(&C) -> Flow<T>) -> Flow<T> {
        loop {
            match op(&self.inner) {
                Err(Control::NeedsSync) => self.flush()?,
                result => return result,
            }
        }
    }

    fn flush(&self) -> Flow<()> {
        let model = self.inner.model();
        if !model.lock().is_write_locked_by_current_thread() {
            return Err(Control::NeedsWriteLock);
        }
        tracing::debug!(mount_point = %model.mount_point(), "operation needs sync, flushing");
        match self.inner.sync(SyncOptions::NONE) {
            Err(Control::Failed(FsError::Sync(err))) if err.is_warning() => {
                tracing::warn!(mount_point = %model.mount_point(), error = %err, "sync completed with warnings");
                Ok(())
            }
            result => result,
        }
    }
}

impl<C: Controller> Controller for SyncController<C> {
    fn model(&self) -> &Arc<Model> {
        self.inner.model()
    }

    fn node(&self, name: &EntryName) -> Flow<Option<Node>> {
        self.synced(|c| c.node(name))
    }

    fn read_dir(&self, name: &EntryName) -> Flow<Vec<DirEntry>> {
        self.synced(|c| c.read_dir(name))
    }

    fn read_link(&self, name: &EntryName) -> Flow<PathBuf> {
        self.synced(|c| c.read_link(name))
    }

    fn mknod(&self, name: &EntryName, entry_type: EntryType, options: MknodOptions) -> Flow<()> {
        self.synced(|c| c.mknod(name, entry_type, options))
    }

    fn symlink(&self, name: &EntryName, target: &Path, options: MknodOptions) -> Flow<()> {
        self.synced(|c| c.symlink(name, target, options))
    }

    fn unlink(&self, name: &EntryName) -> Flow<()> {
        self.synced(|c| c.unlink(name))
    }

    fn open_read(&self, name: &EntryName) -> Flow<EntryReader> {
        self.synced(|c| c.open_read(name))
    }

    fn open_write(&self, name: &EntryName, options: WriteOptions) -> Flow<EntryWriter> {
        self.synced(|c| c.open_write(name, options))
    }

    fn sync(&self, options: SyncOptions) -> Flow<()> {
        self.inner.sync(options)
    }
}
