//! False-positive fallback layer.
//!
//! A mount point is only presumed to be an archive. When the archive
//! controller finds out that it is not (missing target, not a regular file,
//! rejected by the driver) it raises [`Control::FalsePositive`], and this
//! layer re-runs the operation on the parent file system as if the mount
//! point were an ordinary entry there.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    Control, Controller, DirEntry, EntryName, EntryReader, EntryType, EntryWriter, Flow, FsError,
    Layer, MknodOptions, Model, Node, SyncOptions, WriteOptions,
};

/// Layer adding [`FalsePositiveController`].
pub struct FalsePositiveLayer {
    parent: Arc<dyn Controller>,
}

impl FalsePositiveLayer {
    /// Create the layer, falling back to the given parent chain.
    pub fn new(parent: Arc<dyn Controller>) -> Self {
        Self { parent }
    }
}

impl<C: Controller> Layer<C> for FalsePositiveLayer {
    type Controller = FalsePositiveController<C>;

    fn layer(self, inner: C) -> Self::Controller {
        let entry_in_parent = inner.model().mount_point().entry_in_parent().clone();
        FalsePositiveController {
            inner,
            parent: self.parent,
            entry_in_parent,
            state: Mutex::new(State::TryChild),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    TryChild,
    UseParent,
}

/// Reroutes operations on false-positive archives to the parent file system.
pub struct FalsePositiveController<C> {
    inner: C,
    parent: Arc<dyn Controller>,
    entry_in_parent: EntryName,
    state: Mutex<State>,
}

/// A missing target may still become an archive later; anything else sticks
/// until the next sync.
fn is_persistent(cause: &FsError) -> bool {
    !matches!(cause, FsError::NotFound { .. })
}

impl<C: Controller> FalsePositiveController<C> {
    /// Returns `true` while operations go straight to the parent.
    pub fn is_using_parent(&self) -> bool {
        *self.state.lock() == State::UseParent
    }

    fn call<T>(
        &self,
        name: &EntryName,
        op: impl Fn(&dyn Controller, &EntryName) -> Flow<T>,
    ) -> Flow<T> {
        if *self.state.lock() == State::TryChild {
            match op(&self.inner, name) {
                Err(Control::FalsePositive(cause)) => {
                    let mount_point = self.inner.model().mount_point();
                    if is_persistent(&cause) {
                        tracing::debug!(%mount_point, %cause, "false positive archive, using parent");
                        *self.state.lock() = State::UseParent;
                    } else {
                        tracing::trace!(%mount_point, %cause, "transient false positive, trying parent");
                    }
                }
                result => return result,
            }
        }
        let name = self.entry_in_parent.join(name);
        match op(&*self.parent, &name) {
            Err(Control::FalsePositive(cause)) => Err(Control::Failed(cause)),
            result => result,
        }
    }
}

impl<C: Controller> Controller for FalsePositiveController<C> {
    fn model(&self) -> &Arc<Model> {
        self.inner.model()
    }

    fn node(&self, name: &EntryName) -> Flow<Option<Node>> {
        self.call(name, |c, n| c.node(n))
    }

    fn read_dir(&self, name: &EntryName) -> Flow<Vec<DirEntry>> {
        self.call(name, |c, n| c.read_dir(n))
    }

    fn read_link(&self, name: &EntryName) -> Flow<PathBuf> {
        self.call(name, |c, n| c.read_link(n))
    }

    fn mknod(&self, name: &EntryName, entry_type: EntryType, options: MknodOptions) -> Flow<()> {
        self.call(name, |c, n| c.mknod(n, entry_type, options))
    }

    fn symlink(&self, name: &EntryName, target: &Path, options: MknodOptions) -> Flow<()> {
        self.call(name, |c, n| c.symlink(n, target, options))
    }

    fn unlink(&self, name: &EntryName) -> Flow<()> {
        self.call(name, |c, n| c.unlink(n))
    }

    fn open_read(&self, name: &EntryName) -> Flow<EntryReader> {
        self.call(name, |c, n| c.open_read(n))
    }

    fn open_write(&self, name: &EntryName, options: WriteOptions) -> Flow<EntryWriter> {
        self.call(name, |c, n| c.open_write(n, options))
    }

    fn sync(&self, options: SyncOptions) -> Flow<()> {
        *self.state.lock() = State::TryChild;
        self.inner.sync(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LayerExt, MemoryStore, MountPoint, Scheme};
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn name(s: &str) -> EntryName {
        EntryName::new(s).unwrap()
    }

    /// Always rejects its container with the configured cause.
    struct Probe {
        model: Arc<Model>,
        calls: AtomicUsize,
        cause: fn(&MountPoint) -> Control,
    }

    impl Probe {
        fn new(cause: fn(&MountPoint) -> Control) -> Self {
            let mount_point = MountPoint::new(
                Scheme::new("toy").unwrap(),
                &MountPoint::host(),
                &name("a.toy"),
            );
            Self {
                model: Arc::new(Model::new(mount_point, None)),
                calls: AtomicUsize::new(0),
                cause,
            }
        }

        fn reject<T>(&self) -> Flow<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.cause)(self.model.mount_point()))
        }
    }

    impl Controller for Probe {
        fn model(&self) -> &Arc<Model> {
            &self.model
        }

        fn node(&self, _: &EntryName) -> Flow<Option<Node>> {
            self.reject()
        }

        fn read_dir(&self, _: &EntryName) -> Flow<Vec<DirEntry>> {
            self.reject()
        }

        fn read_link(&self, _: &EntryName) -> Flow<PathBuf> {
            self.reject()
        }

        fn mknod(&self, _: &EntryName, _: EntryType, _: MknodOptions) -> Flow<()> {
            self.reject()
        }

        fn symlink(&self, _: &EntryName, _: &Path, _: MknodOptions) -> Flow<()> {
            self.reject()
        }

        fn unlink(&self, _: &EntryName) -> Flow<()> {
            self.reject()
        }

        fn open_read(&self, _: &EntryName) -> Flow<EntryReader> {
            self.reject()
        }

        fn open_write(&self, _: &EntryName, _: WriteOptions) -> Flow<EntryWriter> {
            self.reject()
        }

        fn sync(&self, _: SyncOptions) -> Flow<()> {
            Ok(())
        }
    }

    fn invalid(mount_point: &MountPoint) -> Control {
        Control::FalsePositive(FsError::InvalidData {
            mount_point: mount_point.clone(),
            details: "bad magic".into(),
        })
    }

    fn missing(_: &MountPoint) -> Control {
        Control::FalsePositive(FsError::NotFound { name: EntryName::root() })
    }

    fn broken(_: &MountPoint) -> Control {
        Control::Failed(FsError::io(
            "read",
            &EntryName::root(),
            std::io::Error::other("disk on fire"),
        ))
    }

    fn host_with_plain_file() -> Arc<dyn Controller> {
        let host = MemoryStore::new();
        let mut writer = host.open_write(&name("a.toy"), WriteOptions::TRUNCATE).unwrap();
        writer.write_all(b"just text").unwrap();
        writer.close().unwrap();
        Arc::new(host)
    }

    #[test]
    fn false_positive_reads_parent_entry() {
        let host = host_with_plain_file();
        let chain = Probe::new(invalid).layer(FalsePositiveLayer::new(Arc::clone(&host)));

        let node = chain.node(&EntryName::root()).unwrap().unwrap();
        let direct = host.node(&name("a.toy")).unwrap().unwrap();
        assert_eq!(node.size, direct.size);
        assert!(node.is_file());

        let mut text = String::new();
        chain
            .open_read(&EntryName::root())
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "just text");
    }

    #[test]
    fn persistent_false_positive_is_cached_until_sync() {
        let chain = Probe::new(invalid).layer(FalsePositiveLayer::new(host_with_plain_file()));
        chain.node(&EntryName::root()).unwrap();
        chain.node(&EntryName::root()).unwrap();
        assert!(chain.is_using_parent());
        assert_eq!(chain.inner.calls.load(Ordering::SeqCst), 1);

        chain.sync(SyncOptions::NONE).unwrap();
        assert!(!chain.is_using_parent());
        chain.node(&EntryName::root()).unwrap();
        assert_eq!(chain.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_target_is_not_cached() {
        let chain = Probe::new(missing).layer(FalsePositiveLayer::new(Arc::new(MemoryStore::new())));
        assert!(chain.node(&name("x")).unwrap().is_none());
        assert!(!chain.is_using_parent());
        chain.node(&name("x")).unwrap();
        assert_eq!(chain.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn genuine_failures_are_not_rerouted() {
        let chain = Probe::new(broken).layer(FalsePositiveLayer::new(host_with_plain_file()));
        assert!(matches!(
            chain.node(&EntryName::root()),
            Err(Control::Failed(FsError::Io { .. }))
        ));
        assert!(!chain.is_using_parent());
    }
}
