//! Lock coordination layer.
//!
//! Read-class operations run under the model's read lock, write-class
//! operations under its write lock. A read-class operation that turns out to
//! need the write lock (e.g. it has to mount the archive first) is re-entered
//! from scratch under the write lock. A thread that already holds some model
//! lock never blocks on another one; it raises [`Control::NeedsLockRetry`]
//! instead and its outermost lock frame backs off and retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crate::model::lock::held_by_current_thread;
use crate::{
    Control, Controller, DirEntry, EntryName, EntryReader, EntryType, EntryWriter, Flow, Layer,
    LockConfig, MknodOptions, Model, ModelLock, Node, ReadGuard, SyncOptions, WriteGuard,
    WriteOptions,
};

/// Layer adding [`LockController`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LockLayer {
    config: LockConfig,
}

impl LockLayer {
    /// Create the layer with the given back-off configuration.
    pub fn new(config: LockConfig) -> Self {
        Self { config }
    }
}

impl<C: Controller> Layer<C> for LockLayer {
    type Controller = LockController<C>;

    fn layer(self, inner: C) -> Self::Controller {
        LockController {
            inner,
            config: self.config,
        }
    }
}

/// Coordinates read and write access to the model.
pub struct LockController<C> {
    inner: C,
    config: LockConfig,
}

impl<C: Controller> LockController<C> {
    fn lock(&self) -> &ModelLock {
        self.inner.model().lock()
    }

    fn read_or_write_locked<T>(&self, op: impl Fn(&C) -> Flow<T>) -> Flow<T> {
        let lock = self.lock();
        if lock.is_write_locked_by_current_thread() {
            return op(&self.inner);
        }
        self.retrying(|| {
            // a frame that did not take the first read lock cannot upgrade
            let nested = lock.is_read_locked_by_current_thread();
            {
                let _guard = self.acquire_read()?;
                match op(&self.inner) {
                    Err(Control::NeedsWriteLock) if !nested => {}
                    result => return result,
                }
            }
            tracing::trace!(
                mount_point = %self.inner.model().mount_point(),
                "re-entering operation under write lock"
            );
            self.write_locked_now(&op)
        })
    }

    fn write_locked<T>(&self, op: impl Fn(&C) -> Flow<T>) -> Flow<T> {
        let lock = self.lock();
        if lock.is_write_locked_by_current_thread() {
            return op(&self.inner);
        }
        if lock.is_read_locked_by_current_thread() {
            return Err(Control::NeedsWriteLock);
        }
        self.retrying(|| self.write_locked_now(&op))
    }

    fn write_locked_now<T>(&self, op: &impl Fn(&C) -> Flow<T>) -> Flow<T> {
        let _guard = self.acquire_write()?;
        op(&self.inner)
    }

    fn acquire_read(&self) -> Flow<ReadGuard<'_>> {
        if held_by_current_thread() == 0 {
            Ok(self.lock().read())
        } else {
            self.lock().try_read().ok_or(Control::NeedsLockRetry)
        }
    }

    fn acquire_write(&self) -> Flow<WriteGuard<'_>> {
        if held_by_current_thread() == 0 {
            self.lock().write().ok_or(Control::NeedsWriteLock)
        } else {
            self.lock().try_write().ok_or(Control::NeedsLockRetry)
        }
    }

    fn retrying<T>(&self, mut attempt_op: impl FnMut() -> Flow<T>) -> Flow<T> {
        if held_by_current_thread() > 0 {
            return attempt_op();
        }
        let mut attempt = 0u32;
        loop {
            match attempt_op() {
                Err(Control::NeedsLockRetry) => {
                    attempt += 1;
                    let pause = self.config.pause(attempt);
                    tracing::debug!(
                        mount_point = %self.inner.model().mount_point(),
                        attempt,
                        ?pause,
                        "lock contention, backing off"
                    );
                    thread::sleep(pause);
                }
                result => return result,
            }
        }
    }
}

impl<C: Controller> Controller for LockController<C> {
    fn model(&self) -> &Arc<Model> {
        self.inner.model()
    }

    fn node(&self, name: &EntryName) -> Flow<Option<Node>> {
        self.read_or_write_locked(|c| c.node(name))
    }

    fn read_dir(&self, name: &EntryName) -> Flow<Vec<DirEntry>> {
        self.read_or_write_locked(|c| c.read_dir(name))
    }

    fn read_link(&self, name: &EntryName) -> Flow<PathBuf> {
        self.read_or_write_locked(|c| c.read_link(name))
    }

    fn mknod(&self, name: &EntryName, entry_type: EntryType, options: MknodOptions) -> Flow<()> {
        self.write_locked(|c| c.mknod(name, entry_type, options))
    }

    fn symlink(&self, name: &EntryName, target: &Path, options: MknodOptions) -> Flow<()> {
        self.write_locked(|c| c.symlink(name, target, options))
    }

    fn unlink(&self, name: &EntryName) -> Flow<()> {
        self.write_locked(|c| c.unlink(name))
    }

    fn open_read(&self, name: &EntryName) -> Flow<EntryReader> {
        self.read_or_write_locked(|c| c.open_read(name))
    }

    fn open_write(&self, name: &EntryName, options: WriteOptions) -> Flow<EntryWriter> {
        self.write_locked(|c| c.open_write(name, options))
    }

    fn sync(&self, options: SyncOptions) -> Flow<()> {
        self.write_locked(|c| c.sync(options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FsError, LayerExt, MountPoint};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Records the lock state seen by each call.
    struct Probe {
        model: Arc<Model>,
        writers_inside: AtomicUsize,
        overlap: AtomicBool,
        mounted: AtomicBool,
        calls: AtomicUsize,
    }

    impl Probe {
        fn new() -> Self {
            Self {
                model: Arc::new(Model::new(MountPoint::host(), None)),
                writers_inside: AtomicUsize::new(0),
                overlap: AtomicBool::new(false),
                mounted: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn unsupported<T>() -> Flow<T> {
            Err(FsError::Internal { signal: "unsupported" }.into())
        }
    }

    impl Controller for Probe {
        fn model(&self) -> &Arc<Model> {
            &self.model
        }

        // behaves like a lazily mounting archive: the first lookup needs the write lock
        fn node(&self, _: &EntryName) -> Flow<Option<Node>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.mounted.load(Ordering::SeqCst) {
                if !self.model.lock().is_write_locked_by_current_thread() {
                    return Err(Control::NeedsWriteLock);
                }
                self.mounted.store(true, Ordering::SeqCst);
            }
            Ok(None)
        }

        fn read_dir(&self, _: &EntryName) -> Flow<Vec<DirEntry>> {
            assert!(self.model.lock().is_read_locked_by_current_thread());
            Ok(Vec::new())
        }

        fn read_link(&self, _: &EntryName) -> Flow<PathBuf> {
            Self::unsupported()
        }

        fn mknod(&self, _: &EntryName, _: EntryType, _: MknodOptions) -> Flow<()> {
            assert!(self.model.lock().is_write_locked_by_current_thread());
            if self.writers_inside.fetch_add(1, Ordering::SeqCst) != 0 {
                self.overlap.store(true, Ordering::SeqCst);
            }
            thread::yield_now();
            self.writers_inside.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn symlink(&self, _: &EntryName, _: &Path, _: MknodOptions) -> Flow<()> {
            Self::unsupported()
        }

        fn unlink(&self, _: &EntryName) -> Flow<()> {
            Self::unsupported()
        }

        fn open_read(&self, _: &EntryName) -> Flow<EntryReader> {
            Self::unsupported()
        }

        fn open_write(&self, _: &EntryName, _: WriteOptions) -> Flow<EntryWriter> {
            Self::unsupported()
        }

        fn sync(&self, _: SyncOptions) -> Flow<()> {
            Ok(())
        }
    }

    #[test]
    fn read_operation_runs_under_read_lock() {
        let chain = Probe::new().layer(LockLayer::default());
        chain.read_dir(&EntryName::root()).unwrap();
        assert!(!chain.model().lock().is_read_locked_by_current_thread());
    }

    #[test]
    fn needs_write_lock_reenters_under_write_lock() {
        let chain = Probe::new().layer(LockLayer::default());
        assert!(chain.node(&EntryName::root()).unwrap().is_none());
        // first attempt under read lock, second under write lock
        assert_eq!(chain.inner.calls.load(Ordering::SeqCst), 2);
        assert!(!chain.model().lock().is_write_locked());

        chain.node(&EntryName::root()).unwrap();
        assert_eq!(chain.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn write_under_own_read_lock_signals() {
        let chain = Probe::new().layer(LockLayer::default());
        let _read = chain.model().lock().read();
        let result = chain.mknod(&EntryName::root(), EntryType::File, MknodOptions::NONE);
        assert!(matches!(result, Err(Control::NeedsWriteLock)));
    }

    #[test]
    fn nested_contention_signals_lock_retry() {
        let chain = Arc::new(Probe::new().layer(LockLayer::default()));
        let other = Model::new(MountPoint::host(), None);

        let blocker = {
            let chain = Arc::clone(&chain);
            let (tx, rx) = std::sync::mpsc::channel();
            let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
            let handle = thread::spawn(move || {
                let _w = chain.model().lock().write().unwrap();
                tx.send(()).unwrap();
                done_rx.recv().unwrap();
            });
            rx.recv().unwrap();
            (handle, done_tx)
        };

        {
            // holding another model's lock turns blocking into try-lock
            let _held = other.lock().write().unwrap();
            let result = chain.mknod(&EntryName::root(), EntryType::File, MknodOptions::NONE);
            assert!(matches!(result, Err(Control::NeedsLockRetry)));
        }

        blocker.1.send(()).unwrap();
        blocker.0.join().unwrap();
        chain
            .mknod(&EntryName::root(), EntryType::File, MknodOptions::NONE)
            .unwrap();
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let chain = Arc::new(Probe::new().layer(LockLayer::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let chain = Arc::clone(&chain);
                thread::spawn(move || {
                    for _ in 0..200 {
                        chain
                            .mknod(&EntryName::root(), EntryType::File, MknodOptions::NONE)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!chain.inner.overlap.load(Ordering::SeqCst));
    }
}
