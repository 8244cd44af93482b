//! # Manager
//!
//! Registry of the controller chains of all mount points.
//!
//! ## Overview
//!
//! The [`Manager`] creates one chain per mount point on first request,
//! parents first, and keeps it until a sync with `clear_cache` finds it clean
//! and unused:
//!
//! ```text
//! Manager ──▶ controller(zip:/a.zip/b.zip)
//!               │
//!               ├─▶ controller(zip:/a.zip)   (parent, created first)
//!               │     └─▶ host
//!               └─▶ FalsePositive ─▶ Lock ─▶ Sync ─▶ Resource ─▶ Archive
//! ```
//!
//! [`Manager::sync`] visits every chain children first, so a nested archive is
//! written into its parent before the parent itself is written.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::archive::{ArchiveController, DriverLookup};
use crate::{
    Controller, FalsePositiveLayer, FsError, FsView, LayerExt, LockLayer, ManagerConfig, Model,
    MountPoint, ResourceLayer, SyncError, SyncErrorBuilder, SyncLayer, SyncOptions,
};

type Registry = HashMap<MountPoint, Arc<dyn Controller>>;

/// Registry of controller chains keyed by mount point.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use fedfs_kernel::{Drivers, Manager, MemoryStore, SyncOptions};
///
/// let manager = Manager::new(Arc::new(MemoryStore::new()), Arc::new(Drivers::new()));
/// let host = manager.host_view();
/// host.create_dir(&"docs".parse().unwrap()).unwrap();
/// assert!(manager.sync(SyncOptions::UMOUNT).is_ok());
/// ```
pub struct Manager {
    host: Arc<dyn Controller>,
    drivers: Arc<dyn DriverLookup>,
    config: ManagerConfig,
    controllers: Mutex<Registry>,
}

impl Manager {
    /// Create a manager with the default configuration.
    ///
    /// `host` serves the host root mount point and is the parent of every
    /// top-level archive.
    pub fn new(host: Arc<dyn Controller>, drivers: Arc<dyn DriverLookup>) -> Self {
        Self::with_config(host, drivers, ManagerConfig::default())
    }

    /// Create a manager with an explicit configuration.
    pub fn with_config(
        host: Arc<dyn Controller>,
        drivers: Arc<dyn DriverLookup>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            host,
            drivers,
            config,
            controllers: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration this manager builds chains with.
    #[inline]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The chain for `mount_point`, created on first request.
    ///
    /// # Errors
    ///
    /// - [`FsError::NoDriver`] if no driver is registered for the scheme of
    ///   the mount point or one of its ancestors
    pub fn controller(&self, mount_point: &MountPoint) -> Result<Arc<dyn Controller>, FsError> {
        let mut controllers = self.controllers.lock();
        self.get_or_create(&mut controllers, mount_point)
    }

    fn get_or_create(
        &self,
        controllers: &mut Registry,
        mount_point: &MountPoint,
    ) -> Result<Arc<dyn Controller>, FsError> {
        let Some(parent_mount_point) = mount_point.parent() else {
            return Ok(Arc::clone(&self.host));
        };
        if let Some(controller) = controllers.get(mount_point) {
            return Ok(Arc::clone(controller));
        }

        let parent = self.get_or_create(controllers, parent_mount_point)?;
        let driver = self
            .drivers
            .driver(mount_point.scheme())
            .ok_or_else(|| FsError::NoDriver {
                scheme: mount_point.scheme().to_string(),
                mount_point: mount_point.clone(),
            })?;
        let model = Arc::new(Model::new(
            mount_point.clone(),
            Some(Arc::clone(parent.model())),
        ));

        let controller: Arc<dyn Controller> = Arc::new(
            ArchiveController::new(model, Arc::clone(&parent), driver)
                .layer(ResourceLayer::new())
                .layer(SyncLayer::new())
                .layer(LockLayer::new(self.config.lock))
                .layer(FalsePositiveLayer::new(parent)),
        );
        tracing::debug!(%mount_point, "created controller chain");
        controllers.insert(mount_point.clone(), Arc::clone(&controller));
        Ok(controller)
    }

    /// A view of `mount_point`.
    ///
    /// # Errors
    ///
    /// See [`Manager::controller`].
    pub fn view(&self, mount_point: &MountPoint) -> Result<FsView, FsError> {
        self.controller(mount_point).map(FsView::new)
    }

    /// A view of the host root.
    pub fn host_view(&self) -> FsView {
        FsView::new(Arc::clone(&self.host))
    }

    /// Number of registered archive chains.
    pub fn size(&self) -> usize {
        self.controllers.lock().len()
    }

    /// Sync every registered chain, children before parents.
    ///
    /// Failures do not stop the sweep; all of them are collected into one
    /// [`SyncError`]. With [`SyncOptions::clear_cache`], chains that synced
    /// without a fatal failure, hold no unflushed changes and are referenced by
    /// nothing but the registry are removed from it.
    ///
    /// # Errors
    ///
    /// The aggregate of all failures. It may have only
    /// [`Priority::Warning`](crate::Priority::Warning) causes. Forced-close
    /// warnings leave their chain synced; busy warnings mean that chain was
    /// skipped and still holds its changes. [`SyncError::is_complete`] tells
    /// the two apart.
    pub fn sync(&self, options: SyncOptions) -> Result<(), SyncError> {
        let mut snapshot: Vec<(MountPoint, Arc<dyn Controller>)> = self
            .controllers
            .lock()
            .iter()
            .map(|(mp, c)| (mp.clone(), Arc::clone(c)))
            .collect();
        snapshot.sort_by(|(a, _), (b, _)| {
            b.depth()
                .cmp(&a.depth())
                .then_with(|| a.path().cmp(b.path()))
        });

        let mut builder = SyncErrorBuilder::new();
        let mut clean = Vec::with_capacity(snapshot.len());
        for (mount_point, controller) in &snapshot {
            match crate::settle(controller.sync(options)) {
                Ok(()) => clean.push(mount_point.clone()),
                Err(FsError::Sync(err)) if err.is_warning() => {
                    tracing::warn!(%mount_point, error = %err, "sync completed with warnings");
                    builder.extend(err);
                    clean.push(mount_point.clone());
                }
                Err(err) => {
                    tracing::debug!(%mount_point, error = %err, "sync failed");
                    builder.add(err);
                }
            }
        }
        let outcome = builder.check();
        drop(snapshot);

        if options.clear_cache {
            let mut controllers = self.controllers.lock();
            for mount_point in clean {
                let removable = controllers.get(&mount_point).is_some_and(|c| {
                    !c.model().is_touched() && Arc::strong_count(c) == 1
                });
                if removable {
                    controllers.remove(&mount_point);
                    tracing::debug!(%mount_point, "removed controller chain");
                }
            }
        }
        outcome
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut mount_points: Vec<String> = self
            .controllers
            .lock()
            .keys()
            .map(MountPoint::to_string)
            .collect();
        mount_points.sort_unstable();
        f.debug_struct("Manager")
            .field("config", &self.config)
            .field("mount_points", &mount_points)
            .finish()
    }
}

/// A [`Manager`] that unmounts everything when dropped.
///
/// Dropping runs [`Manager::sync`] with [`SyncOptions::UMOUNT`]; failures are
/// logged since there is no caller left to report them to.
#[derive(Debug)]
pub struct FailSafeManager {
    manager: Manager,
}

impl FailSafeManager {
    /// Wrap a manager.
    pub fn new(manager: Manager) -> Self {
        Self { manager }
    }
}

impl Deref for FailSafeManager {
    type Target = Manager;

    fn deref(&self) -> &Manager {
        &self.manager
    }
}

impl Drop for FailSafeManager {
    fn drop(&mut self) {
        if let Err(err) = self.manager.sync(SyncOptions::UMOUNT) {
            if err.is_complete() {
                tracing::warn!(error = %err, "unmount on shutdown completed with warnings");
            } else if err.is_warning() {
                tracing::error!(error = %err, "unmount on shutdown skipped busy mount points, changes were not written");
            } else {
                tracing::error!(error = %err, "unmount on shutdown failed, changes may be lost");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveDriver, ArchiveEntry, Drivers};
    use crate::{EntryName, MemoryStore, Scheme};

    /// Stores nothing; every container decodes to an empty archive.
    struct Blank;

    impl ArchiveDriver for Blank {
        fn read_container(&self, _: &[u8]) -> Result<Vec<ArchiveEntry>, FsError> {
            Ok(Vec::new())
        }

        fn write_container(&self, _: &[ArchiveEntry]) -> Result<Vec<u8>, FsError> {
            Ok(b"blank".to_vec())
        }
    }

    fn name(s: &str) -> EntryName {
        EntryName::new(s).unwrap()
    }

    fn manager() -> Manager {
        let drivers = Drivers::new().with(Scheme::new("blank").unwrap(), Arc::new(Blank));
        Manager::new(Arc::new(MemoryStore::new()), Arc::new(drivers))
    }

    fn mount(parent: &MountPoint, entry: &str) -> MountPoint {
        MountPoint::new(Scheme::new("blank").unwrap(), parent, &name(entry))
    }

    #[test]
    fn host_root_is_not_registered() {
        let manager = manager();
        let host = manager.controller(&MountPoint::host()).unwrap();
        assert!(host.model().mount_point().parent().is_none());
        assert_eq!(manager.size(), 0);
    }

    #[test]
    fn parents_are_created_first() {
        let manager = manager();
        let outer = mount(&MountPoint::host(), "a.blank");
        let inner = mount(&outer, "b.blank");
        let controller = manager.controller(&inner).unwrap();
        assert_eq!(manager.size(), 2);
        let parent_model = controller.model().parent().unwrap();
        assert_eq!(parent_model.mount_point(), &outer);

        let again = manager.controller(&inner).unwrap();
        assert!(Arc::ptr_eq(&controller, &again));
    }

    #[test]
    fn unknown_scheme_is_no_driver() {
        let manager = manager();
        let mp = MountPoint::new(
            Scheme::new("rar").unwrap(),
            &MountPoint::host(),
            &name("a.rar"),
        );
        assert!(matches!(
            manager.controller(&mp),
            Err(FsError::NoDriver { .. })
        ));
        assert_eq!(manager.size(), 0);
    }

    #[test]
    fn umount_removes_unused_chains_children_first() {
        let manager = manager();
        let outer = mount(&MountPoint::host(), "a.blank");
        let inner = mount(&outer, "b.blank");
        manager.controller(&inner).unwrap();
        manager.sync(SyncOptions::UMOUNT).unwrap();
        assert_eq!(manager.size(), 0);
    }

    #[test]
    fn chains_in_use_are_kept() {
        let manager = manager();
        let mp = mount(&MountPoint::host(), "a.blank");
        let view = manager.view(&mp).unwrap();
        manager.sync(SyncOptions::UMOUNT).unwrap();
        assert_eq!(manager.size(), 1);
        drop(view);
        manager.sync(SyncOptions::UMOUNT).unwrap();
        assert_eq!(manager.size(), 0);
    }

    #[test]
    fn sync_without_clear_cache_keeps_chains() {
        let manager = manager();
        manager
            .controller(&mount(&MountPoint::host(), "a.blank"))
            .unwrap();
        manager.sync(SyncOptions::NONE).unwrap();
        assert_eq!(manager.size(), 1);
    }

    #[test]
    fn fail_safe_manager_unmounts_on_drop() {
        let host = Arc::new(MemoryStore::new());
        let drivers = Drivers::new().with(Scheme::new("blank").unwrap(), Arc::new(Blank));
        let parent: Arc<dyn Controller> = host.clone();
        {
            let manager = FailSafeManager::new(Manager::new(parent, Arc::new(drivers)));
            let view = manager
                .view(&mount(&MountPoint::host(), "a.blank"))
                .unwrap();
            view.create_file(&name("f")).unwrap();
        }
        assert!(host.node(&name("a.blank")).unwrap().is_some());
    }
}
