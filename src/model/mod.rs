//! Per-mount-point state holder.

pub mod lock;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::MountPoint;

pub use lock::{ModelLock, ReadGuard, WriteGuard};

/// State shared by every controller layer of one mount point.
///
/// Holds the mount point identity, the parent model, the `touched` flag and
/// the lock that serializes mutations of the mounted archive. The model is the
/// only shared mutable object per mount point.
///
/// # Example
///
/// ```rust
/// use fedfs_kernel::{Model, MountPoint};
///
/// let model = Model::new(MountPoint::host(), None);
/// assert!(!model.is_touched());
/// model.set_touched(true);
/// assert!(model.is_touched());
/// ```
#[derive(Debug)]
pub struct Model {
    mount_point: MountPoint,
    parent: Option<Arc<Model>>,
    touched: AtomicBool,
    lock: ModelLock,
}

impl Model {
    /// Create an untouched model.
    pub fn new(mount_point: MountPoint, parent: Option<Arc<Model>>) -> Self {
        Self {
            mount_point,
            parent,
            touched: AtomicBool::new(false),
            lock: ModelLock::new(),
        }
    }

    /// The mount point this model belongs to.
    #[inline]
    pub fn mount_point(&self) -> &MountPoint {
        &self.mount_point
    }

    /// The model of the parent file system.
    #[inline]
    pub fn parent(&self) -> Option<&Arc<Model>> {
        self.parent.as_ref()
    }

    /// Returns `true` if unflushed mutations exist.
    #[inline]
    pub fn is_touched(&self) -> bool {
        self.touched.load(Ordering::Acquire)
    }

    /// Record whether unflushed mutations exist.
    pub fn set_touched(&self, touched: bool) {
        let was = self.touched.swap(touched, Ordering::AcqRel);
        if was != touched {
            tracing::debug!(mount_point = %self.mount_point, touched, "model touched state changed");
        }
    }

    /// The lock serializing access to the mounted archive.
    #[inline]
    pub fn lock(&self) -> &ModelLock {
        &self.lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntryName, Scheme};

    #[test]
    fn parent_is_shared() {
        let host = Arc::new(Model::new(MountPoint::host(), None));
        let mp = MountPoint::new(
            Scheme::new("zip").unwrap(),
            host.mount_point(),
            &EntryName::new("a.zip").unwrap(),
        );
        let child = Model::new(mp, Some(Arc::clone(&host)));
        assert!(Arc::ptr_eq(child.parent().unwrap(), &host));
        assert_eq!(Arc::strong_count(&host), 2);
    }

    #[test]
    fn touched_round_trip() {
        let model = Model::new(MountPoint::host(), None);
        model.set_touched(true);
        model.set_touched(true);
        assert!(model.is_touched());
        model.set_touched(false);
        assert!(!model.is_touched());
    }

    #[test]
    fn model_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Model>();
    }
}
