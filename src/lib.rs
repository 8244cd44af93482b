//! # fedfs-kernel
//!
//! Controller chain kernel for **federated file systems**: trees in which
//! archive files (zip, tar, ...) are transparently mounted as directories,
//! possibly nested inside each other.
//!
//! This crate provides the machinery that keeps such a federation consistent
//! under concurrent access: a chain of decorators per mount point, an internal
//! control-signal protocol between them, and a registry that syncs nested
//! archives in the right order. Container formats plug in through
//! [`ArchiveDriver`].
//!
//! ---
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use fedfs_kernel::{
//!     ArchiveDriver, ArchiveEntry, Drivers, EntryName, FsError, FsViewExt, Manager,
//!     MemoryStore, MountPoint, Scheme, SyncOptions,
//! };
//!
//! /// A container format that keeps file names and nothing else.
//! struct Names;
//!
//! impl ArchiveDriver for Names {
//!     fn read_container(&self, bytes: &[u8]) -> Result<Vec<ArchiveEntry>, FsError> {
//!         let text = String::from_utf8_lossy(bytes);
//!         text.lines()
//!             .map(|line| EntryName::new(line).map(|name| ArchiveEntry::file(name, Vec::new())))
//!             .collect()
//!     }
//!
//!     fn write_container(&self, entries: &[ArchiveEntry]) -> Result<Vec<u8>, FsError> {
//!         let names: Vec<_> = entries.iter().map(|e| e.name.to_string()).collect();
//!         Ok(names.join("\n").into_bytes())
//!     }
//! }
//!
//! let scheme = Scheme::new("names").unwrap();
//! let drivers = Drivers::new().with(scheme.clone(), Arc::new(Names));
//! let manager = Manager::new(Arc::new(MemoryStore::new()), Arc::new(drivers));
//!
//! let archive = MountPoint::new(scheme, &MountPoint::host(), &EntryName::new("a.names").unwrap());
//! let view = manager.view(&archive).unwrap();
//! view.create_file(&EntryName::new("one").unwrap()).unwrap();
//! manager.sync(SyncOptions::UMOUNT).unwrap();
//!
//! let host = manager.host_view();
//! assert_eq!(host.read_bytes(&EntryName::new("a.names").unwrap()).unwrap(), b"one");
//! ```
//!
//! ---
//!
//! ## Core Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`FsView`] | Application entry point; returns plain [`FsError`]s |
//! | [`Manager`] | Registry of chains, ordered sync of all mount points |
//! | [`Controller`] | Chain contract implemented by every layer |
//! | [`Control`] | Internal signals travelling between layers |
//! | [`Model`] | Per-mount-point state: lock and `touched` flag |
//! | [`ArchiveFileSystem`] | Entry table of a mounted archive |
//! | [`SyncError`] | Priority-ordered aggregate of sync failures |
//!
//! ---
//!
//! ## Controller Chain
//!
//! ```text
//! FsView ─▶ FalsePositive ─▶ Lock ─▶ Sync ─▶ Resource ─▶ Archive ─▶ parent chain
//! ```
//!
//! | Signal | Raised when | Caught by |
//! |--------|-------------|-----------|
//! | [`Control::NeedsWriteLock`] | a mutation runs under a read lock | [`LockController`] |
//! | [`Control::NeedsLockRetry`] | a nested lock is contended | outermost [`LockController`] |
//! | [`Control::NeedsSync`] | an operation conflicts with unflushed data | [`SyncController`] |
//! | [`Control::FalsePositive`] | the mount point is not an archive | [`FalsePositiveController`] |
//!
//! ---
//!
//! ## Thread Safety
//!
//! Controllers take `&self` and are shared as `Arc<dyn Controller>`. Locks are
//! per mount point and always taken child before parent; a thread that would
//! have to wait for a nested lock backs off and retries instead.
//!
//! ---
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | Serialization for value types, [`ManagerConfig::from_json`], `FsViewExtJson` |

mod accountant;
mod archive;
mod config;
mod controller;
mod error;
mod ext;
mod layer;
mod manager;
mod model;
mod mount_point;
mod name;
mod store;
mod stream;
mod sync_error;
mod types;
mod view;

// Public re-exports - identity and state
pub use model::{Model, ModelLock, ReadGuard, WriteGuard};
pub use mount_point::{MountPoint, Scheme};
pub use name::EntryName;

// Public re-exports - error types
pub use error::FsError;
pub use sync_error::{Priority, SyncError, SyncErrorBuilder};

// Public re-exports - core types
pub use stream::{EntryReader, EntryWriter, ReadStream, WriteStream};
pub use types::{DirEntry, EntryType, MknodOptions, Node, SyncOptions, WriteOptions};

// Public re-exports - controller chain
pub use controller::{
    Control, Controller, FalsePositiveController, FalsePositiveLayer, Flow, LockController,
    LockLayer, ResourceController, ResourceLayer, SyncController, SyncLayer, settle,
};
pub use layer::{Layer, LayerExt};

// Public re-exports - archives
pub use archive::{
    ArchiveController, ArchiveDriver, ArchiveEntry, ArchiveFileSystem, DriverLookup, Drivers,
    EntryId, Mknod, Unlink,
};

// Public re-exports - infrastructure
pub use accountant::ResourceAccountant;
pub use config::{LockConfig, ManagerConfig};
pub use ext::FsViewExt;
pub use manager::{FailSafeManager, Manager};
pub use store::MemoryStore;
pub use view::FsView;

// Conditional re-exports
#[cfg(feature = "serde")]
pub use ext::FsViewExtJson;
