//! Reported failures of the federated file system kernel.

use crate::{EntryName, MountPoint, SyncError};

/// Filesystem error type with contextual variants.
///
/// These are the *reported* failures: the only errors a caller of
/// [`FsView`](crate::FsView) ever observes. Internal control signals travel
/// separately as [`Control`](crate::Control) and never become an `FsError`
/// unless a layer forgot to catch one (see [`FsError::Internal`]).
///
/// # Examples
///
/// ```rust
/// use fedfs_kernel::{EntryName, FsError};
///
/// let err = FsError::NotFound { name: EntryName::new("a/b").unwrap() };
/// assert_eq!(err.to_string(), "not found: a/b");
/// ```
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    // Entry Errors
    /// Entry does not exist.
    #[error("not found: {name}")]
    NotFound {
        /// The entry that was not found.
        name: EntryName,
    },

    /// Entry already exists when it shouldn't.
    #[error("{operation}: already exists: {name}")]
    AlreadyExists {
        /// The entry that already exists.
        name: EntryName,
        /// The operation that failed.
        operation: &'static str,
    },

    /// Expected a file but found something else.
    #[error("not a file: {name}")]
    NotAFile {
        /// The entry that is not a file.
        name: EntryName,
    },

    /// Expected a directory but found something else.
    #[error("not a directory: {name}")]
    NotADirectory {
        /// The entry that is not a directory.
        name: EntryName,
    },

    /// Expected a symbolic link but found something else.
    #[error("not a symlink: {name}")]
    NotASymlink {
        /// The entry that is not a symbolic link.
        name: EntryName,
    },

    /// Directory is not empty when it should be.
    #[error("directory not empty: {name}")]
    DirectoryNotEmpty {
        /// The non-empty directory.
        name: EntryName,
    },

    /// An entry name could not be parsed.
    #[error("invalid entry name: {name:?} ({reason})")]
    InvalidName {
        /// The rejected input.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A scheme could not be parsed.
    #[error("invalid scheme: {scheme:?}")]
    InvalidScheme {
        /// The rejected input.
        scheme: String,
    },

    /// No archive driver is registered for a scheme.
    #[error("no driver for scheme {scheme} (mount point {mount_point})")]
    NoDriver {
        /// The scheme without driver.
        scheme: String,
        /// The mount point that was requested.
        mount_point: MountPoint,
    },

    // Data Errors
    /// Invalid container data, typically a failed format probe.
    #[error("invalid data: {mount_point} ({details})")]
    InvalidData {
        /// The mount point whose container was rejected.
        mount_point: MountPoint,
        /// Details about the invalid data.
        details: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// I/O error with context.
    #[error("{operation} failed for {name}: {source}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The entry involved in the operation.
        name: EntryName,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // Resource Errors
    /// Streams opened by the calling thread prevent a sync.
    #[error("{mount_point}: thread-local resources busy ({local} open)")]
    ThreadLocalBusy {
        /// The mount point that could not be synced.
        mount_point: MountPoint,
        /// Number of streams the calling thread holds open.
        local: usize,
    },

    /// Streams opened by other threads prevent a sync.
    #[error("{mount_point}: resources busy ({local} local, {total} total open)")]
    GlobalBusy {
        /// The mount point that could not be synced.
        mount_point: MountPoint,
        /// Number of streams the calling thread holds open.
        local: usize,
        /// Number of streams all threads hold open.
        total: usize,
    },

    /// A stream was closed on behalf of its owner to let a sync proceed.
    #[error("{mount_point}: forcibly closed stream for {name}")]
    ForciblyClosed {
        /// The mount point that was synced.
        mount_point: MountPoint,
        /// The entry the stream was open on.
        name: EntryName,
    },

    // Sync Errors
    /// One or more failures collected during a sync.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// An internal control signal escaped the controller chain.
    #[error("internal error: uncaught {signal} signal")]
    Internal {
        /// The signal name.
        signal: &'static str,
    },
}

impl FsError {
    /// Returns `true` if retrying after closing streams can succeed.
    ///
    /// Busy failures are always recoverable. A sync aggregate is recoverable
    /// when every one of its causes is.
    pub fn is_recoverable(&self) -> bool {
        match self {
            FsError::ThreadLocalBusy { .. } | FsError::GlobalBusy { .. } => true,
            FsError::Sync(err) => err.causes().all(FsError::is_recoverable),
            _ => false,
        }
    }

    /// Returns `true` for busy failures.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            FsError::ThreadLocalBusy { .. } | FsError::GlobalBusy { .. }
        )
    }

    /// Wraps an I/O error with operation context.
    pub(crate) fn io(operation: &'static str, name: &EntryName, source: std::io::Error) -> Self {
        FsError::Io {
            operation,
            name: name.clone(),
            source,
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound {
                name: EntryName::root(),
            },
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists {
                name: EntryName::root(),
                operation: "io",
            },
            _ => FsError::Io {
                operation: "io",
                name: EntryName::root(),
                source: error,
            },
        }
    }
}
