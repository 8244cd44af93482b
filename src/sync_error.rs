//! Aggregation of failures collected during a sync sweep.
//!
//! A sweep over nested mounts keeps going after individual failures, so the
//! outcome is a list of causes rather than a single error. [`SyncErrorBuilder`]
//! collects them and [`SyncErrorBuilder::check`] materializes them into one
//! [`SyncError`]: the highest priority cause is the primary one, the rest hang
//! off it as a predecessor chain in encounter order.

use std::fmt;

use crate::FsError;

/// Sort priority of a sync failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
    /// The cause is informational, or the sync can be retried later.
    ///
    /// See [`SyncError::is_complete`] to tell the two apart.
    Warning,
    /// Changes may have been lost.
    Fatal,
}

/// One or more failures of a sync, ordered by priority.
#[derive(Debug)]
pub struct SyncError {
    priority: Priority,
    cause: Box<FsError>,
    predecessor: Option<Box<SyncError>>,
}

impl SyncError {
    /// Priority of the primary cause.
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The primary cause.
    #[inline]
    pub fn cause(&self) -> &FsError {
        &self.cause
    }

    /// The next link of the chain.
    #[inline]
    pub fn predecessor(&self) -> Option<&SyncError> {
        self.predecessor.as_deref()
    }

    /// Iterate over all links, primary first.
    pub fn iter(&self) -> impl Iterator<Item = &SyncError> {
        std::iter::successors(Some(self), |e| e.predecessor())
    }

    /// Iterate over all causes, primary first.
    pub fn causes(&self) -> impl Iterator<Item = &FsError> {
        self.iter().map(SyncError::cause)
    }

    /// Number of causes in the chain.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Always `false`: a sync error holds at least one cause.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns `true` if no cause is fatal.
    pub fn is_warning(&self) -> bool {
        self.priority == Priority::Warning
    }

    /// Returns `true` if every chain reached its parent.
    ///
    /// Busy causes are warnings too, but a busy chain flushed nothing and is
    /// still touched. Only forced-close notes leave a sync complete.
    pub fn is_complete(&self) -> bool {
        self.is_warning() && !self.causes().any(FsError::is_busy)
    }

    fn into_entries(self) -> Vec<(Priority, FsError)> {
        let mut entries = Vec::new();
        let mut next = Some(self);
        while let Some(link) = next {
            entries.push((link.priority, *link.cause));
            next = link.predecessor.map(|b| *b);
        }
        entries
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.priority {
            Priority::Warning => "sync warning",
            Priority::Fatal => "sync failed",
        };
        write!(f, "{label}: {}", self.cause)?;
        let more = self.len() - 1;
        if more > 0 {
            write!(f, " (+{more} more)")?;
        }
        Ok(())
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}

/// Collects failures of a sync sweep.
///
/// # Example
///
/// ```rust
/// use fedfs_kernel::{EntryName, FsError, Priority, SyncErrorBuilder};
///
/// let mut builder = SyncErrorBuilder::new();
/// assert!(builder.is_empty());
/// builder.warn(FsError::NotFound { name: EntryName::new("w").unwrap() });
/// builder.fail(FsError::NotFound { name: EntryName::new("f").unwrap() });
///
/// let err = builder.check().unwrap_err();
/// assert_eq!(err.priority(), Priority::Fatal);
/// assert_eq!(err.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct SyncErrorBuilder {
    entries: Vec<(Priority, FsError)>,
}

impl SyncErrorBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a non-fatal failure.
    pub fn warn(&mut self, error: FsError) {
        self.entries.push((Priority::Warning, error));
    }

    /// Record a fatal failure.
    pub fn fail(&mut self, error: FsError) {
        self.entries.push((Priority::Fatal, error));
    }

    /// Record a failure, classifying it.
    ///
    /// Busy and forced-close failures are warnings; a nested [`SyncError`] is
    /// flattened with its priorities intact; everything else is fatal.
    pub fn add(&mut self, error: FsError) {
        match error {
            FsError::Sync(inner) => self.extend(inner),
            e @ (FsError::ThreadLocalBusy { .. }
            | FsError::GlobalBusy { .. }
            | FsError::ForciblyClosed { .. }) => self.warn(e),
            e => self.fail(e),
        }
    }

    /// Append every link of an existing chain, keeping its priorities.
    pub fn extend(&mut self, error: SyncError) {
        self.entries.extend(error.into_entries());
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Materialize the recorded failures.
    ///
    /// # Errors
    ///
    /// The composite [`SyncError`] if at least one failure was recorded.
    pub fn check(self) -> Result<(), SyncError> {
        let mut entries = self.entries;
        // stable: equal priorities keep encounter order
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        let mut chain: Option<SyncError> = None;
        for (priority, cause) in entries.into_iter().rev() {
            chain = Some(SyncError {
                priority,
                cause: Box::new(cause),
                predecessor: chain.map(Box::new),
            });
        }
        match chain {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
