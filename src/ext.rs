//! # Extension Traits
//!
//! Convenience methods on top of [`FsView`].
//!
//! ## Overview
//!
//! [`FsViewExt`] bundles the small compositions applications keep writing by
//! hand. It has a blanket implementation for everything that can be borrowed
//! as an [`FsView`].
//!
//! ## Available Methods
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`is_file`](FsViewExt::is_file) | Check if the entry has a file view |
//! | [`is_dir`](FsViewExt::is_dir) | Check if the entry has a directory view |
//! | [`read_bytes`](FsViewExt::read_bytes) | Read a whole file |
//! | [`write_bytes`](FsViewExt::write_bytes) | Replace a whole file |
//! | [`create_dir_all`](FsViewExt::create_dir_all) | Create a directory and its parents |
//!
//! ## JSON Support (Feature-Gated)
//!
//! With the `serde` feature enabled, additional methods are available:
//!
//! | Method | Description |
//! |--------|-------------|
//! | `read_json` | Read and deserialize a JSON file |
//! | `write_json` | Serialize and write a JSON file |

use std::io::{Read, Write};

use crate::{EntryName, EntryType, FsError, FsView, MknodOptions, WriteOptions};

/// Extension methods for any [`FsView`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use fedfs_kernel::{EntryName, FsError, FsView, FsViewExt, MemoryStore};
///
/// fn save(view: &FsView) -> Result<(), FsError> {
///     view.create_dir_all(&EntryName::new("out/logs")?)?;
///     view.write_bytes(&EntryName::new("out/logs/run.txt")?, b"ok")?;
///     Ok(())
/// }
///
/// let view = FsView::new(Arc::new(MemoryStore::new()));
/// save(&view).unwrap();
/// assert!(view.is_file(&EntryName::new("out/logs/run.txt").unwrap()).unwrap());
/// ```
pub trait FsViewExt: AsRef<FsView> {
    /// Check if the entry has a file view.
    ///
    /// Returns `Ok(false)` if the entry doesn't exist.
    fn is_file(&self, name: &EntryName) -> Result<bool, FsError> {
        Ok(self.as_ref().node(name)?.is_some_and(|n| n.is_file()))
    }

    /// Check if the entry has a directory view.
    ///
    /// Returns `Ok(false)` if the entry doesn't exist.
    fn is_dir(&self, name: &EntryName) -> Result<bool, FsError> {
        Ok(self.as_ref().node(name)?.is_some_and(|n| n.is_dir()))
    }

    /// Read the entire content of a file.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the file doesn't exist
    /// - [`FsError::Io`] if reading fails
    fn read_bytes(&self, name: &EntryName) -> Result<Vec<u8>, FsError> {
        let mut reader = self.as_ref().open_read(name)?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| FsError::io("read", name, e))?;
        reader.close()?;
        Ok(data)
    }

    /// Replace the content of a file, creating it if needed.
    ///
    /// The data is committed when this returns `Ok`.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the parent directory doesn't exist
    /// - [`FsError::Io`] if writing or committing fails
    fn write_bytes(&self, name: &EntryName, data: &[u8]) -> Result<(), FsError> {
        let mut writer = self.as_ref().open_write(name, WriteOptions::TRUNCATE)?;
        writer
            .write_all(data)
            .map_err(|e| FsError::io("write", name, e))?;
        writer.close()
    }

    /// Create a directory and all missing parents.
    ///
    /// Succeeds if the directory already exists.
    ///
    /// # Errors
    ///
    /// - [`FsError::AlreadyExists`] if the entry exists without a directory view
    /// - [`FsError::NotADirectory`] if a parent is not a directory
    fn create_dir_all(&self, name: &EntryName) -> Result<(), FsError> {
        if self.is_dir(name)? {
            return Ok(());
        }
        self.as_ref()
            .mknod(name, EntryType::Directory, MknodOptions::CREATE_PARENTS)
    }
}

impl<T: AsRef<FsView> + ?Sized> FsViewExt for T {}

#[cfg(feature = "serde")]
mod json {
    use super::*;
    use serde::{Serialize, de::DeserializeOwned};

    /// JSON serialization extension methods.
    ///
    /// Available when the `serde` feature is enabled.
    pub trait FsViewExtJson: FsViewExt {
        /// Read a file and deserialize it as JSON.
        ///
        /// # Errors
        ///
        /// - [`FsError::NotFound`] if the file doesn't exist
        /// - [`FsError::Deserialization`] if JSON parsing failed
        fn read_json<T: DeserializeOwned>(&self, name: &EntryName) -> Result<T, FsError> {
            let data = self.read_bytes(name)?;
            serde_json::from_slice(&data).map_err(|e| FsError::Deserialization(e.to_string()))
        }

        /// Serialize a value and write it as pretty-printed JSON.
        ///
        /// # Errors
        ///
        /// - [`FsError::Serialization`] if serialization failed
        /// - other variants from [`FsViewExt::write_bytes`]
        fn write_json<T: Serialize>(&self, name: &EntryName, value: &T) -> Result<(), FsError> {
            let json = serde_json::to_vec_pretty(value)
                .map_err(|e| FsError::Serialization(e.to_string()))?;
            self.write_bytes(name, &json)
        }
    }

    impl<V: FsViewExt + ?Sized> FsViewExtJson for V {}
}

#[cfg(feature = "serde")]
pub use json::FsViewExtJson;
