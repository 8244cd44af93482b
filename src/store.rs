//! Plain in-memory host file system.
//!
//! [`MemoryStore`] is the root parent of every top-level archive. It is not an
//! archive: it has no staged state, never raises control signals and its
//! `sync` is a no-op. Writers publish their content when closed.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::{
    Controller, DirEntry, EntryName, EntryReader, EntryType, EntryWriter, Flow, FsError,
    MknodOptions, Model, MountPoint, Node, SyncOptions, WriteOptions, WriteStream,
};

#[derive(Debug, Clone)]
enum Content {
    File(Arc<[u8]>),
    Directory,
    Symlink(PathBuf),
}

#[derive(Debug, Clone)]
struct Stored {
    content: Content,
    modified: SystemTime,
}

impl Stored {
    fn new(content: Content) -> Self {
        Self {
            content,
            modified: SystemTime::now(),
        }
    }

    fn entry_type(&self) -> EntryType {
        match self.content {
            Content::File(_) => EntryType::File,
            Content::Directory => EntryType::Directory,
            Content::Symlink(_) => EntryType::Symlink,
        }
    }

    fn size(&self) -> u64 {
        match &self.content {
            Content::File(data) => data.len() as u64,
            _ => 0,
        }
    }

    fn node(&self, name: &EntryName) -> Node {
        let entry_type = self.entry_type();
        Node {
            name: name.clone(),
            entry_type,
            types: vec![entry_type],
            size: self.size(),
            modified: self.modified,
            link_target: match &self.content {
                Content::Symlink(target) => Some(target.clone()),
                _ => None,
            },
        }
    }
}

type Entries = Arc<RwLock<BTreeMap<EntryName, Stored>>>;

/// Thread-safe in-memory file system serving the host mount point.
///
/// # Example
///
/// ```rust
/// use std::io::{Read, Write};
/// use fedfs_kernel::{Controller, EntryName, MemoryStore, WriteOptions};
///
/// let store = MemoryStore::new();
/// let name = EntryName::new("hello.txt").unwrap();
/// let mut writer = store.open_write(&name, WriteOptions::TRUNCATE).unwrap();
/// writer.write_all(b"hi").unwrap();
/// writer.close().unwrap();
///
/// let mut text = String::new();
/// store.open_read(&name).unwrap().read_to_string(&mut text).unwrap();
/// assert_eq!(text, "hi");
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    model: Arc<Model>,
    entries: Entries,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store holding only the root directory.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(EntryName::root(), Stored::new(Content::Directory));
        Self {
            model: Arc::new(Model::new(MountPoint::host(), None)),
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Number of entries, including the root.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if only the root directory exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }

    fn ensure_parent(
        entries: &mut BTreeMap<EntryName, Stored>,
        name: &EntryName,
        create_parents: bool,
    ) -> Result<(), FsError> {
        let Some(parent) = name.parent() else {
            return Ok(());
        };
        match entries.get(&parent) {
            Some(Stored {
                content: Content::Directory,
                ..
            }) => Ok(()),
            Some(_) => Err(FsError::NotADirectory { name: parent }),
            None if create_parents => {
                Self::ensure_parent(entries, &parent, true)?;
                entries.insert(parent, Stored::new(Content::Directory));
                Ok(())
            }
            None => Err(FsError::NotFound { name: parent }),
        }
    }

    fn create(&self, name: &EntryName, content: Content, options: MknodOptions) -> Flow<()> {
        let mut entries = self.entries.write();
        let already_exists = || FsError::AlreadyExists {
            name: name.clone(),
            operation: "mknod",
        };
        match (entries.get(name), &content) {
            (None, _) => {}
            (Some(Stored { content: Content::File(_), .. }), Content::File(_))
                if !options.exclusive => {}
            (Some(_), _) => return Err(already_exists().into()),
        }
        Self::ensure_parent(&mut entries, name, options.create_parents)?;
        entries.insert(name.clone(), Stored::new(content));
        Ok(())
    }
}

impl Controller for MemoryStore {
    fn model(&self) -> &Arc<Model> {
        &self.model
    }

    fn node(&self, name: &EntryName) -> Flow<Option<Node>> {
        Ok(self.entries.read().get(name).map(|s| s.node(name)))
    }

    fn read_dir(&self, name: &EntryName) -> Flow<Vec<DirEntry>> {
        let entries = self.entries.read();
        match entries.get(name) {
            None => return Err(FsError::NotFound { name: name.clone() }.into()),
            Some(Stored {
                content: Content::Directory,
                ..
            }) => {}
            Some(_) => return Err(FsError::NotADirectory { name: name.clone() }.into()),
        }
        Ok(entries
            .iter()
            .filter(|(child, _)| child.parent().as_ref() == Some(name))
            .map(|(child, stored)| DirEntry {
                name: child.base_name().to_owned(),
                entry_type: stored.entry_type(),
                size: stored.size(),
            })
            .collect())
    }

    fn read_link(&self, name: &EntryName) -> Flow<PathBuf> {
        match self.entries.read().get(name) {
            Some(Stored {
                content: Content::Symlink(target),
                ..
            }) => Ok(target.clone()),
            Some(_) => Err(FsError::NotASymlink { name: name.clone() }.into()),
            None => Err(FsError::NotFound { name: name.clone() }.into()),
        }
    }

    fn mknod(&self, name: &EntryName, entry_type: EntryType, options: MknodOptions) -> Flow<()> {
        let content = match entry_type {
            EntryType::File => Content::File(Arc::from(Vec::new())),
            EntryType::Directory => Content::Directory,
            EntryType::Symlink => Content::Symlink(PathBuf::new()),
        };
        self.create(name, content, options)
    }

    fn symlink(&self, name: &EntryName, target: &Path, options: MknodOptions) -> Flow<()> {
        self.create(name, Content::Symlink(target.to_path_buf()), options)
    }

    fn unlink(&self, name: &EntryName) -> Flow<()> {
        if name.is_root() {
            return Err(FsError::InvalidName {
                name: String::new(),
                reason: "the host root cannot be unlinked",
            }
            .into());
        }
        let mut entries = self.entries.write();
        if !entries.contains_key(name) {
            return Err(FsError::NotFound { name: name.clone() }.into());
        }
        if entries.keys().any(|k| k.parent().as_ref() == Some(name)) {
            return Err(FsError::DirectoryNotEmpty { name: name.clone() }.into());
        }
        entries.remove(name);
        Ok(())
    }

    fn open_read(&self, name: &EntryName) -> Flow<EntryReader> {
        match self.entries.read().get(name) {
            Some(Stored {
                content: Content::File(data),
                ..
            }) => Ok(EntryReader::new(name.clone(), Cursor::new(Arc::clone(data)))),
            Some(_) => Err(FsError::NotAFile { name: name.clone() }.into()),
            None => Err(FsError::NotFound { name: name.clone() }.into()),
        }
    }

    fn open_write(&self, name: &EntryName, options: WriteOptions) -> Flow<EntryWriter> {
        let mut entries = self.entries.write();
        let initial = match entries.get(name) {
            Some(Stored {
                content: Content::File(data),
                ..
            }) => {
                if options.append {
                    data.to_vec()
                } else {
                    Vec::new()
                }
            }
            Some(_) => return Err(FsError::NotAFile { name: name.clone() }.into()),
            None => {
                Self::ensure_parent(&mut entries, name, options.create_parents)?;
                entries.insert(name.clone(), Stored::new(Content::File(Arc::from(Vec::new()))));
                Vec::new()
            }
        };
        Ok(EntryWriter::new(
            name.clone(),
            StoreWriter {
                entries: Arc::clone(&self.entries),
                name: name.clone(),
                buf: initial,
                closed: false,
            },
        ))
    }

    fn sync(&self, _options: SyncOptions) -> Flow<()> {
        Ok(())
    }
}

struct StoreWriter {
    entries: Entries,
    name: EntryName,
    buf: Vec<u8>,
    closed: bool,
}

impl Write for StoreWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteStream for StoreWriter {
    fn close(&mut self) -> io::Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        let data = Arc::from(std::mem::take(&mut self.buf));
        let mut entries = self.entries.write();
        match entries.get_mut(&self.name) {
            Some(stored) if matches!(stored.content, Content::File(_)) => {
                *stored = Stored::new(Content::File(data));
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was removed while open", self.name),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn name(s: &str) -> EntryName {
        EntryName::new(s).unwrap()
    }

    fn write(store: &MemoryStore, n: &str, data: &[u8], options: WriteOptions) {
        let mut writer = store.open_write(&name(n), options).unwrap();
        writer.write_all(data).unwrap();
        writer.close().unwrap();
    }

    fn read(store: &MemoryStore, n: &str) -> Vec<u8> {
        let mut out = Vec::new();
        store.open_read(&name(n)).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn write_then_read() {
        let store = MemoryStore::new();
        write(&store, "a.txt", b"one", WriteOptions::TRUNCATE);
        assert_eq!(read(&store, "a.txt"), b"one");
        write(&store, "a.txt", b"two", WriteOptions::APPEND);
        assert_eq!(read(&store, "a.txt"), b"onetwo");
        assert_eq!(store.node(&name("a.txt")).unwrap().unwrap().size, 6);
    }

    #[test]
    fn content_is_published_on_close() {
        let store = MemoryStore::new();
        let mut writer = store.open_write(&name("f"), WriteOptions::TRUNCATE).unwrap();
        writer.write_all(b"pending").unwrap();
        assert_eq!(read(&store, "f"), b"");
        writer.close().unwrap();
        assert_eq!(read(&store, "f"), b"pending");
    }

    #[test]
    fn parents_are_required_unless_requested() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.open_write(&name("a/b/c"), WriteOptions::TRUNCATE),
            Err(crate::Control::Failed(FsError::NotFound { .. }))
        ));
        write(&store, "a/b/c", b"x", WriteOptions::CREATE_PARENTS);
        assert!(store.node(&name("a/b")).unwrap().unwrap().is_dir());
        let listing = store.read_dir(&name("a")).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "b");
    }

    #[test]
    fn mknod_rules() {
        let store = MemoryStore::new();
        store
            .mknod(&name("d"), EntryType::Directory, MknodOptions::NONE)
            .unwrap();
        assert!(store
            .mknod(&name("d"), EntryType::Directory, MknodOptions::NONE)
            .is_err());
        store
            .mknod(&name("f"), EntryType::File, MknodOptions::NONE)
            .unwrap();
        store
            .mknod(&name("f"), EntryType::File, MknodOptions::NONE)
            .unwrap();
        assert!(store
            .mknod(&name("f"), EntryType::File, MknodOptions::EXCLUSIVE)
            .is_err());
    }

    #[test]
    fn unlink_rules() {
        let store = MemoryStore::new();
        write(&store, "d/f", b"x", WriteOptions::CREATE_PARENTS);
        assert!(matches!(
            store.unlink(&name("d")),
            Err(crate::Control::Failed(FsError::DirectoryNotEmpty { .. }))
        ));
        store.unlink(&name("d/f")).unwrap();
        store.unlink(&name("d")).unwrap();
        assert!(store.is_empty());
        assert!(store.unlink(&EntryName::root()).is_err());
    }

    #[test]
    fn symlinks() {
        let store = MemoryStore::new();
        store
            .symlink(&name("l"), Path::new("target"), MknodOptions::NONE)
            .unwrap();
        assert_eq!(store.read_link(&name("l")).unwrap(), PathBuf::from("target"));
        assert!(store.node(&name("l")).unwrap().unwrap().is_symlink());
    }
}
