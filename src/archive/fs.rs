//! In-memory entry table of a mounted archive.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::archive::ArchiveEntry;
use crate::archive::ops::{Mknod, Unlink};
use crate::{DirEntry, EntryName, EntryType, FsError, MknodOptions, Model, Node};

static NEXT_TABLE: AtomicU64 = AtomicU64::new(0);

/// Index of an entry in an [`ArchiveFileSystem`].
///
/// Ids are never reused within one table, so a stale id resolves to nothing
/// rather than to some other entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

impl EntryId {
    /// The root directory.
    pub const ROOT: EntryId = EntryId(0);
}

/// One typed view of a covariant entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum View {
    File { size: u64, modified: SystemTime },
    Directory { modified: SystemTime },
    Symlink { target: PathBuf, modified: SystemTime },
}

impl View {
    pub(crate) fn empty(entry_type: EntryType, modified: SystemTime) -> Self {
        match entry_type {
            EntryType::File => View::File { size: 0, modified },
            EntryType::Directory => View::Directory { modified },
            EntryType::Symlink => View::Symlink {
                target: PathBuf::new(),
                modified,
            },
        }
    }

    pub(crate) fn entry_type(&self) -> EntryType {
        match self {
            View::File { .. } => EntryType::File,
            View::Directory { .. } => EntryType::Directory,
            View::Symlink { .. } => EntryType::Symlink,
        }
    }

    fn modified(&self) -> SystemTime {
        match self {
            View::File { modified, .. }
            | View::Directory { modified }
            | View::Symlink { modified, .. } => *modified,
        }
    }

    fn from_entry(entry: &ArchiveEntry) -> Self {
        let modified = entry.modified;
        match entry.entry_type {
            EntryType::File => View::File {
                size: entry.data.len() as u64,
                modified,
            },
            EntryType::Directory => View::Directory { modified },
            EntryType::Symlink => View::Symlink {
                target: entry.link_target.clone().unwrap_or_default(),
                modified,
            },
        }
    }
}

/// A named node holding independent views per entry type.
#[derive(Debug, Clone)]
pub(crate) struct CovariantEntry {
    name: EntryName,
    views: BTreeMap<EntryType, View>,
    key: EntryType,
    members: BTreeSet<String>,
}

impl CovariantEntry {
    pub(crate) fn new(name: EntryName, view: View) -> Self {
        let key = view.entry_type();
        Self {
            name,
            views: BTreeMap::from([(key, view)]),
            key,
            members: BTreeSet::new(),
        }
    }

    pub(crate) fn name(&self) -> &EntryName {
        &self.name
    }

    pub(crate) fn is_type(&self, entry_type: EntryType) -> bool {
        self.views.contains_key(&entry_type)
    }

    pub(crate) fn has_members(&self) -> bool {
        !self.members.is_empty()
    }

    /// Install a view; it becomes the primary one.
    pub(crate) fn install(&mut self, view: View) {
        self.key = view.entry_type();
        self.views.insert(self.key, view);
    }

    pub(crate) fn add_member(&mut self, member: &str) {
        self.members.insert(member.to_owned());
    }

    pub(crate) fn remove_member(&mut self, member: &str) {
        self.members.remove(member);
    }

    fn size(&self) -> u64 {
        match self.views.get(&EntryType::File) {
            Some(View::File { size, .. }) => *size,
            _ => 0,
        }
    }

    fn node(&self) -> Node {
        let link_target = match self.views.get(&EntryType::Symlink) {
            Some(View::Symlink { target, .. }) => Some(target.clone()),
            _ => None,
        };
        Node {
            name: self.name.clone(),
            entry_type: self.key,
            types: self.views.keys().copied().collect(),
            size: self.size(),
            modified: self
                .views
                .get(&self.key)
                .map_or(SystemTime::UNIX_EPOCH, View::modified),
            link_target,
        }
    }
}

/// Entry table of a mounted archive.
///
/// Mutations are staged as [`Mknod`] and [`Unlink`] operations that are built
/// against a shared borrow and committed against an exclusive one. Committing
/// marks the model touched. Callers must hold the model's write lock while
/// committing.
#[derive(Debug)]
pub struct ArchiveFileSystem {
    model: Arc<Model>,
    table: u64,
    slots: Vec<Option<CovariantEntry>>,
    index: HashMap<EntryName, EntryId>,
}

impl ArchiveFileSystem {
    /// An empty archive holding only its root directory.
    pub fn new(model: Arc<Model>) -> Self {
        let root = CovariantEntry::new(
            EntryName::root(),
            View::Directory {
                modified: SystemTime::now(),
            },
        );
        Self {
            model,
            table: NEXT_TABLE.fetch_add(1, Ordering::Relaxed),
            slots: vec![Some(root)],
            index: HashMap::from([(EntryName::root(), EntryId::ROOT)]),
        }
    }

    /// Build the table from decoded container entries.
    ///
    /// Parent directories the container does not list explicitly are added.
    /// The model is not marked touched.
    pub fn from_entries<'a>(
        model: Arc<Model>,
        entries: impl IntoIterator<Item = &'a ArchiveEntry>,
    ) -> Self {
        let mut fs = Self::new(model);
        for entry in entries {
            let view = View::from_entry(entry);
            if entry.name.is_root() {
                if let (true, Some(root)) = (
                    entry.entry_type == EntryType::Directory,
                    fs.get_mut(EntryId::ROOT),
                ) {
                    root.install(view);
                }
                continue;
            }
            let parent = fs.ghost_parents(&entry.name, entry.modified);
            match fs.id(&entry.name).and_then(|id| fs.get_mut(id)) {
                Some(existing) => existing.install(view),
                None => {
                    fs.insert(CovariantEntry::new(entry.name.clone(), view), parent);
                }
            }
        }
        fs
    }

    /// Ensure every ancestor of `name` has a directory view.
    fn ghost_parents(&mut self, name: &EntryName, modified: SystemTime) -> EntryId {
        let Some(parent) = name.parent() else {
            return EntryId::ROOT;
        };
        match self.id(&parent) {
            Some(id) => {
                if let Some(entry) = self.get_mut(id) {
                    if !entry.is_type(EntryType::Directory) {
                        entry.install(View::Directory { modified });
                    }
                }
                id
            }
            None => {
                let grand = self.ghost_parents(&parent, modified);
                self.insert(
                    CovariantEntry::new(parent, View::Directory { modified }),
                    grand,
                )
            }
        }
    }

    /// The model this table belongs to.
    #[inline]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Number of entries, including the root.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the root directory has no members.
    pub fn is_empty(&self) -> bool {
        self.get(EntryId::ROOT).is_none_or(|root| !root.has_members())
    }

    /// Look up an entry.
    pub fn node(&self, name: &EntryName) -> Option<Node> {
        self.lookup(name).map(CovariantEntry::node)
    }

    /// List a directory.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the entry does not exist
    /// - [`FsError::NotADirectory`] if it has no directory view
    pub fn read_dir(&self, name: &EntryName) -> Result<Vec<DirEntry>, FsError> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| FsError::NotFound { name: name.clone() })?;
        if !entry.is_type(EntryType::Directory) {
            return Err(FsError::NotADirectory { name: name.clone() });
        }
        Ok(entry
            .members
            .iter()
            .filter_map(|member| self.lookup(&name.child(member)))
            .map(|child| DirEntry {
                name: child.name.base_name().to_owned(),
                entry_type: child.key,
                size: child.size(),
            })
            .collect())
    }

    /// Read the target of a symbolic link.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the entry does not exist
    /// - [`FsError::NotASymlink`] if it has no symlink view
    pub fn read_link(&self, name: &EntryName) -> Result<PathBuf, FsError> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| FsError::NotFound { name: name.clone() })?;
        match entry.views.get(&EntryType::Symlink) {
            Some(View::Symlink { target, .. }) => Ok(target.clone()),
            _ => Err(FsError::NotASymlink { name: name.clone() }),
        }
    }

    /// Stage the creation of a file or directory.
    ///
    /// # Errors
    ///
    /// See [`Mknod`].
    pub fn mknod(
        &self,
        name: &EntryName,
        entry_type: EntryType,
        options: MknodOptions,
    ) -> Result<Mknod, FsError> {
        Mknod::new(self, name, View::empty(entry_type, SystemTime::now()), options)
    }

    /// Stage the creation of a symbolic link.
    ///
    /// # Errors
    ///
    /// See [`Mknod`].
    pub fn symlink(
        &self,
        name: &EntryName,
        target: &Path,
        options: MknodOptions,
    ) -> Result<Mknod, FsError> {
        let view = View::Symlink {
            target: target.to_path_buf(),
            modified: SystemTime::now(),
        };
        Mknod::new(self, name, view, options)
    }

    /// Stage the removal of an entry.
    ///
    /// # Errors
    ///
    /// See [`Unlink`].
    pub fn unlink(&self, name: &EntryName) -> Result<Unlink, FsError> {
        Unlink::new(self, name)
    }

    /// Record new content of a file entry and mark the model touched.
    ///
    /// Returns `false` if the entry no longer has a file view.
    pub(crate) fn set_file(&mut self, name: &EntryName, size: u64, modified: SystemTime) -> bool {
        let Some(entry) = self.id(name).and_then(|id| self.get_mut(id)) else {
            return false;
        };
        if !entry.is_type(EntryType::File) {
            return false;
        }
        entry.install(View::File { size, modified });
        self.model.set_touched(true);
        true
    }

    /// Every entry except the root as driver entries, in insertion order.
    ///
    /// `data` supplies the content of each file entry.
    pub fn export(&self, mut data: impl FnMut(&EntryName) -> Vec<u8>) -> Vec<ArchiveEntry> {
        let mut entries = Vec::with_capacity(self.len());
        for entry in self.slots.iter().skip(1).flatten() {
            for view in entry.views.values() {
                let (content, link_target) = match view {
                    View::File { .. } => (data(&entry.name), None),
                    View::Symlink { target, .. } => (Vec::new(), Some(target.clone())),
                    View::Directory { .. } => (Vec::new(), None),
                };
                entries.push(ArchiveEntry {
                    name: entry.name.clone(),
                    entry_type: view.entry_type(),
                    modified: view.modified(),
                    data: content,
                    link_target,
                });
            }
        }
        entries
    }

    pub(crate) fn table(&self) -> u64 {
        self.table
    }

    pub(crate) fn id(&self, name: &EntryName) -> Option<EntryId> {
        self.index.get(name).copied()
    }

    pub(crate) fn get(&self, id: EntryId) -> Option<&CovariantEntry> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: EntryId) -> Option<&mut CovariantEntry> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    fn lookup(&self, name: &EntryName) -> Option<&CovariantEntry> {
        self.id(name).and_then(|id| self.get(id))
    }

    /// Add an entry and register it with its parent.
    pub(crate) fn insert(&mut self, entry: CovariantEntry, parent: EntryId) -> EntryId {
        let id = EntryId(self.slots.len());
        if let Some(parent) = self.get_mut(parent) {
            parent.add_member(entry.name.base_name());
        }
        self.index.insert(entry.name.clone(), id);
        self.slots.push(Some(entry));
        id
    }

    /// Drop an entry and unregister it from its parent.
    pub(crate) fn remove(&mut self, id: EntryId, parent: EntryId) {
        let Some(entry) = self.slots.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        self.index.remove(&entry.name);
        if let Some(parent) = self.get_mut(parent) {
            parent.remove_member(entry.name.base_name());
        }
    }
}
