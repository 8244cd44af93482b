//! Pending mutations of an [`ArchiveFileSystem`].
//!
//! Building an operation only reads the table. Committing consumes the
//! operation, validates every step against the current table and then
//! applies all of them; a failed commit leaves the table and the model's
//! touched flag as they were.

use crate::archive::fs::{ArchiveFileSystem, CovariantEntry, EntryId, View};
use crate::{EntryName, EntryType, FsError, MknodOptions};

#[derive(Debug)]
struct Link {
    name: EntryName,
    existing: Option<EntryId>,
    view: View,
}

/// Staged creation of an entry and its missing parent directories.
///
/// Links are ordered top-down: the top-most missing parent first, the target
/// entry last. Building fails with
///
/// - [`FsError::AlreadyExists`] if the target exists with another type, is a
///   directory or symlink, or is a file and the options are exclusive
/// - [`FsError::NotFound`] if a parent is missing without `create_parents`
/// - [`FsError::NotADirectory`] if the nearest existing parent is not a
///   directory
#[derive(Debug)]
#[must_use = "a pending operation does nothing until committed"]
pub struct Mknod {
    table: u64,
    anchor: EntryId,
    target: EntryName,
    links: Vec<Link>,
}

impl Mknod {
    pub(crate) fn new(
        fs: &ArchiveFileSystem,
        name: &EntryName,
        view: View,
        options: MknodOptions,
    ) -> Result<Self, FsError> {
        let already_exists = || FsError::AlreadyExists {
            name: name.clone(),
            operation: "mknod",
        };
        let entry_type = view.entry_type();

        if let Some(id) = fs.id(name) {
            let replaceable = entry_type == EntryType::File
                && !options.exclusive
                && fs.get(id).is_some_and(|e| e.is_type(EntryType::File));
            if !replaceable {
                return Err(already_exists());
            }
            let parent = name.parent().and_then(|p| fs.id(&p)).unwrap_or(EntryId::ROOT);
            return Ok(Self {
                table: fs.table(),
                anchor: parent,
                target: name.clone(),
                links: vec![Link {
                    name: name.clone(),
                    existing: Some(id),
                    view,
                }],
            });
        }

        let mut missing = Vec::new();
        let mut cursor = name.parent().unwrap_or_default();
        let anchor = loop {
            if let Some(id) = fs.id(&cursor) {
                break id;
            }
            if !options.create_parents {
                return Err(FsError::NotFound { name: cursor });
            }
            let parent = cursor.parent().unwrap_or_default();
            missing.push(std::mem::replace(&mut cursor, parent));
        };
        if !fs.get(anchor).is_some_and(|e| e.is_type(EntryType::Directory)) {
            return Err(FsError::NotADirectory { name: cursor });
        }

        let modified = std::time::SystemTime::now();
        let mut links: Vec<Link> = missing
            .into_iter()
            .rev()
            .map(|name| Link {
                name,
                existing: None,
                view: View::Directory { modified },
            })
            .collect();
        links.push(Link {
            name: name.clone(),
            existing: None,
            view,
        });
        Ok(Self {
            table: fs.table(),
            anchor,
            target: name.clone(),
            links,
        })
    }

    /// The entry this operation creates.
    pub fn target(&self) -> &EntryName {
        &self.target
    }

    /// Number of entries this operation creates or replaces.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Always `false`: an operation targets at least one entry.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Apply all links, or none of them.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the parent vanished or the operation was
    ///   built against another table
    /// - [`FsError::NotADirectory`] if the parent lost its directory view
    /// - [`FsError::AlreadyExists`] if a link's entry appeared meanwhile
    pub fn commit(self, fs: &mut ArchiveFileSystem) -> Result<EntryId, FsError> {
        self.validate(fs)?;

        let mut parent = self.anchor;
        for link in self.links {
            parent = match link.existing {
                Some(id) => {
                    if let Some(entry) = fs.get_mut(id) {
                        entry.install(link.view);
                    }
                    id
                }
                None => fs.insert(CovariantEntry::new(link.name, link.view), parent),
            };
        }
        fs.model().set_touched(true);
        Ok(parent)
    }

    fn validate(&self, fs: &ArchiveFileSystem) -> Result<(), FsError> {
        let anchor_name = || {
            self.links
                .first()
                .and_then(|l| l.name.parent())
                .unwrap_or_default()
        };
        let anchor = (fs.table() == self.table)
            .then(|| fs.get(self.anchor))
            .flatten()
            .ok_or_else(|| FsError::NotFound {
                name: anchor_name(),
            })?;
        if !anchor.is_type(EntryType::Directory) {
            return Err(FsError::NotADirectory {
                name: anchor.name().clone(),
            });
        }
        for link in &self.links {
            match link.existing {
                Some(id) => {
                    if !fs.get(id).is_some_and(|e| e.name() == &link.name) {
                        return Err(FsError::NotFound {
                            name: link.name.clone(),
                        });
                    }
                }
                None => {
                    if fs.id(&link.name).is_some() {
                        return Err(FsError::AlreadyExists {
                            name: link.name.clone(),
                            operation: "mknod",
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Staged removal of one entry with all of its views.
///
/// Building fails with [`FsError::NotFound`] for missing entries,
/// [`FsError::DirectoryNotEmpty`] for directories with members and
/// [`FsError::InvalidName`] for the root.
#[derive(Debug)]
#[must_use = "a pending operation does nothing until committed"]
pub struct Unlink {
    table: u64,
    id: EntryId,
    parent: EntryId,
    name: EntryName,
}

impl Unlink {
    pub(crate) fn new(fs: &ArchiveFileSystem, name: &EntryName) -> Result<Self, FsError> {
        let Some(parent_name) = name.parent() else {
            return Err(FsError::InvalidName {
                name: String::new(),
                reason: "the archive root cannot be unlinked",
            });
        };
        let id = fs
            .id(name)
            .ok_or_else(|| FsError::NotFound { name: name.clone() })?;
        if fs.get(id).is_some_and(CovariantEntry::has_members) {
            return Err(FsError::DirectoryNotEmpty { name: name.clone() });
        }
        Ok(Self {
            table: fs.table(),
            id,
            parent: fs.id(&parent_name).unwrap_or(EntryId::ROOT),
            name: name.clone(),
        })
    }

    /// The entry this operation removes.
    pub fn target(&self) -> &EntryName {
        &self.name
    }

    /// Remove the entry.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the entry vanished or the operation was
    ///   built against another table
    /// - [`FsError::DirectoryNotEmpty`] if members were added meanwhile
    pub fn commit(self, fs: &mut ArchiveFileSystem) -> Result<(), FsError> {
        let entry = (fs.table() == self.table)
            .then(|| fs.get(self.id))
            .flatten()
            .filter(|e| e.name() == &self.name)
            .ok_or_else(|| FsError::NotFound {
                name: self.name.clone(),
            })?;
        if entry.has_members() {
            return Err(FsError::DirectoryNotEmpty { name: self.name });
        }
        fs.remove(self.id, self.parent);
        fs.model().set_touched(true);
        Ok(())
    }
}
