//! The innermost controller of an archive mount point.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::archive::{ArchiveDriver, ArchiveFileSystem};
use crate::{
    Control, Controller, DirEntry, EntryName, EntryReader, EntryType, EntryWriter, Flow, FsError,
    MknodOptions, Model, Node, SyncOptions, WriteOptions, WriteStream,
};

type Data = Arc<[u8]>;

fn no_data() -> Data {
    Arc::from(Vec::new())
}

/// State of a mounted archive.
struct Mounted {
    generation: u64,
    fs: ArchiveFileSystem,
    /// Entry data as of the last mount or sync.
    input: HashMap<EntryName, Data>,
    /// Entry data written since the last sync; open writers hold a placeholder.
    output: HashMap<EntryName, Data>,
    /// Not yet present in the parent file system.
    created: bool,
}

impl Mounted {
    fn data(&self, name: &EntryName) -> Data {
        self.output
            .get(name)
            .or_else(|| self.input.get(name))
            .cloned()
            .unwrap_or_else(no_data)
    }
}

#[derive(Default)]
struct ArchiveState {
    next_generation: u64,
    mounted: Option<Mounted>,
}

static NEXT_CONTROLLER: AtomicU64 = AtomicU64::new(0);

/// Serves one archive mount point from its container in the parent file
/// system.
///
/// The container is read and decoded on first use. Mutations are staged in
/// memory and written back through the parent chain by `sync`. Mounting and
/// every mutation need the model's write lock; without it the controller
/// answers [`Control::NeedsWriteLock`]. Operations that conflict with data
/// written since the last sync answer [`Control::NeedsSync`]. If the mount
/// point turns out not to be an archive the controller answers
/// [`Control::FalsePositive`].
pub struct ArchiveController {
    id: u64,
    model: Arc<Model>,
    parent: Arc<dyn Controller>,
    driver: Arc<dyn ArchiveDriver>,
    state: Arc<Mutex<ArchiveState>>,
}

impl ArchiveController {
    /// Create the controller for `model`, whose container is stored in
    /// `parent` at the mount point's entry name.
    pub fn new(
        model: Arc<Model>,
        parent: Arc<dyn Controller>,
        driver: Arc<dyn ArchiveDriver>,
    ) -> Self {
        Self {
            id: NEXT_CONTROLLER.fetch_add(1, Ordering::Relaxed),
            model,
            parent,
            driver,
            state: Arc::new(Mutex::new(ArchiveState::default())),
        }
    }

    /// Returns `true` while the container is mounted.
    pub fn is_mounted(&self) -> bool {
        self.state.lock().mounted.is_some()
    }

    fn require_write_lock(&self) -> Flow<()> {
        if self.model.lock().is_write_locked_by_current_thread() {
            Ok(())
        } else {
            Err(Control::NeedsWriteLock)
        }
    }

    fn entry_in_parent(&self) -> &EntryName {
        self.model.mount_point().entry_in_parent()
    }

    fn with_mounted<T>(&self, autocreate: bool, f: impl FnOnce(&mut Mounted) -> Flow<T>) -> Flow<T> {
        {
            let mut state = self.state.lock();
            if let Some(mounted) = state.mounted.as_mut() {
                return f(mounted);
            }
        }
        self.require_write_lock()?;
        let (fs, input, created) = self.mount(autocreate)?;
        let mut state = self.state.lock();
        let generation = state.next_generation;
        state.next_generation += 1;
        let mounted = state.mounted.insert(Mounted {
            generation,
            fs,
            input,
            output: HashMap::new(),
            created,
        });
        f(mounted)
    }

    fn mount(&self, autocreate: bool) -> Flow<(ArchiveFileSystem, HashMap<EntryName, Data>, bool)> {
        let mount_point = self.model.mount_point();
        let entry = self.entry_in_parent();
        match self.parent.node(entry)? {
            None => {
                let parent_dir = entry.parent().unwrap_or_default();
                let parent_is_dir = self.parent.node(&parent_dir)?.is_some_and(|n| n.is_dir());
                if !autocreate || !parent_is_dir {
                    return Err(Control::FalsePositive(FsError::NotFound {
                        name: entry.clone(),
                    }));
                }
                tracing::debug!(%mount_point, "creating new archive");
                Ok((ArchiveFileSystem::new(Arc::clone(&self.model)), HashMap::new(), true))
            }
            Some(node) if !node.is_file() => Err(Control::FalsePositive(FsError::NotAFile {
                name: entry.clone(),
            })),
            Some(_) => {
                let bytes = self.read_parent()?;
                let entries = self.driver.read_container(&bytes).map_err(|e| {
                    Control::FalsePositive(FsError::InvalidData {
                        mount_point: mount_point.clone(),
                        details: e.to_string(),
                    })
                })?;
                tracing::debug!(%mount_point, entries = entries.len(), "mounted archive");
                let fs = ArchiveFileSystem::from_entries(Arc::clone(&self.model), &entries);
                let input = entries
                    .into_iter()
                    .filter(|e| e.entry_type == EntryType::File)
                    .map(|e| (e.name, Data::from(e.data)))
                    .collect();
                Ok((fs, input, false))
            }
        }
    }

    fn read_parent(&self) -> Flow<Vec<u8>> {
        let entry = self.entry_in_parent();
        let mut reader = self.parent.open_read(entry)?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| FsError::io("read", entry, e))?;
        reader.close()?;
        Ok(bytes)
    }

    fn write_parent(&self, bytes: &[u8]) -> Flow<()> {
        let entry = self.entry_in_parent();
        let mut writer = self.parent.open_write(entry, WriteOptions::TRUNCATE)?;
        writer
            .write_all(bytes)
            .map_err(|e| FsError::io("write", entry, e))?;
        writer.close()?;
        Ok(())
    }

    fn create(
        &self,
        name: &EntryName,
        entry_type: EntryType,
        target: Option<&Path>,
        options: MknodOptions,
    ) -> Flow<()> {
        self.require_write_lock()?;
        self.with_mounted(true, |m| {
            if name.is_root()
                && entry_type == EntryType::Directory
                && m.created
                && !self.model.is_touched()
            {
                // the archive itself is being created
                self.model.set_touched(true);
                return Ok(());
            }
            if entry_type == EntryType::File && m.output.contains_key(name) {
                return Err(Control::NeedsSync);
            }
            let op = match target {
                Some(target) => m.fs.symlink(name, target, options)?,
                None => m.fs.mknod(name, entry_type, options)?,
            };
            op.commit(&mut m.fs)?;
            if entry_type == EntryType::File {
                m.input.insert(name.clone(), no_data());
            }
            Ok(())
        })
    }

    fn unlink_root(&self) -> Flow<()> {
        let (empty, created) = self.with_mounted(false, |m| Ok((m.fs.is_empty(), m.created)))?;
        if !empty {
            return Err(FsError::DirectoryNotEmpty {
                name: EntryName::root(),
            }
            .into());
        }
        self.state.lock().mounted = None;
        self.model.set_touched(false);
        if created {
            return Ok(());
        }
        tracing::debug!(mount_point = %self.model.mount_point(), "removing empty archive");
        self.parent.unlink(self.entry_in_parent())
    }
}

impl Controller for ArchiveController {
    fn model(&self) -> &Arc<Model> {
        &self.model
    }

    fn node(&self, name: &EntryName) -> Flow<Option<Node>> {
        self.with_mounted(false, |m| Ok(m.fs.node(name)))
    }

    fn read_dir(&self, name: &EntryName) -> Flow<Vec<DirEntry>> {
        self.with_mounted(false, |m| Ok(m.fs.read_dir(name)?))
    }

    fn read_link(&self, name: &EntryName) -> Flow<PathBuf> {
        self.with_mounted(false, |m| Ok(m.fs.read_link(name)?))
    }

    fn mknod(&self, name: &EntryName, entry_type: EntryType, options: MknodOptions) -> Flow<()> {
        self.create(name, entry_type, None, options)
    }

    fn symlink(&self, name: &EntryName, target: &Path, options: MknodOptions) -> Flow<()> {
        self.create(name, EntryType::Symlink, Some(target), options)
    }

    fn unlink(&self, name: &EntryName) -> Flow<()> {
        self.require_write_lock()?;
        if name.is_root() {
            return self.unlink_root();
        }
        self.with_mounted(false, |m| {
            if m.output.contains_key(name) {
                return Err(Control::NeedsSync);
            }
            m.fs.unlink(name)?.commit(&mut m.fs)?;
            m.input.remove(name);
            Ok(())
        })
    }

    fn open_read(&self, name: &EntryName) -> Flow<EntryReader> {
        self.with_mounted(false, |m| {
            if m.output.contains_key(name) {
                return Err(Control::NeedsSync);
            }
            match m.fs.node(name) {
                Some(node) if node.is_file() => {
                    Ok(EntryReader::new(name.clone(), Cursor::new(m.data(name))))
                }
                Some(_) => Err(FsError::NotAFile { name: name.clone() }.into()),
                None => Err(FsError::NotFound { name: name.clone() }.into()),
            }
        })
    }

    fn open_write(&self, name: &EntryName, options: WriteOptions) -> Flow<EntryWriter> {
        self.require_write_lock()?;
        self.with_mounted(true, |m| {
            if m.output.contains_key(name) {
                return Err(Control::NeedsSync);
            }
            match m.fs.node(name) {
                Some(node) if !node.is_file() => {
                    return Err(FsError::NotAFile { name: name.clone() }.into());
                }
                Some(_) => {}
                None => {
                    let options = MknodOptions {
                        create_parents: options.create_parents,
                        exclusive: false,
                    };
                    m.fs.mknod(name, EntryType::File, options)?
                        .commit(&mut m.fs)?;
                }
            }
            let buf = if options.append {
                m.data(name).to_vec()
            } else {
                Vec::new()
            };
            m.output.insert(name.clone(), no_data());
            Ok(EntryWriter::new(
                name.clone(),
                ArchiveWriter {
                    state: Arc::clone(&self.state),
                    generation: m.generation,
                    name: name.clone(),
                    buf,
                    closed: false,
                },
            ))
        })
    }

    fn sync(&self, options: SyncOptions) -> Flow<()> {
        self.require_write_lock()?;
        let mount_point = self.model.mount_point();
        let mut state = self.state.lock();
        let Some(mounted) = state.mounted.as_mut() else {
            return Ok(());
        };

        if options.abort_changes {
            tracing::debug!(%mount_point, "discarding archive changes");
            state.mounted = None;
            self.model.set_touched(false);
            return Ok(());
        }

        if self.model.is_touched() {
            let entries = mounted.fs.export(|name| mounted.data(name).to_vec());
            drop(state);
            let bytes = self.driver.write_container(&entries)?;
            self.write_parent(&bytes)?;
            tracing::debug!(%mount_point, entries = entries.len(), bytes = bytes.len(), "synced archive");

            state = self.state.lock();
            if let Some(mounted) = state.mounted.as_mut() {
                let written = std::mem::take(&mut mounted.output);
                mounted.input.extend(written);
                mounted.created = false;
            }
            self.model.set_touched(false);
        }

        if options.clear_cache {
            tracing::debug!(%mount_point, "unmounting archive");
            state.mounted = None;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ArchiveController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveController")
            .field("id", &self.id)
            .field("mount_point", &self.model.mount_point().to_string())
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

/// Buffers entry data and hands it to the mounted archive on close.
struct ArchiveWriter {
    state: Arc<Mutex<ArchiveState>>,
    generation: u64,
    name: EntryName,
    buf: Vec<u8>,
    closed: bool,
}

impl Write for ArchiveWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteStream for ArchiveWriter {
    fn close(&mut self) -> io::Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        let data = Data::from(std::mem::take(&mut self.buf));
        let mut state = self.state.lock();
        let Some(mounted) = state
            .mounted
            .as_mut()
            .filter(|m| m.generation == self.generation)
        else {
            return Err(io::Error::other(format!(
                "archive was unmounted before {} was closed",
                self.name
            )));
        };
        if !mounted.fs.set_file(&self.name, data.len() as u64, SystemTime::now()) {
            mounted.output.remove(&self.name);
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was removed while open", self.name),
            ));
        }
        mounted.output.insert(self.name.clone(), data);
        Ok(())
    }
}
