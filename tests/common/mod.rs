//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fedfs_kernel::*;

pub const MAGIC: &[u8] = b"TOY1";

/// Length-prefixed container format.
///
/// `MAGIC`, then per entry: a kind byte (`F`, `D`, `L`), the name and the
/// payload, each prefixed by its length as little-endian `u32`. The payload
/// of a link is its target.
#[derive(Debug, Default)]
pub struct Toy {
    writes: AtomicUsize,
}

impl Toy {
    /// Number of containers encoded so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn invalid(details: &str) -> FsError {
    FsError::Deserialization(details.to_owned())
}

fn take<'a>(bytes: &mut &'a [u8], n: usize) -> Result<&'a [u8], FsError> {
    if bytes.len() < n {
        return Err(invalid("truncated container"));
    }
    let (head, tail) = bytes.split_at(n);
    *bytes = tail;
    Ok(head)
}

fn take_chunk<'a>(bytes: &mut &'a [u8]) -> Result<&'a [u8], FsError> {
    let len = take(bytes, 4)?;
    let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
    take(bytes, len)
}

fn put_chunk(out: &mut Vec<u8>, chunk: &[u8]) {
    out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(chunk);
}

impl ArchiveDriver for Toy {
    fn read_container(&self, bytes: &[u8]) -> Result<Vec<ArchiveEntry>, FsError> {
        let mut rest = bytes;
        if take(&mut rest, MAGIC.len())? != MAGIC {
            return Err(invalid("bad magic"));
        }
        let mut entries = Vec::new();
        while !rest.is_empty() {
            let kind = take(&mut rest, 1)?[0];
            let name = std::str::from_utf8(take_chunk(&mut rest)?)
                .map_err(|e| invalid(&e.to_string()))?;
            let name = EntryName::new(name)?;
            let payload = take_chunk(&mut rest)?.to_vec();
            entries.push(match kind {
                b'F' => ArchiveEntry::file(name, payload),
                b'D' => ArchiveEntry::directory(name),
                b'L' => ArchiveEntry::symlink(name, String::from_utf8_lossy(&payload).into_owned()),
                _ => return Err(invalid("unknown entry kind")),
            });
        }
        Ok(entries)
    }

    fn write_container(&self, entries: &[ArchiveEntry]) -> Result<Vec<u8>, FsError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut out = MAGIC.to_vec();
        for entry in entries {
            let (kind, payload) = match entry.entry_type {
                EntryType::File => (b'F', entry.data.clone()),
                EntryType::Directory => (b'D', Vec::new()),
                EntryType::Symlink => (
                    b'L',
                    entry
                        .link_target
                        .as_ref()
                        .map(|t| t.to_string_lossy().into_owned().into_bytes())
                        .unwrap_or_default(),
                ),
            };
            out.push(kind);
            put_chunk(&mut out, entry.name.as_str().as_bytes());
            put_chunk(&mut out, &payload);
        }
        Ok(out)
    }
}

/// Encode a container of plain text files.
pub fn container(files: &[(&str, &str)]) -> Vec<u8> {
    let entries: Vec<ArchiveEntry> = files
        .iter()
        .map(|(n, text)| ArchiveEntry::file(name(n), text.as_bytes()))
        .collect();
    encode(&entries)
}

/// Encode arbitrary entries.
pub fn encode(entries: &[ArchiveEntry]) -> Vec<u8> {
    Toy::default()
        .write_container(entries)
        .expect("encoding never fails")
}

/// Decode a container into `(name, data)` pairs of its file entries.
pub fn files(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    Toy::default()
        .read_container(bytes)
        .expect("valid container")
        .into_iter()
        .filter(|e| e.entry_type == EntryType::File)
        .map(|e| (e.name.to_string(), e.data))
        .collect()
}

/// A `(name, data)` pair as returned by [`files`].
pub fn entry(name: &str, data: &[u8]) -> (String, Vec<u8>) {
    (name.to_owned(), data.to_vec())
}

pub fn name(s: &str) -> EntryName {
    EntryName::new(s).expect("valid entry name")
}

pub fn toy() -> Scheme {
    Scheme::new("toy").expect("valid scheme")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A host store, a counting driver and a manager over both.
pub struct Fixture {
    pub host: Arc<MemoryStore>,
    pub driver: Arc<Toy>,
    pub manager: Manager,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        let host = Arc::new(MemoryStore::new());
        let driver = Arc::new(Toy::default());
        let drivers = Drivers::new().with(toy(), driver.clone());
        let parent: Arc<dyn Controller> = host.clone();
        Self {
            host,
            driver,
            manager: Manager::new(parent, Arc::new(drivers)),
        }
    }

    pub fn host_view(&self) -> FsView {
        self.manager.host_view()
    }

    /// Store raw bytes in the host.
    pub fn put(&self, entry: &str, bytes: &[u8]) {
        self.host_view()
            .write_bytes(&name(entry), bytes)
            .expect("host write");
    }

    /// Raw bytes of a host entry.
    pub fn get(&self, entry: &str) -> Vec<u8> {
        self.host_view()
            .read_bytes(&name(entry))
            .expect("host read")
    }

    /// Mount point of a top-level toy archive.
    pub fn archive(&self, entry: &str) -> MountPoint {
        MountPoint::new(toy(), &MountPoint::host(), &name(entry))
    }

    pub fn view(&self, mount_point: &MountPoint) -> FsView {
        self.manager.view(mount_point).expect("toy driver registered")
    }
}
