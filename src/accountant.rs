//! Bookkeeping of open entry streams.
//!
//! The accountant counts open streams per owning thread and in total, so a
//! sync can tell whether flushing would pull the rug from under a stream.
//! It keeps its own mutex and never touches the model lock: stream bookkeeping
//! and tree mutation are locked independently.

use std::collections::HashMap;
use std::io;
use std::sync::Weak;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::EntryName;

/// Something the accountant can close on behalf of its owner.
pub(crate) trait ForceClose: Send + Sync {
    /// Close the resource; must unregister it from the accountant.
    fn force_close(&self) -> io::Result<()>;
}

struct Resource {
    owner: ThreadId,
    name: EntryName,
    closer: Weak<dyn ForceClose>,
}

#[derive(Default)]
struct Ledger {
    next_id: u64,
    open: HashMap<u64, Resource>,
    per_thread: HashMap<ThreadId, usize>,
}

impl Ledger {
    fn local(&self, thread: ThreadId) -> usize {
        self.per_thread.get(&thread).copied().unwrap_or(0)
    }
}

/// Counts open streams of one mounted archive.
///
/// Counters never go negative: stopping an unknown or already stopped
/// resource is a no-op. The total is always at least the count of any single
/// thread.
#[derive(Default)]
pub struct ResourceAccountant {
    ledger: Mutex<Ledger>,
    closed: Condvar,
}

impl ResourceAccountant {
    /// Create an accountant without open resources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource owned by the calling thread.
    pub(crate) fn start(&self, name: EntryName, closer: Weak<dyn ForceClose>) -> u64 {
        let owner = thread::current().id();
        let mut ledger = self.ledger.lock();
        let id = ledger.next_id;
        ledger.next_id += 1;
        ledger.open.insert(
            id,
            Resource {
                owner,
                name,
                closer,
            },
        );
        *ledger.per_thread.entry(owner).or_insert(0) += 1;
        id
    }

    /// Unregister a resource. Returns `false` if it was not registered.
    pub(crate) fn stop(&self, id: u64) -> bool {
        let mut ledger = self.ledger.lock();
        let Some(resource) = ledger.open.remove(&id) else {
            return false;
        };
        if let Some(count) = ledger.per_thread.get_mut(&resource.owner) {
            *count -= 1;
            if *count == 0 {
                ledger.per_thread.remove(&resource.owner);
            }
        }
        drop(ledger);
        self.closed.notify_all();
        true
    }

    /// Number of open resources owned by the calling thread.
    pub fn local_resources(&self) -> usize {
        self.ledger.lock().local(thread::current().id())
    }

    /// Number of open resources of all threads.
    pub fn total_resources(&self) -> usize {
        self.ledger.lock().open.len()
    }

    /// Block until every open resource belongs to the calling thread.
    pub fn await_other_threads(&self) {
        let me = thread::current().id();
        let mut ledger = self.ledger.lock();
        while ledger.open.len() > ledger.local(me) {
            self.closed.wait(&mut ledger);
        }
    }

    /// Close every open resource, returning the outcome per resource.
    pub(crate) fn close_all(&self) -> Vec<(EntryName, io::Result<()>)> {
        let snapshot: Vec<(u64, EntryName, Weak<dyn ForceClose>)> = self
            .ledger
            .lock()
            .open
            .iter()
            .map(|(id, r)| (*id, r.name.clone(), r.closer.clone()))
            .collect();

        let mut outcomes = Vec::with_capacity(snapshot.len());
        for (id, name, closer) in snapshot {
            let result = match closer.upgrade() {
                Some(closer) => closer.force_close(),
                None => Ok(()),
            };
            // the closer unregisters itself; this covers handles already gone
            self.stop(id);
            outcomes.push((name, result));
        }
        outcomes
    }
}

impl std::fmt::Debug for ResourceAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.ledger.lock();
        f.debug_struct("ResourceAccountant")
            .field("total", &ledger.open.len())
            .field("threads", &ledger.per_thread.len())
            .finish()
    }
}
