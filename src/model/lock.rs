//! Re-entrant read/write lock guarding one model.
//!
//! Unlike `parking_lot::RwLock`, this lock knows which threads hold it. The
//! lock coordination layer needs that to decide whether an operation may run
//! directly, must be re-entered under the write lock, or must back off.
//!
//! A per-thread counter tracks how many model locks the thread holds in total
//! so that nested acquisitions (child archive locked, parent requested) can
//! switch to try-lock semantics.

use std::cell::Cell;
use std::collections::HashMap;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

thread_local! {
    static LOCKS_HELD: Cell<usize> = const { Cell::new(0) };
}

/// Number of model lock holds of the calling thread, across all models.
pub fn held_by_current_thread() -> usize {
    LOCKS_HELD.with(Cell::get)
}

fn hold() {
    LOCKS_HELD.with(|held| held.set(held.get() + 1));
}

fn release() {
    LOCKS_HELD.with(|held| held.set(held.get().saturating_sub(1)));
}

#[derive(Debug, Default)]
struct LockState {
    writer: Option<ThreadId>,
    write_holds: usize,
    readers: HashMap<ThreadId, usize>,
}

impl LockState {
    fn can_read(&self, me: ThreadId) -> bool {
        self.writer.is_none_or(|w| w == me)
    }

    fn can_write(&self, me: ThreadId) -> bool {
        match self.writer {
            Some(w) => w == me,
            None => self.readers.is_empty(),
        }
    }

    fn grant_read(&mut self, me: ThreadId) {
        *self.readers.entry(me).or_insert(0) += 1;
    }

    fn grant_write(&mut self, me: ThreadId) {
        self.writer = Some(me);
        self.write_holds += 1;
    }
}

/// Re-entrant reader/writer lock with owner tracking.
///
/// - Any number of threads may hold the read lock while no other thread holds
///   the write lock.
/// - The write-lock owner may re-acquire both read and write locks.
/// - A thread holding only a read lock must not request the write lock: that
///   upgrade can deadlock and is reported by the lock coordination layer as a
///   `NeedsWriteLock` signal instead.
#[derive(Debug, Default)]
pub struct ModelLock {
    state: Mutex<LockState>,
    changed: Condvar,
}

impl ModelLock {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the read lock, blocking while another thread writes.
    pub fn read(&self) -> ReadGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while !state.can_read(me) {
            self.changed.wait(&mut state);
        }
        state.grant_read(me);
        hold();
        ReadGuard { lock: self, owner: me }
    }

    /// Acquire the read lock if that is possible without blocking.
    pub fn try_read(&self) -> Option<ReadGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if !state.can_read(me) {
            return None;
        }
        state.grant_read(me);
        hold();
        Some(ReadGuard { lock: self, owner: me })
    }

    /// Acquire the write lock, blocking while other threads hold any lock.
    ///
    /// Returns `None` without blocking if the calling thread holds only a read
    /// lock: upgrading would wait for itself.
    pub fn write(&self) -> Option<WriteGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.writer != Some(me) && state.readers.contains_key(&me) {
            return None;
        }
        while !state.can_write(me) {
            self.changed.wait(&mut state);
        }
        state.grant_write(me);
        hold();
        Some(WriteGuard { lock: self })
    }

    /// Acquire the write lock if that is possible without blocking.
    pub fn try_write(&self) -> Option<WriteGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if !state.can_write(me) {
            return None;
        }
        state.grant_write(me);
        hold();
        Some(WriteGuard { lock: self })
    }

    /// Returns `true` if the calling thread owns the write lock.
    pub fn is_write_locked_by_current_thread(&self) -> bool {
        self.state.lock().writer == Some(thread::current().id())
    }

    /// Returns `true` if the calling thread holds at least one read lock.
    pub fn is_read_locked_by_current_thread(&self) -> bool {
        self.state
            .lock()
            .readers
            .contains_key(&thread::current().id())
    }

    /// Returns `true` if any thread holds the write lock.
    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    fn unlock_read(&self, owner: ThreadId) {
        let mut state = self.state.lock();
        if let Some(count) = state.readers.get_mut(&owner) {
            *count -= 1;
            if *count == 0 {
                state.readers.remove(&owner);
            }
        }
        drop(state);
        release();
        self.changed.notify_all();
    }

    fn unlock_write(&self) {
        let mut state = self.state.lock();
        state.write_holds -= 1;
        if state.write_holds == 0 {
            state.writer = None;
        }
        drop(state);
        release();
        self.changed.notify_all();
    }
}

/// Releases one read hold on drop.
#[must_use = "the read lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReadGuard<'a> {
    lock: &'a ModelLock,
    owner: ThreadId,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_read(self.owner);
    }
}

/// Releases one write hold on drop.
#[must_use = "the write lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct WriteGuard<'a> {
    lock: &'a ModelLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn write_is_reentrant() {
        let lock = ModelLock::new();
        let outer = lock.write().unwrap();
        let inner = lock.write().unwrap();
        let read = lock.read();
        assert!(lock.is_write_locked_by_current_thread());
        assert_eq!(held_by_current_thread(), 3);
        drop(read);
        drop(inner);
        assert!(lock.is_write_locked_by_current_thread());
        drop(outer);
        assert!(!lock.is_write_locked());
        assert_eq!(held_by_current_thread(), 0);
    }

    #[test]
    fn readers_share() {
        let lock = Arc::new(ModelLock::new());
        let _mine = lock.read();
        let other = Arc::clone(&lock);
        let acquired = thread::spawn(move || other.try_read().is_some())
            .join()
            .unwrap();
        assert!(acquired);
    }

    #[test]
    fn writer_excludes_other_threads() {
        let lock = Arc::new(ModelLock::new());
        let _guard = lock.write().unwrap();
        let other = Arc::clone(&lock);
        let (read, write) = thread::spawn(move || {
            (other.try_read().is_some(), other.try_write().is_some())
        })
        .join()
        .unwrap();
        assert!(!read);
        assert!(!write);
    }

    #[test]
    fn own_read_blocks_try_write() {
        let lock = ModelLock::new();
        let _read = lock.read();
        assert!(lock.is_read_locked_by_current_thread());
        assert!(lock.try_write().is_none());
    }

    #[test]
    fn blocked_writer_proceeds_after_release() {
        let lock = Arc::new(ModelLock::new());
        let read = lock.read();
        let entered = Arc::new(AtomicBool::new(false));

        let handle = {
            let lock = Arc::clone(&lock);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let _w = lock.write().unwrap();
                entered.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!entered.load(Ordering::SeqCst));
        drop(read);
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn read_lock_is_not_upgraded() {
        let lock = ModelLock::new();
        let read = lock.read();
        assert!(lock.write().is_none());
        assert!(!lock.is_write_locked());
        assert_eq!(held_by_current_thread(), 1);
        drop(read);
        assert!(lock.write().is_some());
    }
}
