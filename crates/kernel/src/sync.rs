// kernel/src/sync.rs
//! Blocking synchronization primitives
//!
//! The standard library has no re-entrant mutex and no counting semaphore,
//! and both are load-bearing here: per-file locks recurse through the parent
//! directory chain, the descriptor table re-enters on close, and
//! wait-for-any parks on a semaphore. Both primitives are built on
//! `std::sync::{Mutex, Condvar}`.
//!
//! A [`ReentrantMutex`] is a raw lock: it protects a critical section, not
//! data. State guarded by one lives in a separate plain `Mutex` whose guards
//! are never held across a recursive call.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Stable identifier for a host thread id.
///
/// The same hash doubles as the thread id handed to user programs, so lock
/// ownership and TCB identity agree.
#[must_use]
pub fn token_for(id: std::thread::ThreadId) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

/// Stable identifier of the calling host thread.
#[must_use]
pub fn current_thread_token() -> u64 {
    token_for(std::thread::current().id())
}

/// Lock a mutex, recovering the guard if a panicking thread poisoned it.
///
/// Panics never originate in the core paths, but user entrypoints run on
/// kernel-managed threads and may assert; poisoning must not cascade.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Owner {
    holder: Option<u64>,
    depth: usize,
}

/// A mutex that may be re-acquired by the thread already holding it.
#[derive(Default)]
pub struct ReentrantMutex {
    owner: Mutex<Owner>,
    released: Condvar,
}

impl ReentrantMutex {
    /// Create an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, blocking if another thread holds it.
    pub fn lock(&self) -> ReentrantGuard<'_> {
        let token = current_thread_token();
        let mut owner = lock(&self.owner);
        loop {
            match owner.holder {
                None => {
                    owner.holder = Some(token);
                    owner.depth = 1;
                    break;
                }
                Some(holder) if holder == token => {
                    owner.depth += 1;
                    break;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        ReentrantGuard { lock: self }
    }

    fn unlock(&self) {
        let mut owner = lock(&self.owner);
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.holder = None;
            self.released.notify_one();
        }
    }
}

/// Guard returned by [`ReentrantMutex::lock`]; releases one level on drop.
pub struct ReentrantGuard<'a> {
    lock: &'a ReentrantMutex,
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Counting semaphore.
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Block until a permit is available, then take it.
    pub fn wait(&self) {
        let mut permits = lock(&self.permits);
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
    }

    /// Release one permit, waking a waiter if any.
    pub fn signal(&self) {
        let mut permits = lock(&self.permits);
        *permits += 1;
        self.available.notify_one();
    }
}
