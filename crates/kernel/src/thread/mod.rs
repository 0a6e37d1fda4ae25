// kernel/src/thread/mod.rs
//! Thread manager
//!
//! One host thread per user thread. A thread's id is the stable hash of its
//! host `ThreadId`, so the id a creator reads off the join handle is the
//! same one the thread computes for itself. TCBs live in a map until their
//! exit code has been collected.
//!
//! Wait-for-any parks the caller on a single-permit semaphore registered on
//! every target's waiter list; a terminating thread signals every waiter
//! and clears its list.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use vesta_os_abi::{ExitCode, KernelError, Registers, Result, Tid};

use crate::loader::{TerminateHandler, ThreadProc};
use crate::process::Pid;
use crate::sync::{self, token_for, Semaphore};
use crate::Kernel;
use crate::Sys;

/// Lifecycle state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Entry function still running.
    Running,
    /// Exit code recorded, waiting to be collected.
    Terminated,
}

struct TcbState {
    state: ThreadState,
    exit_code: ExitCode,
    terminate_handler: Option<TerminateHandler>,
}

/// Thread control block.
pub struct Tcb {
    /// Stable hash of the host thread id.
    pub tid: Tid,
    /// Owning process.
    pub pid: Pid,
    join: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<TcbState>,
    /// Threads currently blocked in wait-for-any on this thread.
    waiters: Mutex<Vec<Tid>>,
    /// Installed while this thread is itself waiting.
    wait_semaphore: Mutex<Option<Arc<Semaphore>>>,
}

impl Tcb {
    fn new(tid: Tid, pid: Pid, join: Option<JoinHandle<()>>) -> Self {
        Self {
            tid,
            pid,
            join: Mutex::new(join),
            state: Mutex::new(TcbState {
                state: ThreadState::Running,
                exit_code: 0,
                terminate_handler: None,
            }),
            waiters: Mutex::new(Vec::new()),
            wait_semaphore: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ThreadState {
        sync::lock(&self.state).state
    }

    /// Whether the thread has terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state() == ThreadState::Terminated
    }

    /// Record termination; the first recorded exit code wins.
    ///
    /// Returns whether this call performed the transition.
    pub fn set_terminated(&self, exit_code: ExitCode) -> bool {
        let mut state = sync::lock(&self.state);
        if state.state == ThreadState::Terminated {
            return false;
        }
        state.state = ThreadState::Terminated;
        state.exit_code = exit_code;
        true
    }

    /// The installed cooperative terminate handler, if any.
    #[must_use]
    pub fn terminate_handler(&self) -> Option<TerminateHandler> {
        sync::lock(&self.state).terminate_handler
    }

    /// Take the host join handle (join or detach is the caller's choice).
    pub fn take_join_handle(&self) -> Option<JoinHandle<()>> {
        sync::lock(&self.join).take()
    }
}

/// The thread manager service.
#[derive(Default)]
pub struct ThreadManager {
    threads: Mutex<HashMap<Tid, Arc<Tcb>>>,
}

impl ThreadManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a TCB by thread id.
    #[must_use]
    pub fn get(&self, tid: Tid) -> Option<Arc<Tcb>> {
        sync::lock(&self.threads).get(&tid).cloned()
    }

    /// The TCB of the calling host thread, if it is kernel-managed.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Tcb>> {
        self.get(sync::current_thread_token())
    }

    /// Register a TCB for an already-running host thread.
    ///
    /// Used for the supervisor, whose TCB carries the bootstrap thread's id
    /// while its join handle is the reaper thread.
    pub fn register_existing(
        &self,
        tid: Tid,
        pid: Pid,
        join: Option<JoinHandle<()>>,
    ) -> Arc<Tcb> {
        let tcb = Arc::new(Tcb::new(tid, pid, join));
        sync::lock(&self.threads).insert(tid, Arc::clone(&tcb));
        tcb
    }

    /// Spawn the host thread for a new kernel thread.
    ///
    /// The thread blocks on the returned gate until its creator has finished
    /// linking it into the process table; signal the gate to let it run.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when the host refuses to spawn a thread.
    pub fn create_thread(
        &self,
        kernel: &Arc<Kernel>,
        pid: Pid,
        entry: ThreadProc,
        registers: Registers,
        name: &str,
    ) -> Result<(Arc<Tcb>, Arc<Semaphore>)> {
        let gate = Arc::new(Semaphore::new(0));

        let thread_gate = Arc::clone(&gate);
        let thread_kernel = Arc::clone(kernel);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                thread_gate.wait();
                let tid = sync::current_thread_token();
                let exit_code = entry(Sys::new(Arc::clone(&thread_kernel)), registers);
                thread_kernel.threads().thread_exit(tid, exit_code);
            })
            .map_err(|_| KernelError::OutOfMemory)?;

        let tid = token_for(handle.thread().id());
        let tcb = Arc::new(Tcb::new(tid, pid, Some(handle)));
        sync::lock(&self.threads).insert(tid, Arc::clone(&tcb));
        log::debug!("thread: created {tid:#x} for process {pid} ('{name}')");

        Ok((tcb, gate))
    }

    /// Record a thread's termination and wake everything waiting on it.
    ///
    /// A no-op for unknown ids (the TCB may already have been force-reaped
    /// during shutdown).
    pub fn thread_exit(&self, tid: Tid, exit_code: ExitCode) {
        let Some(tcb) = self.get(tid) else {
            return;
        };
        tcb.set_terminated(exit_code);

        let waiters: Vec<Tid> = std::mem::take(&mut *sync::lock(&tcb.waiters));
        for waiter in waiters {
            if let Some(waiting) = self.get(waiter) {
                if let Some(semaphore) = sync::lock(&waiting.wait_semaphore).clone() {
                    semaphore.signal();
                }
            }
        }
        log::debug!("thread: {tid:#x} exited with code {exit_code}");
    }

    /// Install (or clear) the calling thread's terminate handler.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the caller is not a kernel thread.
    pub fn register_terminate_handler(&self, handler: Option<TerminateHandler>) -> Result<()> {
        let tcb = self.current().ok_or(KernelError::InvalidArgument)?;
        sync::lock(&tcb.state).terminate_handler = handler;
        Ok(())
    }

    /// Block until any of `tids` has terminated; returns the one that did.
    ///
    /// An already-terminated target returns immediately; so does one whose
    /// exit code was already collected (its TCB is gone, which only happens
    /// after termination).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty target list or when the caller is not
    /// a kernel thread.
    pub fn wait_for(&self, tids: &[Tid]) -> Result<Tid> {
        if tids.is_empty() {
            return Err(KernelError::InvalidArgument);
        }

        // Fast path: something already terminated (or was collected).
        {
            let threads = sync::lock(&self.threads);
            for tid in tids {
                match threads.get(tid) {
                    None => return Ok(*tid),
                    Some(tcb) if tcb.is_terminated() => return Ok(*tid),
                    Some(_) => {}
                }
            }
        }

        let me = self.current().ok_or(KernelError::InvalidArgument)?;
        let semaphore = Arc::new(Semaphore::new(0));
        *sync::lock(&me.wait_semaphore) = Some(Arc::clone(&semaphore));

        for tid in tids {
            if let Some(target) = self.get(*tid) {
                sync::lock(&target.waiters).push(me.tid);
            }
        }

        // A target may have terminated between the scan and registration;
        // in that case its signal already landed or never will, so check
        // once more before parking.
        let raced = tids.iter().any(|tid| {
            self.get(*tid).map_or(true, |target| target.is_terminated())
        });
        if !raced {
            semaphore.wait();
        }

        // Discover which target terminated and deregister from the others.
        let mut terminated = None;
        for tid in tids {
            match self.get(*tid) {
                None => terminated = Some(*tid),
                Some(target) => {
                    sync::lock(&target.waiters).retain(|waiter| *waiter != me.tid);
                    if target.is_terminated() {
                        terminated = Some(*tid);
                    }
                }
            }
        }

        *sync::lock(&me.wait_semaphore) = None;
        terminated.ok_or(KernelError::Unknown)
    }

    /// Collect a terminated thread's exit code, dropping its TCB.
    ///
    /// Returns `Ok(None)` while the thread is still running.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for unknown ids.
    pub fn take_exit_code(&self, tid: Tid) -> Result<Option<(ExitCode, Pid)>> {
        let tcb = self.get(tid).ok_or(KernelError::InvalidArgument)?;

        let exit_code = {
            let state = sync::lock(&tcb.state);
            if state.state != ThreadState::Terminated {
                return Ok(None);
            }
            state.exit_code
        };

        sync::lock(&self.threads).remove(&tid);
        // The host thread is past its entry function; detach it.
        drop(tcb.take_join_handle());
        Ok(Some((exit_code, tcb.pid)))
    }

    /// Snapshot of all live thread ids (diagnostics and tests).
    #[must_use]
    pub fn thread_ids(&self) -> Vec<Tid> {
        sync::lock(&self.threads).keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_terminated_keeps_first_code() {
        let tcb = Tcb::new(1, 0, None);
        assert!(tcb.set_terminated(7));
        assert!(!tcb.set_terminated(9));
        assert_eq!(sync::lock(&tcb.state).exit_code, 7);
    }

    #[test]
    fn test_take_exit_code_waits_for_termination() {
        let manager = ThreadManager::new();
        let tcb = manager.register_existing(42, 0, None);

        assert_eq!(manager.take_exit_code(42), Ok(None));

        tcb.set_terminated(3);
        assert_eq!(manager.take_exit_code(42), Ok(Some((3, 0))));

        // Collected: the id is gone.
        assert_eq!(
            manager.take_exit_code(42),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn test_wait_for_already_terminated() {
        let manager = ThreadManager::new();
        let target = manager.register_existing(5, 0, None);
        target.set_terminated(0);

        assert_eq!(manager.wait_for(&[5]), Ok(5));
    }

    #[test]
    fn test_wait_for_collected_target_returns_immediately() {
        let manager = ThreadManager::new();
        // A TCB that no longer exists was terminated and collected.
        assert_eq!(manager.wait_for(&[99]), Ok(99));
        assert_eq!(manager.wait_for(&[]), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_thread_exit_signals_registered_waiter() {
        let manager = Arc::new(ThreadManager::new());
        let target = manager.register_existing(10, 0, None);
        let waiter = manager.register_existing(11, 0, None);

        let semaphore = Arc::new(Semaphore::new(0));
        *sync::lock(&waiter.wait_semaphore) = Some(Arc::clone(&semaphore));
        sync::lock(&target.waiters).push(waiter.tid);

        manager.thread_exit(10, 0);
        // Signal landed: wait returns immediately.
        semaphore.wait();
        assert!(target.is_terminated());
        assert!(sync::lock(&target.waiters).is_empty());
    }
}
