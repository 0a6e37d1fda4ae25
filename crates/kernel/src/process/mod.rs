// kernel/src/process/mod.rs
//! Process manager
//!
//! A fixed-capacity process table indexed by pid, a rotating-cursor pid
//! manager, and the supervisor. The supervisor (pid 0) owns the reaper
//! thread that periodically drains exit codes of every descendant; draining
//! the last thread of a process tears the process down, re-parents its live
//! children and releases its pid.
//!
//! The table mutex is the outermost lock in the kernel; holding it while
//! calling into the VFS or thread manager is part of the documented order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use vesta_os_abi::{ExitCode, Handle, KernelError, Registers, Result, Tid, MAX_PROCESSES};

use crate::sync;
use crate::thread::{Tcb, ThreadManager};
use crate::vfs::VirtualFileSystem;
use crate::Kernel;

/// Process identifier: an index into the process table.
pub type Pid = usize;

/// The supervisor's pid.
pub const SUPERVISOR_PID: Pid = 0;

/// Pause between reaper rounds.
const REAP_INTERVAL: Duration = Duration::from_millis(5);

/// Lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// At least one thread is alive.
    Running,
    /// Every thread has been reaped; the PCB is about to go away.
    Terminated,
}

/// Process control block.
struct Pcb {
    pid: Pid,
    ppid: Pid,
    name: String,
    /// Backing storage for the argument string whose address the initial
    /// thread's register file carries; must outlive every thread.
    argument: String,
    state: ProcessState,
    children: Vec<Pid>,
    threads: Vec<Arc<Tcb>>,
    working_dir: Option<String>,
    owned_fds: Vec<Handle>,
}

/// Tracks which pids are free with a rotating cursor.
struct PidManager {
    used: Vec<bool>,
    last: usize,
    is_full: bool,
}

impl PidManager {
    fn new() -> Self {
        Self {
            used: vec![false; MAX_PROCESSES],
            last: 0,
            is_full: false,
        }
    }

    fn get_free_pid(&mut self) -> Option<Pid> {
        if self.is_full {
            return None;
        }
        self.last = (self.last + 1) % self.used.len();
        let start = self.last;
        loop {
            if !self.used[self.last] {
                self.used[self.last] = true;
                return Some(self.last);
            }
            self.last = (self.last + 1) % self.used.len();
            if self.last == start {
                break;
            }
        }
        self.is_full = true;
        None
    }

    /// The supervisor pid and the final slot are never recycled.
    fn release_pid(&mut self, pid: Pid) -> bool {
        if pid > 0 && pid < self.used.len() - 1 {
            self.used[pid] = false;
            self.is_full = false;
            true
        } else {
            false
        }
    }

    fn claim(&mut self, pid: Pid) {
        self.used[pid] = true;
    }
}

struct ProcessTable {
    slots: Vec<Option<Pcb>>,
    pids: PidManager,
}

impl ProcessTable {
    fn pcb(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.slots.get_mut(pid).and_then(Option::as_mut)
    }
}

/// The process manager service.
pub struct ProcessManager {
    threads: Arc<ThreadManager>,
    vfs: Arc<VirtualFileSystem>,
    table: Mutex<ProcessTable>,
    shutdown: AtomicBool,
}

impl ProcessManager {
    /// Create the manager with an empty table.
    #[must_use]
    pub fn new(threads: Arc<ThreadManager>, vfs: Arc<VirtualFileSystem>) -> Self {
        Self {
            threads,
            vfs,
            table: Mutex::new(ProcessTable {
                slots: (0..MAX_PROCESSES).map(|_| None).collect(),
                pids: PidManager::new(),
            }),
            shutdown: AtomicBool::new(false),
        }
    }

    /// The thread manager this process manager drives.
    #[must_use]
    pub fn threads(&self) -> &Arc<ThreadManager> {
        &self.threads
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Create the supervisor process and start its reaper thread.
    ///
    /// The supervisor TCB carries the bootstrap thread's id (so the
    /// bootstrapping thread's syscalls resolve to pid 0) while its join
    /// handle is the reaper.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when the reaper thread cannot be spawned.
    pub fn start_supervisor(self: &Arc<Self>) -> Result<()> {
        let tid = sync::current_thread_token();

        let reaper = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("supervisor".to_string())
            .spawn(move || reaper.reap_loop())
            .map_err(|_| KernelError::OutOfMemory)?;

        let tcb = self.threads.register_existing(tid, SUPERVISOR_PID, Some(handle));

        let mut table = sync::lock(&self.table);
        table.pids.claim(SUPERVISOR_PID);
        table.slots[SUPERVISOR_PID] = Some(Pcb {
            pid: SUPERVISOR_PID,
            ppid: SUPERVISOR_PID,
            name: "system".to_string(),
            argument: String::new(),
            state: ProcessState::Running,
            children: Vec::new(),
            threads: vec![tcb],
            working_dir: None,
            owned_fds: Vec::new(),
        });
        log::info!("process: supervisor started");
        Ok(())
    }

    /// The pid owning the calling thread.
    #[must_use]
    pub fn current_pid(&self) -> Option<Pid> {
        self.threads.current().map(|tcb| tcb.pid)
    }

    /// Clone a new process running `program`'s initial thread.
    ///
    /// The child inherits the parent's working directory (taking its own
    /// reference) and receives the argument string plus the stdin/stdout
    /// handles in its register file. The argument is copied into the PCB;
    /// the child's pointer refers to that copy, not the caller's buffer.
    ///
    /// # Errors
    ///
    /// `FileNotFound` for unknown programs, `OutOfMemory` when the process
    /// table or host thread pool is exhausted.
    pub fn create_process(
        &self,
        kernel: &Arc<Kernel>,
        program: &str,
        argument: &str,
        stdin: Handle,
        stdout: Handle,
    ) -> Result<Tid> {
        let entry = kernel
            .programs()
            .resolve(program)
            .ok_or(KernelError::FileNotFound)?;

        let parent_pid = self.current_pid().unwrap_or(SUPERVISOR_PID);

        // The String's heap buffer keeps its address when the String moves
        // into the PCB below.
        let argument = argument.to_string();
        let mut registers = Registers::default();
        registers.set_argument(&argument);
        registers.set_std_handles(stdin, stdout);

        let (tid, gate) = {
            let mut table = sync::lock(&self.table);

            let pid = table.pids.get_free_pid().ok_or(KernelError::OutOfMemory)?;

            // The child holds its own reference on the inherited directory.
            let working_dir = table
                .pcb(parent_pid)
                .and_then(|parent| parent.working_dir.clone());
            let working_dir = match working_dir {
                Some(dir) => match self.vfs.acquire_directory(&dir, None) {
                    Ok(absolute) => Some(absolute),
                    Err(_) => None,
                },
                None => None,
            };

            let spawned = self
                .threads
                .create_thread(kernel, pid, entry, registers, program);
            let (tcb, gate) = match spawned {
                Ok(pair) => pair,
                Err(err) => {
                    table.pids.release_pid(pid);
                    if let Some(dir) = working_dir {
                        self.vfs.release_directory(&dir);
                    }
                    return Err(err);
                }
            };

            let tid = tcb.tid;
            table.slots[pid] = Some(Pcb {
                pid,
                ppid: parent_pid,
                name: program.to_string(),
                argument,
                state: ProcessState::Running,
                children: Vec::new(),
                threads: vec![tcb],
                working_dir,
                owned_fds: Vec::new(),
            });
            if let Some(parent) = table.pcb(parent_pid) {
                parent.children.push(pid);
            }
            log::debug!("process: cloned '{program}' as pid {pid} (parent {parent_pid})");
            (tid, gate)
        };

        gate.signal();
        Ok(tid)
    }

    /// Collect a terminated thread's exit code and clean its process up.
    ///
    /// Returns `Ok(None)` while the thread still runs.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for unknown thread ids.
    pub fn read_exit_code(&self, tid: Tid) -> Result<Option<ExitCode>> {
        match self.threads.take_exit_code(tid)? {
            None => Ok(None),
            Some((exit_code, pid)) => {
                self.check_process_state(pid);
                Ok(Some(exit_code))
            }
        }
    }

    /// Detach and erase every terminated thread of `pid`; when none remain,
    /// re-parent its live children and drop the PCB.
    pub fn check_process_state(&self, pid: Pid) {
        let cleanup = {
            let mut table = sync::lock(&self.table);
            let Some(pcb) = table.pcb(pid) else {
                return;
            };

            pcb.threads.retain(|tcb| {
                if tcb.is_terminated() {
                    drop(tcb.take_join_handle());
                    false
                } else {
                    true
                }
            });
            if !pcb.threads.is_empty() {
                return;
            }

            pcb.state = ProcessState::Terminated;
            let ppid = pcb.ppid;
            let children = std::mem::take(&mut pcb.children);
            let owned_fds = std::mem::take(&mut pcb.owned_fds);
            let working_dir = pcb.working_dir.take();
            let name = pcb.name.clone();

            table.slots[pid] = None;
            table.pids.release_pid(pid);

            let mut live_children = Vec::new();
            for child_pid in children {
                if let Some(child) = table.pcb(child_pid) {
                    if child.state == ProcessState::Running {
                        child.ppid = ppid;
                        live_children.push(child_pid);
                    }
                }
            }
            if let Some(parent) = table.pcb(ppid) {
                parent.children.extend(live_children);
            }

            log::debug!("process: pid {pid} ('{name}') removed");
            (owned_fds, working_dir)
        };

        let (owned_fds, working_dir) = cleanup;
        for fd in owned_fds {
            let _ = self.vfs.close(fd);
        }
        if let Some(dir) = working_dir {
            self.vfs.release_directory(&dir);
        }
    }

    /// Record that `pid` owns a descriptor slot.
    pub fn note_fd_opened(&self, pid: Pid, fd: Handle) {
        let mut table = sync::lock(&self.table);
        if let Some(pcb) = table.pcb(pid) {
            pcb.owned_fds.push(fd);
        }
    }

    /// Record that `pid` released a descriptor slot.
    pub fn note_fd_closed(&self, pid: Pid, fd: Handle) {
        let mut table = sync::lock(&self.table);
        if let Some(pcb) = table.pcb(pid) {
            pcb.owned_fds.retain(|owned| *owned != fd);
        }
    }

    /// The working directory of `pid`.
    #[must_use]
    pub fn working_dir(&self, pid: Pid) -> Option<String> {
        let mut table = sync::lock(&self.table);
        table.pcb(pid).and_then(|pcb| pcb.working_dir.clone())
    }

    /// Swap `pid`'s working directory, returning the previous one.
    pub fn swap_working_dir(&self, pid: Pid, new_dir: Option<String>) -> Option<String> {
        let mut table = sync::lock(&self.table);
        table
            .pcb(pid)
            .map(|pcb| std::mem::replace(&mut pcb.working_dir, new_dir))
            .unwrap_or(None)
    }

    /// Parent pid of `pid`, while the PCB exists.
    #[must_use]
    pub fn parent_of(&self, pid: Pid) -> Option<Pid> {
        let mut table = sync::lock(&self.table);
        table.pcb(pid).map(|pcb| pcb.ppid)
    }

    /// Child pids of `pid`.
    #[must_use]
    pub fn children_of(&self, pid: Pid) -> Vec<Pid> {
        let mut table = sync::lock(&self.table);
        table
            .pcb(pid)
            .map(|pcb| pcb.children.clone())
            .unwrap_or_default()
    }

    /// Whether a PCB for `pid` exists.
    #[must_use]
    pub fn process_exists(&self, pid: Pid) -> bool {
        let mut table = sync::lock(&self.table);
        table.pcb(pid).is_some()
    }

    /// Every thread id belonging to descendants of the supervisor.
    fn descendant_threads(table: &mut ProcessTable) -> Vec<Tid> {
        let mut tids = Vec::new();
        let mut queue = table
            .pcb(SUPERVISOR_PID)
            .map(|pcb| pcb.children.clone())
            .unwrap_or_default();
        let mut seen = HashMap::new();

        while let Some(pid) = queue.pop() {
            if seen.insert(pid, ()).is_some() {
                continue;
            }
            if let Some(pcb) = table.pcb(pid) {
                tids.extend(pcb.threads.iter().map(|tcb| tcb.tid));
                queue.extend(pcb.children.iter().copied());
            }
        }
        tids
    }

    /// Supervisor loop: drain exit codes of every descendant until shutdown.
    fn reap_loop(self: Arc<Self>) {
        log::debug!("process: reaper running");
        while !self.is_shutting_down() {
            // Contending with a working kernel thread would invert
            // priorities; skip the round instead of blocking.
            let handles = match self.table.try_lock() {
                Ok(mut table) => Self::descendant_threads(&mut table),
                Err(TryLockError::Poisoned(poisoned)) => {
                    Self::descendant_threads(&mut poisoned.into_inner())
                }
                Err(TryLockError::WouldBlock) => {
                    std::thread::yield_now();
                    continue;
                }
            };

            for tid in handles {
                let _ = self.read_exit_code(tid);
            }

            std::thread::sleep(REAP_INTERVAL);
        }
        log::debug!("process: reaper stopped");
    }

    /// Stop everything: join the supervisor, run terminate handlers, hard
    /// terminate handler-less threads, drain every exit code.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("process: shutdown requested");

        let caller = sync::current_thread_token();

        // The supervisor first: its join handle is the reaper thread.
        let supervisor_threads: Vec<Arc<Tcb>> = {
            let mut table = sync::lock(&self.table);
            table
                .pcb(SUPERVISOR_PID)
                .map(|pcb| pcb.threads.clone())
                .unwrap_or_default()
        };
        for tcb in supervisor_threads {
            if let Some(handle) = tcb.take_join_handle() {
                let _ = handle.join();
            }
            tcb.set_terminated(0);
            let _ = self.read_exit_code(tcb.tid);
        }

        let remaining: Vec<Arc<Tcb>> = {
            let mut table = sync::lock(&self.table);
            let mut threads = Vec::new();
            for pid in 0..MAX_PROCESSES {
                if pid == SUPERVISOR_PID {
                    continue;
                }
                if let Some(pcb) = table.pcb(pid) {
                    threads.extend(pcb.threads.iter().cloned());
                }
            }
            threads
        };

        for tcb in remaining {
            if tcb.tid == caller {
                // The requesting thread unwinds on its own once we return.
                tcb.set_terminated(0);
                let _ = self.read_exit_code(tcb.tid);
                continue;
            }

            if tcb.is_terminated() {
                // Already done, only needs draining.
            } else if let Some(handler) = tcb.terminate_handler() {
                let mut registers = Registers::default();
                handler(&mut registers);
                if let Some(handle) = tcb.take_join_handle() {
                    let _ = handle.join();
                }
            } else {
                // A host thread cannot be killed; record the termination
                // and detach it.
                tcb.set_terminated(0);
                drop(tcb.take_join_handle());
            }

            let _ = self.read_exit_code(tcb.tid);
        }
        log::info!("process: shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_manager_rotates() {
        let mut pids = PidManager::new();
        pids.claim(0);

        let first = pids.get_free_pid().unwrap();
        let second = pids.get_free_pid().unwrap();
        assert_ne!(first, 0);
        assert_ne!(first, second);

        assert!(pids.release_pid(first));
        // The cursor keeps moving instead of reusing the slot at once.
        let third = pids.get_free_pid().unwrap();
        assert_ne!(third, second);
    }

    #[test]
    fn test_pid_manager_guards_reserved_slots() {
        let mut pids = PidManager::new();
        assert!(!pids.release_pid(0));
        assert!(!pids.release_pid(MAX_PROCESSES - 1));
    }

    #[test]
    fn test_pid_manager_exhaustion() {
        let mut pids = PidManager::new();
        let mut granted = 0;
        while pids.get_free_pid().is_some() {
            granted += 1;
        }
        assert_eq!(granted, MAX_PROCESSES);
        assert!(pids.get_free_pid().is_none());

        assert!(pids.release_pid(1));
        assert_eq!(pids.get_free_pid(), Some(1));
    }
}
