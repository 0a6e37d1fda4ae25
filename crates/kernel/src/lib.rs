// kernel/src/lib.rs
//! vesta-os kernel core
//!
//! A hosted teaching kernel: virtual file system, FAT-style volume driver,
//! pipes, and process/thread supervision. User threads are host threads;
//! they talk to the kernel exclusively through the register-encoded
//! syscall surface defined in `vesta-os-abi`.
//!
//! The [`Kernel`] aggregate replaces the usual global singletons:
//! initialization is ordered (thread manager, process manager, VFS,
//! filesystems) and shutdown reverses it.

#![warn(missing_docs)]

pub mod fs;
pub mod hal;
pub mod loader;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod thread;
pub mod vfs;

pub use vesta_os_abi as abi;

use std::sync::Arc;

use abi::{
    ExitCode, FileAttributes, Handle, Registers, Result, SeekBase, ServiceClass, Tid,
};

use fs::fat::FatFilesystem;
use fs::stdio::StdioFilesystem;
use hal::{BlockDevice, Console, DiskAdapter};
use loader::{ProgramRegistry, TerminateHandler};
use process::{ProcessManager, SUPERVISOR_PID};
use thread::ThreadManager;
use vfs::VirtualFileSystem;

/// The kernel service aggregate.
pub struct Kernel {
    programs: ProgramRegistry,
    threads: Arc<ThreadManager>,
    processes: Arc<ProcessManager>,
    vfs: Arc<VirtualFileSystem>,
}

impl Kernel {
    /// Bring the kernel up over a boot disk and a console.
    ///
    /// Order: thread manager, process manager (supervisor and reaper), VFS,
    /// filesystem registration, mounts (`stdio`, then `C` on the disk). The
    /// supervisor's working directory is the volume root.
    ///
    /// # Errors
    ///
    /// Propagates mount and format failures.
    pub fn bootstrap(
        disk: Arc<dyn BlockDevice>,
        console: Arc<dyn Console>,
        programs: ProgramRegistry,
    ) -> Result<Arc<Self>> {
        let threads = Arc::new(ThreadManager::new());
        let vfs = Arc::new(VirtualFileSystem::new());
        let processes = Arc::new(ProcessManager::new(Arc::clone(&threads), Arc::clone(&vfs)));

        let kernel = Arc::new(Self {
            programs,
            threads,
            processes: Arc::clone(&processes),
            vfs: Arc::clone(&vfs),
        });

        processes.start_supervisor()?;

        vfs.register_filesystem(Arc::new(StdioFilesystem::new(console)))?;
        vfs.register_filesystem(Arc::new(FatFilesystem::new()))?;
        vfs.mount("stdio", "stdio", None)?;
        vfs.mount("fat", "C", Some(Arc::new(DiskAdapter::new(disk))))?;

        let root = vfs.acquire_directory("C:\\", None)?;
        processes.swap_working_dir(SUPERVISOR_PID, Some(root));

        log::info!("kernel: initialized");
        Ok(kernel)
    }

    /// The program registry.
    #[must_use]
    pub fn programs(&self) -> &ProgramRegistry {
        &self.programs
    }

    /// The thread manager.
    #[must_use]
    pub fn threads(&self) -> &Arc<ThreadManager> {
        &self.threads
    }

    /// The process manager.
    #[must_use]
    pub fn processes(&self) -> &Arc<ProcessManager> {
        &self.processes
    }

    /// The virtual file system.
    #[must_use]
    pub fn vfs(&self) -> &Arc<VirtualFileSystem> {
        &self.vfs
    }

    /// The single syscall entry point.
    pub fn sys_call(self: &Arc<Self>, regs: &mut Registers) {
        syscall::dispatch(self, regs);
    }

    /// A syscall handle for the calling thread.
    #[must_use]
    pub fn sys(self: &Arc<Self>) -> Sys {
        Sys::new(Arc::clone(self))
    }

    /// Run an initial program to completion, then shut the system down.
    ///
    /// The program gets the console as stdin and stdout. Mirrors the boot
    /// sequence: clone, wait-for, read exit code, shutdown.
    ///
    /// # Errors
    ///
    /// `FileNotFound` when `program` is not registered.
    pub fn run(self: &Arc<Self>, program: &str) -> Result<ExitCode> {
        let sys = self.sys();

        let stdin = sys.open("stdio:\\", FileAttributes::READ_ONLY)?;
        let stdout = sys.open("stdio:\\", FileAttributes::SYSTEM)?;

        let tid = sys.clone_process(program, "", stdin, stdout)?;
        let _ = sys.wait_for(&[tid]);
        // The reaper may already have drained the code.
        let exit_code = sys.read_exit_code(tid).unwrap_or(0);

        sys.shutdown();
        Ok(exit_code)
    }

    /// Request cooperative shutdown of every process and thread.
    pub fn shutdown(&self) {
        self.processes.shutdown();
    }
}

/// Handle through which user programs issue syscalls.
///
/// Every method builds the register file for one request, enters the
/// kernel through [`Kernel::sys_call`] and decodes `rax`/carry.
#[derive(Clone)]
pub struct Sys {
    kernel: Arc<Kernel>,
}

impl Sys {
    /// Create a handle bound to a kernel instance.
    #[must_use]
    pub fn new(kernel: Arc<Kernel>) -> Self {
        Self { kernel }
    }

    /// Issue a raw request.
    pub fn call(&self, regs: &mut Registers) {
        self.kernel.sys_call(regs);
    }

    fn fs_call(minor: abi::FsCall) -> Registers {
        Registers::syscall(ServiceClass::FileSystem, minor as u8)
    }

    fn process_call(minor: abi::ProcessCall) -> Registers {
        Registers::syscall(ServiceClass::Process, minor as u8)
    }

    /// Open an existing file.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn open(&self, path: &str, attributes: FileAttributes) -> Result<Handle> {
        let mut regs = Self::fs_call(abi::FsCall::Open);
        regs.rdx = path.as_ptr() as u64;
        regs.rcx = path.len() as u64;
        regs.rdi = u64::from(attributes.bits());
        self.call(&mut regs);
        regs.result().map(|value| value as Handle)
    }

    /// Create (or overwrite) a file.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn create(&self, path: &str, attributes: FileAttributes) -> Result<Handle> {
        let mut regs = Self::fs_call(abi::FsCall::Create);
        regs.rdx = path.as_ptr() as u64;
        regs.rcx = path.len() as u64;
        regs.rdi = u64::from(attributes.bits());
        self.call(&mut regs);
        regs.result().map(|value| value as Handle)
    }

    /// Close a descriptor.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn close(&self, fd: Handle) -> Result<()> {
        let mut regs = Self::fs_call(abi::FsCall::Close);
        regs.rdx = u64::from(fd);
        self.call(&mut regs);
        regs.result().map(|_| ())
    }

    /// Read into `buf`, returning the byte count.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn read(&self, fd: Handle, buf: &mut [u8]) -> Result<usize> {
        let mut regs = Self::fs_call(abi::FsCall::Read);
        regs.rdx = u64::from(fd);
        regs.rdi = buf.as_mut_ptr() as u64;
        regs.rcx = buf.len() as u64;
        self.call(&mut regs);
        regs.result().map(|value| value as usize)
    }

    /// Write `buf`, returning the byte count.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn write(&self, fd: Handle, buf: &[u8]) -> Result<usize> {
        let mut regs = Self::fs_call(abi::FsCall::Write);
        regs.rdx = u64::from(fd);
        regs.rdi = buf.as_ptr() as u64;
        regs.rcx = buf.len() as u64;
        self.call(&mut regs);
        regs.result().map(|value| value as usize)
    }

    /// Move the descriptor position, returning the new position.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn seek(&self, fd: Handle, offset: i64, base: SeekBase) -> Result<usize> {
        let mut regs = Self::fs_call(abi::FsCall::Seek);
        regs.rdx = u64::from(fd);
        regs.rdi = offset as u64;
        regs.rcx = u64::from(base as u8);
        self.call(&mut regs);
        regs.result().map(|value| value as usize)
    }

    /// Resize the file behind a descriptor.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn set_size(&self, fd: Handle, offset: i64, base: SeekBase) -> Result<()> {
        let mut regs = Self::fs_call(abi::FsCall::SetSize);
        regs.rdx = u64::from(fd);
        regs.rdi = offset as u64;
        regs.rcx = u64::from(base as u8);
        self.call(&mut regs);
        regs.result().map(|_| ())
    }

    /// Delete a file or empty directory.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn delete(&self, path: &str) -> Result<()> {
        let mut regs = Self::fs_call(abi::FsCall::Delete);
        regs.rdx = path.as_ptr() as u64;
        regs.rcx = path.len() as u64;
        self.call(&mut regs);
        regs.result().map(|_| ())
    }

    /// Create a pipe, returning `(write_end, read_end)`.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn create_pipe(&self) -> Result<(Handle, Handle)> {
        let mut ends = [0u64; 2];
        let mut regs = Self::fs_call(abi::FsCall::CreatePipe);
        regs.rdx = ends.as_mut_ptr() as u64;
        self.call(&mut regs);
        regs.result()
            .map(|_| (ends[0] as Handle, ends[1] as Handle))
    }

    /// Change the calling process's working directory.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn set_working_dir(&self, path: &str) -> Result<()> {
        let mut regs = Self::fs_call(abi::FsCall::SetWorkingDir);
        regs.rdx = path.as_ptr() as u64;
        regs.rcx = path.len() as u64;
        self.call(&mut regs);
        regs.result().map(|_| ())
    }

    /// Copy the working directory into `buf`, returning the byte count.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn get_working_dir(&self, buf: &mut [u8]) -> Result<usize> {
        let mut regs = Self::fs_call(abi::FsCall::GetWorkingDir);
        regs.rdi = buf.as_mut_ptr() as u64;
        regs.rcx = buf.len() as u64;
        self.call(&mut regs);
        regs.result().map(|value| value as usize)
    }

    /// Start a program in a new process, returning its initial thread id.
    ///
    /// The argument string reaches the program's initial thread through
    /// [`Registers::argument`].
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn clone_process(
        &self,
        program: &str,
        argument: &str,
        stdin: Handle,
        stdout: Handle,
    ) -> Result<Tid> {
        let mut regs = Self::process_call(abi::ProcessCall::Clone);
        regs.rdx = program.as_ptr() as u64;
        regs.rsi = program.len() as u64;
        regs.set_argument(argument);
        regs.set_std_handles(stdin, stdout);
        self.call(&mut regs);
        regs.result()
    }

    /// Block until one of `tids` terminates, returning it.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn wait_for(&self, tids: &[Tid]) -> Result<Tid> {
        let mut regs = Self::process_call(abi::ProcessCall::WaitFor);
        regs.rdx = tids.as_ptr() as u64;
        regs.rcx = tids.len() as u64;
        self.call(&mut regs);
        regs.result()
    }

    /// Collect a terminated thread's exit code.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` while the thread runs or when the code was already
    /// collected.
    pub fn read_exit_code(&self, tid: Tid) -> Result<ExitCode> {
        let mut regs = Self::process_call(abi::ProcessCall::ReadExitCode);
        regs.rdx = tid;
        self.call(&mut regs);
        regs.result().map(|value| value as ExitCode)
    }

    /// Record the calling thread's exit code; the thread should return from
    /// its entry function afterwards.
    pub fn exit(&self, exit_code: ExitCode) {
        let mut regs = Self::process_call(abi::ProcessCall::Exit);
        regs.rcx = u64::from(exit_code);
        self.call(&mut regs);
    }

    /// Install (or clear) the calling thread's terminate handler.
    ///
    /// # Errors
    ///
    /// As reported by the kernel.
    pub fn register_terminate_handler(&self, handler: Option<TerminateHandler>) -> Result<()> {
        let mut regs = Self::process_call(abi::ProcessCall::RegisterSignalHandler);
        regs.rdx = handler.map_or(0, |handler| handler as usize as u64);
        self.call(&mut regs);
        regs.result().map(|_| ())
    }

    /// Stop every process and thread.
    pub fn shutdown(&self) {
        let mut regs = Self::process_call(abi::ProcessCall::Shutdown);
        self.call(&mut regs);
    }
}
