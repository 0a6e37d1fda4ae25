// kernel/src/syscall/mod.rs
//! System call dispatcher
//!
//! A thin switch over the major/minor opcode in the simulated register
//! file. Handlers decode arguments, route into the VFS or the process and
//! thread managers, and report through `rax` plus the carry flag; every
//! failure path carries a [`KernelError`].
//!
//! Buffers arrive as raw pointer/length pairs. The "user programs" issuing
//! these calls are in-process host threads handing over live allocations,
//! so reconstruction is a pointer cast plus a null/UTF-8 check.

use std::sync::Arc;

use vesta_os_abi::{
    FileAttributes, FsCall, Handle, KernelError, ProcessCall, Registers, Result, SeekBase,
    ServiceClass, Tid,
};

use crate::loader::TerminateHandler;
use crate::sync;
use crate::Kernel;

#[cfg(test)]
mod tests;

/// Route one request into the kernel.
pub fn dispatch(kernel: &Arc<Kernel>, regs: &mut Registers) {
    let outcome = match ServiceClass::from_u8(regs.major()) {
        Some(ServiceClass::FileSystem) => handle_filesystem(kernel, regs),
        Some(ServiceClass::Process) => handle_process(kernel, regs),
        None => Err(KernelError::InvalidArgument),
    };

    match outcome {
        Ok(value) => regs.set_result(value),
        Err(error) => regs.set_error(error),
    }
}

fn user_slice<'a>(ptr: u64, len: u64) -> Result<&'a [u8]> {
    if ptr == 0 {
        return Err(KernelError::InvalidArgument);
    }
    // SAFETY: the calling thread passes the address of a live buffer it
    // owns for the duration of the call.
    Ok(unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) })
}

fn user_slice_mut<'a>(ptr: u64, len: u64) -> Result<&'a mut [u8]> {
    if ptr == 0 {
        return Err(KernelError::InvalidArgument);
    }
    // SAFETY: as above, and the caller guarantees exclusive access.
    Ok(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len as usize) })
}

/// Decode a path argument; undecodable paths are indistinguishable from
/// missing ones.
fn user_path<'a>(ptr: u64, len: u64) -> Result<&'a str> {
    let bytes = user_slice(ptr, len).map_err(|_| KernelError::FileNotFound)?;
    core::str::from_utf8(bytes).map_err(|_| KernelError::FileNotFound)
}

fn user_str<'a>(ptr: u64, len: u64) -> Result<&'a str> {
    let bytes = user_slice(ptr, len)?;
    core::str::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument)
}

fn handle_filesystem(kernel: &Arc<Kernel>, regs: &mut Registers) -> Result<u64> {
    let call = FsCall::from_u8(regs.minor()).ok_or(KernelError::InvalidArgument)?;
    let vfs = kernel.vfs();
    let processes = kernel.processes();
    let pid = processes.current_pid();
    let working_dir = pid.and_then(|pid| processes.working_dir(pid));

    match call {
        FsCall::Open => {
            let path = user_path(regs.rdx, regs.rcx)?;
            let attributes = FileAttributes::from_bits_truncate(regs.rdi as u8);
            let fd = vfs.open(path, working_dir.as_deref(), attributes)?;
            if let Some(pid) = pid {
                processes.note_fd_opened(pid, fd);
            }
            Ok(u64::from(fd))
        }
        FsCall::Create => {
            let path = user_path(regs.rdx, regs.rcx)?;
            let attributes = FileAttributes::from_bits_truncate(regs.rdi as u8);
            let fd = vfs.create(path, working_dir.as_deref(), attributes)?;
            if let Some(pid) = pid {
                processes.note_fd_opened(pid, fd);
            }
            Ok(u64::from(fd))
        }
        FsCall::Close => {
            let fd = regs.rdx as Handle;
            vfs.close(fd)?;
            if let Some(pid) = pid {
                processes.note_fd_closed(pid, fd);
            }
            Ok(0)
        }
        FsCall::Read => {
            let fd = regs.rdx as Handle;
            let buf = user_slice_mut(regs.rdi, regs.rcx)?;
            let transferred = vfs.read(fd, buf)?;
            Ok(transferred as u64)
        }
        FsCall::Write => {
            let fd = regs.rdx as Handle;
            let buf = user_slice(regs.rdi, regs.rcx)?;
            let transferred = vfs.write(fd, buf)?;
            Ok(transferred as u64)
        }
        FsCall::Seek => {
            let fd = regs.rdx as Handle;
            let base = SeekBase::from_u8(regs.rcx as u8).ok_or(KernelError::InvalidArgument)?;
            let position = vfs.seek(fd, regs.rdi as i64, base)?;
            Ok(position as u64)
        }
        FsCall::SetSize => {
            let fd = regs.rdx as Handle;
            let base = SeekBase::from_u8(regs.rcx as u8).ok_or(KernelError::InvalidArgument)?;
            vfs.set_size(fd, regs.rdi as i64, base)?;
            Ok(0)
        }
        FsCall::Delete => {
            let path = user_path(regs.rdx, regs.rcx)?;
            vfs.delete(path, working_dir.as_deref())?;
            Ok(0)
        }
        FsCall::SetWorkingDir => {
            let path = user_path(regs.rdx, regs.rcx)?;
            let pid = pid.ok_or(KernelError::InvalidArgument)?;

            // Acquire the new directory before releasing the old one, so a
            // swap to the same directory never drops it from the table.
            let acquired = vfs.acquire_directory(path, working_dir.as_deref())?;
            let previous = processes.swap_working_dir(pid, Some(acquired));
            if let Some(previous) = previous {
                vfs.release_directory(&previous);
            }
            Ok(0)
        }
        FsCall::GetWorkingDir => {
            let buf = user_slice_mut(regs.rdi, regs.rcx)?;
            let Some(dir) = working_dir else {
                return Ok(0);
            };
            let bytes = dir.as_bytes();
            let copied = bytes.len().min(buf.len());
            buf[..copied].copy_from_slice(&bytes[..copied]);
            Ok(copied as u64)
        }
        FsCall::CreatePipe => {
            let out = user_slice_mut(regs.rdx, 2 * core::mem::size_of::<u64>() as u64)?;
            let (write_end, read_end) = vfs.create_pipe()?;
            out[..8].copy_from_slice(&u64::from(write_end).to_ne_bytes());
            out[8..16].copy_from_slice(&u64::from(read_end).to_ne_bytes());
            if let Some(pid) = pid {
                processes.note_fd_opened(pid, write_end);
                processes.note_fd_opened(pid, read_end);
            }
            Ok(0)
        }
    }
}

fn handle_process(kernel: &Arc<Kernel>, regs: &mut Registers) -> Result<u64> {
    let call = ProcessCall::from_u8(regs.minor()).ok_or(KernelError::InvalidArgument)?;
    let processes = kernel.processes();
    let threads = kernel.threads();

    match call {
        ProcessCall::Clone => {
            let program = user_str(regs.rdx, regs.rsi)?;
            let argument = if regs.rdi == 0 || regs.rcx == 0 {
                ""
            } else {
                user_str(regs.rdi, regs.rcx)?
            };
            let (stdin, stdout) = regs.std_handles();
            let tid = processes.create_process(kernel, program, argument, stdin, stdout)?;
            Ok(tid)
        }
        ProcessCall::WaitFor => {
            if regs.rdx == 0 || regs.rcx == 0 {
                return Err(KernelError::InvalidArgument);
            }
            // SAFETY: the caller passes its live array of thread ids.
            let tids = unsafe {
                core::slice::from_raw_parts(regs.rdx as *const Tid, regs.rcx as usize)
            };
            let terminated = threads.wait_for(tids)?;
            Ok(terminated)
        }
        ProcessCall::ReadExitCode => {
            match processes.read_exit_code(regs.rdx)? {
                Some(exit_code) => Ok(u64::from(exit_code)),
                // Still running; collecting the code must be retried.
                None => Err(KernelError::InvalidArgument),
            }
        }
        ProcessCall::Exit => {
            let tid = sync::current_thread_token();
            threads.thread_exit(tid, regs.rcx as u16);
            Ok(0)
        }
        ProcessCall::Shutdown => {
            processes.shutdown();
            Ok(0)
        }
        ProcessCall::RegisterSignalHandler => {
            let handler: Option<TerminateHandler> = if regs.rdx == 0 {
                None
            } else {
                // SAFETY: the caller passes one of its own handler
                // functions; the representation is a plain function
                // pointer.
                Some(unsafe {
                    core::mem::transmute::<usize, TerminateHandler>(regs.rdx as usize)
                })
            };
            threads.register_terminate_handler(handler)?;
            Ok(0)
        }
    }
}
