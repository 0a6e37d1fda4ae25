// kernel/src/syscall/tests.rs
//! Dispatcher-level tests: requests enter through the register file and
//! results come back in `rax` plus the carry flag.

use std::sync::Arc;

use vesta_os_abi::{
    FileAttributes, FsCall, KernelError, Registers, SeekBase, ServiceClass,
};

use crate::hal::console::BufferConsole;
use crate::hal::RamDisk;
use crate::loader::ProgramRegistry;
use crate::Kernel;

fn boot() -> Arc<Kernel> {
    boot_with(ProgramRegistry::new())
}

fn boot_with(programs: ProgramRegistry) -> Arc<Kernel> {
    Kernel::bootstrap(
        Arc::new(RamDisk::new(512, 8192)),
        Arc::new(BufferConsole::default()),
        programs,
    )
    .expect("bootstrap failed")
}

#[test]
fn test_unknown_major_is_invalid() {
    let kernel = boot();
    let mut regs = Registers::default();
    regs.rax = 0x77_00;
    kernel.sys_call(&mut regs);
    assert_eq!(regs.result(), Err(KernelError::InvalidArgument));
    kernel.shutdown();
}

#[test]
fn test_unknown_minor_is_invalid() {
    let kernel = boot();
    let mut regs = Registers::syscall(ServiceClass::FileSystem, 0xEE);
    kernel.sys_call(&mut regs);
    assert_eq!(regs.result(), Err(KernelError::InvalidArgument));
    kernel.shutdown();
}

#[test]
fn test_open_missing_file_sets_carry() {
    let kernel = boot();
    let path = "C:\\missing.txt";
    let mut regs = Registers::syscall(ServiceClass::FileSystem, FsCall::Open as u8);
    regs.rdx = path.as_ptr() as u64;
    regs.rcx = path.len() as u64;
    kernel.sys_call(&mut regs);
    assert!(regs.carry);
    assert_eq!(regs.result(), Err(KernelError::FileNotFound));
    kernel.shutdown();
}

#[test]
fn test_null_buffer_is_rejected() {
    let kernel = boot();
    let mut regs = Registers::syscall(ServiceClass::FileSystem, FsCall::Read as u8);
    regs.rdx = 0;
    regs.rdi = 0;
    regs.rcx = 16;
    kernel.sys_call(&mut regs);
    assert!(regs.carry);
    kernel.shutdown();
}

#[test]
fn test_file_roundtrip_through_registers() {
    let kernel = boot();
    let sys = kernel.sys();

    let fd = sys.create("C:\\notes\\t.txt", FileAttributes::empty()).unwrap();
    assert_eq!(sys.write(fd, b"register file").unwrap(), 13);
    assert_eq!(sys.seek(fd, 0, SeekBase::Beginning).unwrap(), 0);

    let mut buf = [0u8; 32];
    let n = sys.read(fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"register file");

    // End-relative addressing: one past the last byte.
    assert_eq!(sys.seek(fd, 0, SeekBase::End).unwrap(), 13);
    sys.close(fd).unwrap();
    kernel.shutdown();
}

#[test]
fn test_working_dir_roundtrip_is_normalized() {
    let kernel = boot();
    let sys = kernel.sys();

    let fd = sys.create("C:\\home\\u\\keep", FileAttributes::empty()).unwrap();
    sys.close(fd).unwrap();

    sys.set_working_dir("C:\\home\\.\\u\\..\\u").unwrap();

    let mut buf = [0u8; 64];
    let n = sys.get_working_dir(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"C:\\home\\u");

    // Relative paths resolve against it.
    let fd = sys.open("keep", FileAttributes::READ_ONLY).unwrap();
    sys.close(fd).unwrap();
    kernel.shutdown();
}

#[test]
fn test_delete_through_registers() {
    let kernel = boot();
    let sys = kernel.sys();

    let fd = sys.create("C:\\gone", FileAttributes::empty()).unwrap();
    sys.close(fd).unwrap();
    sys.delete("C:\\gone").unwrap();
    assert_eq!(
        sys.open("C:\\gone", FileAttributes::READ_ONLY).err(),
        Some(KernelError::FileNotFound)
    );
    kernel.shutdown();
}

#[test]
fn test_pipe_handles_land_in_caller_array() {
    let kernel = boot();
    let sys = kernel.sys();

    let (write_end, read_end) = sys.create_pipe().unwrap();
    assert_ne!(write_end, read_end);

    sys.write(write_end, b"wired").unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(sys.read(read_end, &mut buf).unwrap(), 5);

    sys.close(write_end).unwrap();
    sys.close(read_end).unwrap();
    kernel.shutdown();
}

#[test]
fn test_clone_unknown_program_fails() {
    let kernel = boot();
    let sys = kernel.sys();
    assert_eq!(
        sys.clone_process("no-such-program", "", 0, 0).err(),
        Some(KernelError::FileNotFound)
    );
    kernel.shutdown();
}

#[test]
fn test_clone_and_wait_for_child() {
    let programs = ProgramRegistry::new();
    programs.register("child", |sys: crate::Sys, regs: Registers| {
        // Echo the argument into a file so the parent can observe it ran.
        let fd = sys.create("C:\\out", FileAttributes::empty()).unwrap();
        sys.write(fd, regs.argument().as_bytes()).unwrap();
        sys.close(fd).unwrap();
        7
    });
    let kernel = boot_with(programs);
    let sys = kernel.sys();

    // The argument travels by address; the kernel copies it into the new
    // process, so dropping the caller's string afterwards is fine.
    let argument = String::from("-v C:\\out");
    let tid = sys.clone_process("child", &argument, 0, 0).unwrap();
    drop(argument);
    assert_eq!(sys.wait_for(&[tid]).unwrap(), tid);

    let fd = sys.open("C:\\out", FileAttributes::READ_ONLY).unwrap();
    let mut buf = [0u8; 32];
    let n = sys.read(fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"-v C:\\out");
    sys.close(fd).unwrap();

    // The reaper may have collected the code first; both outcomes are
    // legitimate.
    match sys.read_exit_code(tid) {
        Ok(code) => assert_eq!(code, 7),
        Err(err) => assert_eq!(err, KernelError::InvalidArgument),
    }
    kernel.shutdown();
}
