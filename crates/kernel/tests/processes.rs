//! Process-tree scenarios: wait-for-any across generations, re-parenting
//! of orphans, and supervisor reaping.
//!
//! Programs report through files on the volume; the test polls kernel-side
//! accessors because the reaper runs concurrently with every assertion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use vesta_os::abi::{FileAttributes, Registers, Tid};
use vesta_os::hal::console::BufferConsole;
use vesta_os::hal::RamDisk;
use vesta_os::loader::ProgramRegistry;
use vesta_os::process::SUPERVISOR_PID;
use vesta_os::{Kernel, Sys};

fn write_file(sys: &Sys, path: &str, bytes: &[u8]) {
    let fd = sys.create(path, FileAttributes::empty()).unwrap();
    sys.write(fd, bytes).unwrap();
    sys.close(fd).unwrap();
}

fn read_file(sys: &Sys, path: &str) -> Option<Vec<u8>> {
    let fd = sys.open(path, FileAttributes::READ_ONLY).ok()?;
    let mut buf = [0u8; 64];
    let n = sys.read(fd, &mut buf).unwrap_or(0);
    sys.close(fd).ok()?;
    Some(buf[..n].to_vec())
}

/// Poll `condition` for up to two seconds.
fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Grandchild: stays alive long enough to be orphaned and re-parented.
fn grandchild(_sys: Sys, _regs: Registers) -> u16 {
    std::thread::sleep(Duration::from_millis(600));
    0
}

/// Middle process: spawns the grandchild, reports its tid, exits at once.
fn middle(sys: Sys, _regs: Registers) -> u16 {
    let tid = sys.clone_process("grandchild", "", 0, 0).unwrap();
    write_file(&sys, "C:\\grandchild", &tid.to_le_bytes());
    5
}

/// Top process: spawns the middle process, waits for it, reports whether
/// wait-for-any returned the right thread, then lingers as the re-parent
/// target.
fn top(sys: Sys, _regs: Registers) -> u16 {
    let tid = sys.clone_process("middle", "", 0, 0).unwrap();
    let woken = sys.wait_for(&[tid]).unwrap();
    write_file(
        &sys,
        "C:\\waited",
        if woken == tid { b"ok" } else { b"wrong" },
    );
    std::thread::sleep(Duration::from_millis(300));
    0
}

fn boot() -> Arc<Kernel> {
    let programs = ProgramRegistry::new();
    programs.register("grandchild", grandchild);
    programs.register("middle", middle);
    programs.register("top", top);
    Kernel::bootstrap(
        Arc::new(RamDisk::new(512, 8192)),
        Arc::new(BufferConsole::default()),
        programs,
    )
    .expect("bootstrap failed")
}

#[test]
fn test_orphan_reparents_and_everything_is_reaped() {
    let kernel = boot();
    let sys = kernel.sys();

    let top_tid = sys.clone_process("top", "", 0, 0).unwrap();
    let top_pid = kernel
        .threads()
        .get(top_tid)
        .map(|tcb| tcb.pid)
        .expect("top process not yet registered");

    // The middle process reported its child and exited; wait-for-any in
    // the top process observed exactly the middle thread.
    assert!(eventually(|| read_file(&sys, "C:\\waited").is_some()));
    assert_eq!(read_file(&sys, "C:\\waited").unwrap(), b"ok");

    let grandchild_tid = Tid::from_le_bytes(
        read_file(&sys, "C:\\grandchild").unwrap().try_into().unwrap(),
    );
    let grandchild_pid = kernel
        .threads()
        .get(grandchild_tid)
        .map(|tcb| tcb.pid)
        .expect("grandchild exited too early");

    // The middle PCB goes away and its live child moves under the top
    // process.
    assert!(eventually(|| {
        kernel.processes().parent_of(grandchild_pid) == Some(top_pid)
    }));

    // Once the top process and the grandchild exit, the supervisor reaps
    // both and the child tree empties out.
    assert!(eventually(|| {
        !kernel.processes().process_exists(top_pid)
            && !kernel.processes().process_exists(grandchild_pid)
    }));
    assert!(eventually(|| kernel
        .processes()
        .children_of(SUPERVISOR_PID)
        .is_empty()));

    kernel.shutdown();
}

#[test]
fn test_child_inherits_working_directory() {
    let programs = ProgramRegistry::new();
    programs.register("pwd", |sys: Sys, _regs| {
        let mut buf = [0u8; 64];
        let n = sys.get_working_dir(&mut buf).unwrap();
        write_file(&sys, "C:\\pwd-out", &buf[..n]);
        0
    });
    let kernel = Kernel::bootstrap(
        Arc::new(RamDisk::new(512, 8192)),
        Arc::new(BufferConsole::default()),
        programs,
    )
    .unwrap();
    let sys = kernel.sys();

    write_file(&sys, "C:\\nest\\marker", b"x");
    sys.set_working_dir("C:\\nest").unwrap();

    let tid = sys.clone_process("pwd", "", 0, 0).unwrap();
    let _ = sys.wait_for(&[tid]);

    assert!(eventually(|| read_file(&sys, "C:\\pwd-out").is_some()));
    assert_eq!(read_file(&sys, "C:\\pwd-out").unwrap(), b"C:\\nest");

    kernel.shutdown();
}

#[test]
fn test_run_drives_initial_program_with_console() {
    fn init(sys: Sys, regs: Registers) -> u16 {
        let (_, stdout) = regs.std_handles();
        sys.write(stdout, b"boot ok\n").unwrap();
        42
    }

    let programs = ProgramRegistry::new();
    programs.register("init", init);
    let console = Arc::new(BufferConsole::default());
    let kernel = Kernel::bootstrap(
        Arc::new(RamDisk::new(512, 8192)),
        Arc::clone(&console) as Arc<dyn vesta_os::hal::Console>,
        programs,
    )
    .unwrap();

    kernel.run("init").unwrap();
    assert_eq!(console.output(), b"boot ok\n");
}

#[test]
fn test_terminate_handler_spares_thread_at_shutdown() {
    static FLAGGED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

    fn handler(_regs: &mut Registers) {
        FLAGGED.store(true, std::sync::atomic::Ordering::Release);
    }

    fn waiter(sys: Sys, _regs: Registers) -> u16 {
        sys.register_terminate_handler(Some(handler)).unwrap();
        while !FLAGGED.load(std::sync::atomic::Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(5));
        }
        0
    }

    let programs = ProgramRegistry::new();
    programs.register("waiter", waiter);
    let kernel = Kernel::bootstrap(
        Arc::new(RamDisk::new(512, 8192)),
        Arc::new(BufferConsole::default()),
        programs,
    )
    .unwrap();
    let sys = kernel.sys();

    let _tid = sys.clone_process("waiter", "", 0, 0).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    // Shutdown invokes the handler and joins the thread cooperatively.
    kernel.shutdown();
    assert!(FLAGGED.load(std::sync::atomic::Ordering::Acquire));
}
