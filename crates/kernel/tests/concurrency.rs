//! Concurrent access scenarios: disjoint writers on one file, parallel
//! creators in one directory.

use std::sync::Arc;

use vesta_os::abi::{FileAttributes, SeekBase};
use vesta_os::hal::console::BufferConsole;
use vesta_os::hal::RamDisk;
use vesta_os::loader::ProgramRegistry;
use vesta_os::Kernel;

const REGION: usize = 2048;

fn boot() -> Arc<Kernel> {
    Kernel::bootstrap(
        Arc::new(RamDisk::new(512, 8192)),
        Arc::new(BufferConsole::default()),
        ProgramRegistry::new(),
    )
    .expect("bootstrap failed")
}

#[test]
fn test_disjoint_writers_do_not_corrupt_each_other() {
    let kernel = boot();
    let sys = kernel.sys();

    // Pre-size the file so both writers find their clusters allocated.
    let fd = sys.create("C:\\shared.bin", FileAttributes::empty()).unwrap();
    sys.set_size(fd, (2 * REGION) as i64, SeekBase::Beginning)
        .unwrap();
    sys.close(fd).unwrap();

    let mut workers = Vec::new();
    for (index, fill) in [(0usize, 0xAAu8), (1usize, 0xBBu8)] {
        let sys = kernel.sys();
        workers.push(std::thread::spawn(move || {
            let fd = sys
                .open("C:\\shared.bin", FileAttributes::empty())
                .unwrap();
            sys.seek(fd, (index * REGION) as i64, SeekBase::Beginning)
                .unwrap();
            let written = sys.write(fd, &vec![fill; REGION]).unwrap();
            sys.close(fd).unwrap();
            written
        }));
    }
    for worker in workers {
        assert_eq!(worker.join().unwrap(), REGION);
    }

    let fd = sys
        .open("C:\\shared.bin", FileAttributes::READ_ONLY)
        .unwrap();
    let mut content = vec![0u8; 2 * REGION];
    assert_eq!(sys.read(fd, &mut content).unwrap(), 2 * REGION);
    sys.close(fd).unwrap();

    assert!(content[..REGION].iter().all(|&b| b == 0xAA));
    assert!(content[REGION..].iter().all(|&b| b == 0xBB));

    kernel.shutdown();
}

#[test]
fn test_parallel_creates_in_separate_directories() {
    let kernel = boot();

    let mut workers = Vec::new();
    for index in 0..8 {
        let sys = kernel.sys();
        workers.push(std::thread::spawn(move || {
            let fd = sys
                .create(&format!("C:\\d{index}\\file"), FileAttributes::empty())
                .unwrap();
            sys.write(fd, format!("payload {index}").as_bytes()).unwrap();
            sys.close(fd).unwrap();
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let sys = kernel.sys();
    for index in 0..8 {
        let fd = sys
            .open(&format!("C:\\d{index}\\file"), FileAttributes::READ_ONLY)
            .unwrap();
        let mut buf = [0u8; 32];
        let n = sys.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], format!("payload {index}").as_bytes());
        sys.close(fd).unwrap();
    }

    kernel.shutdown();
}
