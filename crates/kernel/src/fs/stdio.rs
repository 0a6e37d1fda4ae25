// kernel/src/fs/stdio.rs
//! Console-backed stdio filesystem
//!
//! A device-less mount whose every path resolves to the one console file.
//! Reads come from the host console input, writes go to its output; the
//! descriptor position is meaningless and ignored.

use std::sync::Arc;

use vesta_os_abi::{FileAttributes, KernelError, Result};

use crate::hal::Console;
use crate::vfs::file::File;
use crate::vfs::mount::{FileSystem, MountedFilesystem};
use crate::vfs::path::Path;

/// Driver name used when registering and mounting.
pub const STDIO_NAME: &str = "stdio";

/// The registered stdio driver.
pub struct StdioFilesystem {
    console: Arc<dyn Console>,
}

impl StdioFilesystem {
    /// Create the driver over a console device.
    #[must_use]
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self { console }
    }
}

impl FileSystem for StdioFilesystem {
    fn name(&self) -> &str {
        STDIO_NAME
    }

    fn create_mount(
        &self,
        label: &str,
        _device: Option<Arc<crate::hal::DiskAdapter>>,
    ) -> Result<Arc<dyn MountedFilesystem>> {
        Ok(Arc::new(StdioMount {
            label: label.to_string(),
            console: Arc::new(ConsoleFile {
                console: Arc::clone(&self.console),
            }),
        }))
    }
}

/// One mounted stdio instance.
pub struct StdioMount {
    label: String,
    console: Arc<ConsoleFile>,
}

impl MountedFilesystem for StdioMount {
    fn label(&self) -> &str {
        &self.label
    }

    fn open_file(&self, _path: &Path, _attributes: FileAttributes) -> Result<Arc<dyn File>> {
        Ok(Arc::clone(&self.console) as Arc<dyn File>)
    }

    fn create_file(&self, _path: &Path, _attributes: FileAttributes) -> Result<Arc<dyn File>> {
        Err(KernelError::PermissionDenied)
    }

    fn delete_file(&self, _path: &Path) -> Result<()> {
        Err(KernelError::PermissionDenied)
    }
}

/// The console as a file object.
pub struct ConsoleFile {
    console: Arc<dyn Console>,
}

impl File for ConsoleFile {
    fn attributes(&self) -> FileAttributes {
        FileAttributes::SYSTEM
    }

    fn read(&self, buf: &mut [u8], _position: usize) -> Result<usize> {
        self.console.read(buf)
    }

    fn write(&self, buf: &[u8], _position: usize) -> Result<usize> {
        self.console.write(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::console::BufferConsole;

    fn mounted() -> (Arc<BufferConsole>, Arc<dyn MountedFilesystem>) {
        let console = Arc::new(BufferConsole::with_input(b"typed input"));
        let fs = StdioFilesystem::new(Arc::clone(&console) as Arc<dyn Console>);
        let mount = fs.create_mount("stdio", None).unwrap();
        (console, mount)
    }

    fn root_path() -> Path {
        Path::normalize("stdio:\\", None).unwrap()
    }

    #[test]
    fn test_any_path_yields_console() {
        let (console, mount) = mounted();
        let file = mount
            .open_file(&root_path(), FileAttributes::empty())
            .unwrap();

        file.write(b"printed", 0).unwrap();
        assert_eq!(console.output(), b"printed");

        let mut buf = [0u8; 5];
        assert_eq!(file.read(&mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"typed");
    }

    #[test]
    fn test_create_and_delete_rejected() {
        let (_console, mount) = mounted();
        assert!(mount
            .create_file(&root_path(), FileAttributes::empty())
            .is_err());
        assert!(mount.delete_file(&root_path()).is_err());
    }
}
