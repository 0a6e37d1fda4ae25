// kernel/src/hal/console.rs
//! Console device behind the stdio mount

use std::io::{Read, Write};
use std::sync::Mutex;

use vesta_os_abi::{KernelError, Result};

use crate::sync;

/// Byte-stream console as seen by the stdio filesystem.
pub trait Console: Send + Sync {
    /// Read up to `buf.len()` bytes; 0 means end of input.
    ///
    /// # Errors
    ///
    /// `IoError` when the underlying stream fails.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf`, returning the byte count.
    ///
    /// # Errors
    ///
    /// `IoError` when the underlying stream fails.
    fn write(&self, buf: &[u8]) -> Result<usize>;
}

/// Console mapped onto the host process's stdin/stdout.
#[derive(Default)]
pub struct HostConsole {
    // One writer at a time so interleaved lines stay whole.
    write_lock: Mutex<()>,
}

impl HostConsole {
    /// Create a console over the host's standard streams.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Console for HostConsole {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        std::io::stdin()
            .read(buf)
            .map_err(|_| KernelError::IoError)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let _w = sync::lock(&self.write_lock);
        let mut stdout = std::io::stdout();
        stdout.write_all(buf).map_err(|_| KernelError::IoError)?;
        stdout.flush().map_err(|_| KernelError::IoError)?;
        Ok(buf.len())
    }
}

/// In-memory console for tests: scripted input, captured output.
#[derive(Default)]
pub struct BufferConsole {
    input: Mutex<Vec<u8>>,
    output: Mutex<Vec<u8>>,
}

impl BufferConsole {
    /// Create a console whose reads drain `input`.
    #[must_use]
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: Mutex::new(input.to_vec()),
            output: Mutex::new(Vec::new()),
        }
    }

    /// Everything written so far.
    #[must_use]
    pub fn output(&self) -> Vec<u8> {
        sync::lock(&self.output).clone()
    }
}

impl Console for BufferConsole {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut input = sync::lock(&self.input);
        let n = buf.len().min(input.len());
        buf[..n].copy_from_slice(&input[..n]);
        input.drain(..n);
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        sync::lock(&self.output).extend_from_slice(buf);
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_console_echo() {
        let console = BufferConsole::with_input(b"hello");
        let mut buf = [0u8; 3];

        assert_eq!(console.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(console.read(&mut buf).unwrap(), 2);

        console.write(b"out").unwrap();
        assert_eq!(console.output(), b"out");
    }
}
