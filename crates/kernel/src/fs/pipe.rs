// kernel/src/fs/pipe.rs
//! Blocking in-memory pipe
//!
//! A bounded byte queue with two condition variables. The two endpoints are
//! two descriptors pointing at the same file object; the capability bits
//! tell them apart. Data is delivered in strict FIFO order; interleaving of
//! multiple writers is at byte granularity.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};

use vesta_os_abi::{FileAttributes, KernelError, Result};

use crate::sync;
use crate::vfs::descriptor::Capabilities;
use crate::vfs::file::File;

/// Ring-buffer capacity in bytes.
pub const PIPE_CAPACITY: usize = 4096;

struct PipeState {
    buffer: VecDeque<u8>,
    readers: u32,
    writers: u32,
}

/// A pipe file object shared by its two endpoint descriptors.
pub struct Pipe {
    state: Mutex<PipeState>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipe {
    /// Create a pipe with one reader and one writer endpoint outstanding.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PipeState {
                buffer: VecDeque::with_capacity(PIPE_CAPACITY),
                readers: 1,
                writers: 1,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }
}

impl File for Pipe {
    fn attributes(&self) -> FileAttributes {
        FileAttributes::empty()
    }

    fn read(&self, buf: &mut [u8], _position: usize) -> Result<usize> {
        if buf.is_empty() {
            return Err(KernelError::InvalidArgument);
        }

        let mut state = sync::lock(&self.state);
        while state.buffer.is_empty() {
            if state.writers == 0 {
                // Writers gone and the buffer drained: end of stream.
                return Ok(0);
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let mut read = 0;
        while read < buf.len() {
            let Some(byte) = state.buffer.pop_front() else {
                break;
            };
            buf[read] = byte;
            read += 1;
        }
        drop(state);

        self.not_full.notify_all();
        Ok(read)
    }

    fn write(&self, buf: &[u8], _position: usize) -> Result<usize> {
        if buf.is_empty() {
            return Err(KernelError::InvalidArgument);
        }

        let mut state = sync::lock(&self.state);
        let mut written = 0;
        while written < buf.len() {
            if state.readers == 0 {
                drop(state);
                self.not_empty.notify_all();
                if written == 0 {
                    return Err(KernelError::BrokenPipe);
                }
                return Ok(written);
            }

            if state.buffer.len() == PIPE_CAPACITY {
                self.not_empty.notify_all();
                state = self
                    .not_full
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }

            let room = PIPE_CAPACITY - state.buffer.len();
            let take = room.min(buf.len() - written);
            state
                .buffer
                .extend(buf[written..written + take].iter().copied());
            written += take;
        }
        drop(state);

        self.not_empty.notify_all();
        Ok(written)
    }

    fn close(&self, caps: Capabilities) {
        let mut state = sync::lock(&self.state);
        if caps.contains(Capabilities::WRITE) && state.writers > 0 {
            state.writers -= 1;
        }
        if caps.contains(Capabilities::READ) && state.readers > 0 {
            state.readers -= 1;
        }
        drop(state);

        // Wake both sides so blocked peers observe the closed endpoint.
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_roundtrip() {
        let pipe = Pipe::new();
        pipe.write(b"abc", 0).unwrap();
        pipe.write(b"def", 0).unwrap();

        let mut buf = [0u8; 8];
        let n = pipe.read(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"abcdef");
    }

    #[test]
    fn test_eof_after_writer_close() {
        let pipe = Pipe::new();
        pipe.write(b"tail", 0).unwrap();
        pipe.close(Capabilities::WRITE);

        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf, 0).unwrap(), 4);
        assert_eq!(pipe.read(&mut buf, 0).unwrap(), 0);
    }

    #[test]
    fn test_write_into_closed_reader_is_broken_pipe() {
        let pipe = Pipe::new();
        pipe.close(Capabilities::READ);
        assert_eq!(pipe.write(b"x", 0), Err(KernelError::BrokenPipe));
    }

    #[test]
    fn test_blocking_write_resumes_after_read() {
        let pipe = Arc::new(Pipe::new());
        let payload = vec![9u8; PIPE_CAPACITY + 100];

        let writer = {
            let pipe = Arc::clone(&pipe);
            let payload = payload.clone();
            std::thread::spawn(move || pipe.write(&payload, 0).unwrap())
        };

        let mut received = Vec::new();
        let mut buf = [0u8; 512];
        while received.len() < payload.len() {
            let n = pipe.read(&mut buf, 0).unwrap();
            received.extend_from_slice(&buf[..n]);
        }

        assert_eq!(writer.join().unwrap(), payload.len());
        assert_eq!(received, payload);
    }

    #[test]
    fn test_blocking_read_waits_for_data() {
        let pipe = Arc::new(Pipe::new());

        let reader = {
            let pipe = Arc::clone(&pipe);
            std::thread::spawn(move || {
                let mut buf = [0u8; 4];
                let n = pipe.read(&mut buf, 0).unwrap();
                buf[..n].to_vec()
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        pipe.write(b"ok", 0).unwrap();
        assert_eq!(reader.join().unwrap(), b"ok");
    }
}
