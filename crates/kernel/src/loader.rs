// kernel/src/loader.rs
//! Program loader
//!
//! User programs are host functions registered by name; `clone` resolves a
//! name to its entrypoint here. This stands in for loading a program image
//! from disk.

use std::collections::HashMap;
use std::sync::Mutex;

use vesta_os_abi::{ExitCode, Registers};

use crate::sync;
use crate::Sys;

/// Entrypoint of a user program's initial thread.
pub type ThreadProc = fn(Sys, Registers) -> ExitCode;

/// Cooperative shutdown handler installed by a user thread.
pub type TerminateHandler = fn(&mut Registers);

/// Name-to-entrypoint registry.
#[derive(Default)]
pub struct ProgramRegistry {
    programs: Mutex<HashMap<String, ThreadProc>>,
}

impl ProgramRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a program under `name`, replacing any previous entry.
    pub fn register(&self, name: &str, entry: ThreadProc) {
        sync::lock(&self.programs).insert(name.to_string(), entry);
    }

    /// Resolve a program name to its entrypoint.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<ThreadProc> {
        sync::lock(&self.programs).get(name).copied()
    }
}
