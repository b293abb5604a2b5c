//! # stasis-core
//!
//! Checkpoint capture and restore for native processes.
//!
//! A checkpoint is the state of a stopped process at one instant: every
//! register, the contents of every writable memory region, and the bytes of
//! labeled values reachable from the call stack. This crate provides:
//!
//! - [`capture`]: produce a [`Snapshot`](types::Snapshot) from a stopped target
//! - [`codec`]: the binary snapshot format
//! - [`restore`]: inject a snapshot into a fresh instance of the same program
//! - [`inferior`]: the process-control interface both engines run against
//!
//! ## Platform Support
//!
//! - **Linux x86-64**: [`platform::linux::PtraceInferior`]
//! - **Elsewhere**: bring your own [`Inferior`] implementation
//!
//! ## Why unsafe code is needed
//!
//! The Linux backend forks, traces and pokes other processes through
//! `ptrace(2)`. Those calls are wrapped in safe methods; everything outside
//! `platform` is safe code.

#![allow(unsafe_code)] // Required for ptrace, fork and waitpid

pub mod capture;
pub mod codec;
pub mod error;
pub mod inferior;
pub mod platform;
pub mod regions;
pub mod restore;
pub mod scanner;
pub mod tagged;
pub mod types;

pub use capture::Capturer;
pub use error::{MappingError, StasisError, StasisResult};
pub use inferior::Inferior;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use platform::linux::PtraceInferior;
pub use restore::{RestoreReport, Restorer};
pub use types::{Address, MemoryKey, RegisterName, RegisterSet, Snapshot};
