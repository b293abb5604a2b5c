//! # Inferior Trait
//!
//! The process-control interface consumed by capture and restore.
//!
//! Launching, stopping at breakpoints, reading and writing the target's
//! memory and registers, and enumerating its stack all belong to a debugger.
//! This trait is the narrow slice of that debugger the checkpoint engines
//! need. Each backend implements it with its own system APIs:
//!
//! - **Linux x86-64**: [`PtraceInferior`](crate::platform::linux::PtraceInferior)
//!   (`ptrace`, `/proc/<pid>/mem`, `/proc/<pid>/maps`)
//! - **Tests**: in-memory fakes
//!
//! ## Stop semantics
//!
//! Every method assumes the target is fully stopped. The engines never
//! resume the target between reads or writes; they call [`Inferior::resume`]
//! exactly once, at the end. Nothing here enforces exclusivity: no other
//! agent may stop, resume or modify the target while an engine runs.

use crate::error::{MappingError, StasisResult};
use crate::types::{Address, Frame, MappedRegion, RegisterName};

/// Process-control operations on a stopped target
pub trait Inferior
{
    /// Read one register of the stopped thread
    fn read_register(&self, name: RegisterName) -> StasisResult<u64>;

    /// Overwrite one register of the stopped thread
    fn write_register(&mut self, name: RegisterName, value: u64) -> StasisResult<()>;

    /// Read `len` bytes starting at `addr`
    ///
    /// ## Errors
    ///
    /// Fails if any byte of the range is not mapped or not readable.
    fn read_memory(&self, addr: Address, len: usize) -> StasisResult<Vec<u8>>;

    /// Write `data` starting at `addr`
    ///
    /// Write protection is bypassed the way a debugger would (e.g. writing
    /// code pages), but an unmapped destination fails with [`MappingError`].
    fn write_memory(&mut self, addr: Address, data: &[u8]) -> Result<(), MappingError>;

    /// Current mapping table, sorted by start address
    fn mappings(&self) -> StasisResult<Vec<MappedRegion>>;

    /// Ask the target to map at least `length` bytes starting at `addr`
    ///
    /// Backends round the request out to whole pages. The new mapping must
    /// be readable and writable.
    fn establish_mapping(&mut self, addr: Address, length: u64) -> Result<(), MappingError>;

    /// Stack frames from the innermost outwards
    fn stack_frames(&self) -> StasisResult<Vec<Frame>>;

    /// Let the target continue running
    fn resume(&mut self) -> StasisResult<()>;
}
