//! # Error Types
//!
//! General error handling for checkpoint capture and restore.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

use crate::types::Address;

/// Main error type for checkpoint operations
///
/// Each variant is a distinct, inspectable failure. None of them is swallowed
/// inside this crate; they all surface to the driver that invoked capture or
/// restore.
///
/// ## Error Categories
///
/// 1. **Capture errors**: Introspection
/// 2. **Snapshot errors**: CorruptSnapshot
/// 3. **Restore errors**: RestoreMapping, Mapping
/// 4. **Process errors**: ProcessNotFound, Ptrace, InvalidArgument
/// 5. **I/O errors**: Io (snapshot files, `/proc` access)
#[derive(Error, Debug)]
pub enum StasisError
{
    /// The mapping table, a register, a memory range or the call stack of the
    /// target could not be read
    ///
    /// Capture aborts on this error; no snapshot file is written.
    #[error("Introspection failed: {0}")]
    Introspection(String),

    /// The snapshot byte stream is malformed
    ///
    /// This happens when:
    /// - The file is truncated
    /// - A declared element count implies a read past the end of the stream
    /// - A register name is not part of the fixed register list
    ///
    /// Decoding happens before restore touches the target, so a corrupt
    /// snapshot leaves the fresh process in its natural post-launch state.
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// A saved address could not be mapped in the fresh process, even after
    /// requesting a mapping and retrying once
    #[error("Cannot restore memory at {address}: {reason}")]
    RestoreMapping
    {
        /// First address of the range that could not be restored
        address: Address,
        /// What the process-control layer reported
        reason: String,
    },

    /// A write or mapping request failed at the process-control layer
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// The process with the given PID doesn't exist or has exited
    #[error("Process not found: PID {0}")]
    ProcessNotFound(u32),

    /// A `ptrace`/`waitpid` request failed
    #[error("ptrace {operation} failed: {details}")]
    Ptrace
    {
        /// Name of the request that failed (e.g. `PTRACE_GETREGS`)
        operation: &'static str,
        /// OS error text
        details: String,
    },

    /// Invalid argument passed to an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error (snapshot files, `/proc` files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to write to, or establish a mapping at, an address of the target
///
/// Returned by [`Inferior::write_memory`](crate::inferior::Inferior::write_memory)
/// and [`Inferior::establish_mapping`](crate::inferior::Inferior::establish_mapping).
/// The restore engine treats it as the signal to reconcile the destination.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No usable mapping for {length} bytes at {address}: {reason}")]
pub struct MappingError
{
    /// First address of the failed range
    pub address: Address,
    /// Length of the failed range in bytes
    pub length: u64,
    /// Description from the process-control layer
    pub reason: String,
}

impl MappingError
{
    /// Build a mapping error for `length` bytes at `address`.
    pub fn new(address: Address, length: u64, reason: impl Into<String>) -> Self
    {
        Self {
            address,
            length,
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for `Result<T, StasisError>`
///
/// ```rust
/// use stasis_core::error::StasisResult;
/// fn foo() -> StasisResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type StasisResult<T> = std::result::Result<T, StasisError>;
