//! # Types
//!
//! Platform-agnostic types shared by capture, the snapshot codec and restore.
//!
//! These types abstract away how the target is controlled, so the engines
//! work with addresses, registers and byte ranges without knowing whether
//! the process sits behind `ptrace` or a test double.

pub mod address;
pub mod layout;
pub mod memory;
pub mod registers;
pub mod snapshot;
pub mod stack;

// Re-export all public types
pub use address::Address;
pub use layout::{Discriminant, Field, TypeLayout, VariantCase};
pub use memory::{MappedRegion, MemoryKey, Permissions};
pub use registers::{RegisterName, RegisterSet, REGISTER_NAME_WIDTH};
pub use snapshot::{Snapshot, SnapshotSummary};
pub use stack::{Frame, Scope, Variable};
