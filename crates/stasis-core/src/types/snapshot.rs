//! In-memory form of a checkpoint.

use std::collections::BTreeMap;
use std::fmt;

use super::{MemoryKey, RegisterSet};

/// Register, memory and labeled-value state captured at one checkpoint
///
/// Built once by [`Capturer`](crate::capture::Capturer), serialized right
/// away, and rebuilt by [`decode`](crate::codec::decode) for each restore
/// attempt. Both byte maps are keyed by `(address, length)` in the capturing
/// process; ordered maps keep serialization byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot
{
    /// Saved register values
    pub registers: RegisterSet,
    /// Contents of every writable region (non-overlapping)
    pub regions: BTreeMap<MemoryKey, Vec<u8>>,
    /// Raw bytes of labeled values found on the stack (may overlap each other
    /// and the regions)
    pub values: BTreeMap<MemoryKey, Vec<u8>>,
}

impl Snapshot
{
    /// Create an empty snapshot
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Counts and byte totals, for logs and `inspect`
    pub fn summary(&self) -> SnapshotSummary
    {
        SnapshotSummary {
            registers: self.registers.len(),
            regions: self.regions.len(),
            region_bytes: self.regions.values().map(|b| b.len() as u64).sum(),
            values: self.values.len(),
            value_bytes: self.values.values().map(|b| b.len() as u64).sum(),
        }
    }
}

/// Size overview of a [`Snapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSummary
{
    /// Saved registers
    pub registers: usize,
    /// Saved memory regions
    pub regions: usize,
    /// Total bytes across regions
    pub region_bytes: u64,
    /// Saved labeled-value blobs
    pub values: usize,
    /// Total bytes across blobs
    pub value_bytes: u64,
}

impl fmt::Display for SnapshotSummary
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(
            f,
            "{} registers, {} regions ({} bytes), {} labeled blobs ({} bytes)",
            self.registers, self.regions, self.region_bytes, self.values, self.value_bytes
        )
    }
}
