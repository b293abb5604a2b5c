//! # Restore
//!
//! Injects a [`Snapshot`] into a freshly started instance of the same
//! program.
//!
//! Addresses in the snapshot come from the capturing run. The fresh process
//! may not have mapped all of them yet (heap growth, lazy allocation, ASLR),
//! so restore first reconciles:
//!
//! 1. Every saved range that is not covered by a current mapping gets an
//!    explicit mapping request, and is checked again.
//! 2. Every destination is proven writable by writing its current contents
//!    back unchanged. A destination that refuses gets one mapping request and
//!    one more attempt.
//!
//! Only when every destination has passed both steps does anything from the
//! snapshot get written. A destination that still cannot be mapped aborts the
//! restore with the target exactly as it was found.

use tracing::{debug, info, info_span, warn};

use crate::error::{MappingError, StasisError, StasisResult};
use crate::inferior::Inferior;
use crate::regions::uncovered_ranges;
use crate::types::{MemoryKey, Snapshot};

/// What a restore did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport
{
    /// Registers written
    pub registers: usize,
    /// Memory regions written
    pub regions: usize,
    /// Labeled-value blobs written
    pub values: usize,
    /// Mapping requests that had to be made
    pub mappings_established: usize,
}

/// Restores snapshots into one stopped target
///
/// ## Example
///
/// ```rust,ignore
/// use stasis_core::codec::read_snapshot;
/// use stasis_core::restore::Restorer;
///
/// // decode before touching the target: a corrupt file leaves it untouched
/// let snapshot = read_snapshot("checkpoint.bin")?;
/// Restorer::new(&mut inferior).restore(&snapshot)?;
/// ```
pub struct Restorer<'a, I: Inferior + ?Sized>
{
    inferior: &'a mut I,
}

impl<'a, I: Inferior + ?Sized> Restorer<'a, I>
{
    /// Wrap a stopped, freshly started target
    pub fn new(inferior: &'a mut I) -> Self
    {
        Self { inferior }
    }

    /// Restore `snapshot` and resume the target at the restored program
    /// counter
    pub fn restore(mut self, snapshot: &Snapshot) -> StasisResult<RestoreReport>
    {
        let report = self.apply(snapshot)?;
        self.inferior.resume()?;
        info!("target resumed from restored state");
        Ok(report)
    }

    /// Restore `snapshot` and leave the target stopped
    ///
    /// ## Errors
    ///
    /// [`StasisError::RestoreMapping`] if a saved range cannot be mapped even
    /// after one mapping request. Reconciliation catches this before any
    /// register or memory from the snapshot is written; only a target that
    /// loses a mapping between reconciliation and the write itself can fail
    /// part way.
    pub fn apply(&mut self, snapshot: &Snapshot) -> StasisResult<RestoreReport>
    {
        let _span = info_span!("restore").entered();
        let mut report = RestoreReport {
            mappings_established: self.reconcile(snapshot)?,
            ..RestoreReport::default()
        };

        for (name, value) in snapshot.registers.iter() {
            self.inferior.write_register(name, value)?;
            report.registers += 1;
        }
        debug!(count = report.registers, "registers restored");

        for (key, data) in &snapshot.regions {
            report.mappings_established += self.write_with_retry(*key, data)?;
            report.regions += 1;
        }
        for (key, data) in &snapshot.values {
            report.mappings_established += self.write_with_retry(*key, data)?;
            report.values += 1;
        }

        info!(
            registers = report.registers,
            regions = report.regions,
            values = report.values,
            mappings = report.mappings_established,
            "snapshot restored"
        );
        Ok(report)
    }

    /// Make sure every saved range is mapped and writable, before anything
    /// from the snapshot is written
    fn reconcile(&mut self, snapshot: &Snapshot) -> StasisResult<usize>
    {
        let mut established = self.map_gaps(snapshot)?;
        for key in snapshot.regions.keys().chain(snapshot.values.keys()) {
            established += self.prove_writable(*key)?;
        }

        if established > 0 {
            info!(established, "reconciled address layout");
        }
        Ok(established)
    }

    /// Request a mapping for every saved range the mapping table lacks
    fn map_gaps(&mut self, snapshot: &Snapshot) -> StasisResult<usize>
    {
        let mut mappings = self.inferior.mappings()?;
        let mut established = 0;

        for key in snapshot.regions.keys().chain(snapshot.values.keys()) {
            for gap in uncovered_ranges(&mappings, *key) {
                warn!(range = %gap, saved = %key, "destination not mapped, requesting mapping");
                self.inferior
                    .establish_mapping(gap.address, gap.length)
                    .map_err(restore_error)?;
                established += 1;

                mappings = self.inferior.mappings()?;
                if let Some(still) = uncovered_ranges(&mappings, gap).first() {
                    return Err(StasisError::RestoreMapping {
                        address: still.address,
                        reason: "range still unmapped after mapping request".to_string(),
                    });
                }
            }
        }
        Ok(established)
    }

    /// Write the destination's current bytes back over themselves
    ///
    /// A listed mapping can still refuse writes (a stale entry, a guard
    /// page). Finding that out here keeps the target untouched on abort.
    fn prove_writable(&mut self, key: MemoryKey) -> StasisResult<usize>
    {
        let len = usize::try_from(key.length).map_err(|_| StasisError::RestoreMapping {
            address: key.address,
            reason: format!("range {key} is too large"),
        })?;
        if len == 0 {
            return Ok(0);
        }
        let current = self
            .inferior
            .read_memory(key.address, len)
            .map_err(|err| StasisError::RestoreMapping {
                address: key.address,
                reason: format!("cannot read destination: {err}"),
            })?;
        let established = self.write_with_retry(key, &current)?;
        if established > 0 {
            debug!(range = %key, "destination remapped during reconciliation");
        }
        Ok(established)
    }

    /// Write one range; on a mapping failure, map it and retry once
    fn write_with_retry(&mut self, key: MemoryKey, data: &[u8]) -> StasisResult<usize>
    {
        if data.is_empty() {
            return Ok(0);
        }
        match self.inferior.write_memory(key.address, data) {
            Ok(()) => Ok(0),
            Err(err) => {
                warn!(range = %key, error = %err, "write failed, requesting mapping and retrying");
                self.inferior
                    .establish_mapping(key.address, key.length)
                    .map_err(restore_error)?;
                self.inferior.write_memory(key.address, data).map_err(restore_error)?;
                Ok(1)
            }
        }
    }
}

fn restore_error(err: MappingError) -> StasisError
{
    StasisError::RestoreMapping {
        address: err.address,
        reason: err.reason,
    }
}
