//! # Checkpoint Capture
//!
//! Produces a [`Snapshot`] from a stopped target.
//!
//! Capture is strictly observational: it reads registers, writable memory
//! and labeled values, and never writes to the target. The phases run in a
//! fixed order (registers, regions, labeled values) while the target stays
//! stopped, so every piece of state comes from the same instant.

use std::path::Path;

use tracing::{debug, info, info_span};

use crate::codec;
use crate::error::{StasisError, StasisResult};
use crate::inferior::Inferior;
use crate::regions::writable_regions;
use crate::scanner::{capture_labeled, labeled_variables};
use crate::types::{RegisterName, RegisterSet, Snapshot};

/// Captures checkpoints from one stopped target
///
/// ## Example
///
/// ```rust,ignore
/// use stasis_core::capture::Capturer;
///
/// // `inferior` is stopped at the checkpoint location
/// let snapshot = Capturer::new(&mut inferior).capture_to("checkpoint.bin")?;
/// println!("{}", snapshot.summary());
/// ```
pub struct Capturer<'a, I: Inferior + ?Sized>
{
    inferior: &'a mut I,
}

impl<'a, I: Inferior + ?Sized> Capturer<'a, I>
{
    /// Wrap a stopped target
    pub fn new(inferior: &'a mut I) -> Self
    {
        Self { inferior }
    }

    /// Capture registers, writable regions and labeled values
    ///
    /// The target is left stopped and unmodified.
    ///
    /// ## Errors
    ///
    /// Any unreadable register, mapping table, region, stack or labeled value
    /// is a [`StasisError::Introspection`]; nothing partial is returned.
    pub fn capture(&self) -> StasisResult<Snapshot>
    {
        let _span = info_span!("capture").entered();
        let inferior: &I = &*self.inferior;

        let registers = read_registers(inferior)?;
        debug!(count = registers.len(), "registers captured");

        let mut snapshot = Snapshot {
            registers,
            ..Snapshot::default()
        };

        for region in writable_regions(inferior)? {
            let len = usize::try_from(region.length).map_err(|_| {
                StasisError::Introspection(format!("region at {} is too large to capture", region.start))
            })?;
            let bytes = inferior.read_memory(region.start, len).map_err(|err| {
                StasisError::Introspection(format!(
                    "cannot read writable region {} ({}): {err}",
                    region.key(),
                    region.path.as_deref().unwrap_or("anonymous")
                ))
            })?;
            debug!(start = %region.start, length = region.length, path = ?region.path, "region captured");
            snapshot.regions.insert(region.key(), bytes);
        }

        let frames = inferior
            .stack_frames()
            .map_err(|err| StasisError::Introspection(format!("cannot walk the stack: {err}")))?;
        for var in labeled_variables(frames) {
            for (key, bytes) in capture_labeled(inferior, &var)? {
                snapshot.values.insert(key, bytes);
            }
        }

        info!(summary = %snapshot.summary(), "checkpoint captured");
        Ok(snapshot)
    }

    /// Capture, write the snapshot to `path` (replacing any previous file),
    /// then resume the target
    ///
    /// The target is only resumed once the file has been written. If capture
    /// or writing fails, the target stays stopped and no file is produced.
    pub fn capture_to(self, path: impl AsRef<Path>) -> StasisResult<Snapshot>
    {
        let snapshot = self.capture()?;
        codec::write_snapshot(path, &snapshot)?;
        self.inferior.resume()?;
        Ok(snapshot)
    }
}

fn read_registers<I: Inferior + ?Sized>(inferior: &I) -> StasisResult<RegisterSet>
{
    RegisterName::ALL
        .iter()
        .map(|&name| {
            inferior
                .read_register(name)
                .map(|value| (name, value))
                .map_err(|err| StasisError::Introspection(format!("cannot read register {name}: {err}")))
        })
        .collect()
}
