//! # Stack Scanner
//!
//! Finds labeled values reachable from the current call stack.
//!
//! Frames are walked from the innermost outwards; inside each frame, lexical
//! scopes from the innermost block outwards; inside each scope, variables in
//! declaration order. That order is the order blobs are discovered in. The
//! snapshot keys blobs by `(address, length)`, so the order only has to be
//! stable, not meaningful.

use tracing::{debug, trace};

use crate::error::{StasisError, StasisResult};
use crate::inferior::Inferior;
use crate::tagged::{LabeledLayout, ValueShape};
use crate::types::{Address, Frame, MemoryKey};

/// A variable whose static type classified as a labeled value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledVariable
{
    /// Function of the frame it was found in
    pub function: String,
    /// Source-level variable name
    pub name: String,
    /// Address of the labeled value
    pub address: Address,
    /// Size of the labeled value
    pub size: u64,
    /// Where the option and metadata live inside it
    pub layout: LabeledLayout,
}

/// Lazily yield every labeled variable in `frames`
///
/// Frames without a debug-info block are skipped, not treated as errors.
pub fn labeled_variables(frames: Vec<Frame>) -> impl Iterator<Item = LabeledVariable>
{
    frames
        .into_iter()
        .enumerate()
        .filter_map(|(depth, frame)| {
            let function = frame.display_name().to_string();
            let Frame { pc, scopes, .. } = frame;
            match scopes {
                Some(scopes) => {
                    trace!(depth, function = %function, scopes = scopes.len(), "scanning frame");
                    Some((function, scopes))
                }
                None => {
                    debug!(depth, function = %function, pc = %pc, "frame has no debug info, skipping");
                    None
                }
            }
        })
        .flat_map(|(function, scopes)| {
            scopes
                .into_iter()
                .flat_map(|scope| scope.variables)
                .filter_map(move |var| {
                    let layout = ValueShape::classify(&var.layout).labeled()?;
                    Some(LabeledVariable {
                        function: function.clone(),
                        name: var.name,
                        address: var.address,
                        size: var.size,
                        layout,
                    })
                })
        })
}

/// Read the bytes of one labeled value
///
/// The presence bytes are decoded first. A present value yields three blobs
/// (outer option, inner payload, metadata); an absent one yields two (outer
/// option, metadata) and its payload is never captured.
///
/// ## Errors
///
/// Any failed read is an [`StasisError::Introspection`].
pub fn capture_labeled<I>(inferior: &I, var: &LabeledVariable) -> StasisResult<Vec<(MemoryKey, Vec<u8>)>>
where
    I: Inferior + ?Sized,
{
    let presence_key = var.layout.presence_key(var.address);
    let presence_bytes = read_key(inferior, presence_key, &var.name)?;
    let present = var.layout.option.presence.is_present(&presence_bytes);
    debug!(name = %var.name, function = %var.function, address = %var.address, present, "capturing labeled value");

    var.layout
        .capture_keys(var.address, present)
        .into_iter()
        .map(|key| read_key(inferior, key, &var.name).map(|bytes| (key, bytes)))
        .collect()
}

fn read_key<I>(inferior: &I, key: MemoryKey, name: &str) -> StasisResult<Vec<u8>>
where
    I: Inferior + ?Sized,
{
    let len = usize::try_from(key.length)
        .map_err(|_| StasisError::Introspection(format!("labeled value {name} at {key} is too large")))?;
    inferior
        .read_memory(key.address, len)
        .map_err(|err| StasisError::Introspection(format!("cannot read labeled value {name} at {key}: {err}")))
}
