//! # Symbol Lookup
//!
//! Resolves a function name to its runtime address so a launched program can
//! be stopped at a named checkpoint location.
//!
//! Names match either the raw symbol or its demangled path. A bare name like
//! `checkpoint` matches `app::checkpoint` as well, so Rust functions can be
//! named without their crate prefix. Position independent executables are
//! relocated by the load base observed in the target's mapping table.

use std::fs;
use std::path::Path;

use object::{Object, ObjectKind, ObjectSymbol};
use rustc_demangle::try_demangle;
use tracing::debug;

use crate::error::{StasisError, StasisResult};
use crate::types::{Address, MappedRegion};

/// Does symbol `raw` answer to the user-supplied `wanted` name?
pub(crate) fn symbol_matches(raw: &str, wanted: &str) -> bool
{
    if raw == wanted {
        return true;
    }
    let Ok(demangled) = try_demangle(raw) else {
        return false;
    };
    // `{:#}` drops the trailing hash
    let path = format!("{demangled:#}");
    path == wanted || path.strip_suffix(wanted).is_some_and(|prefix| prefix.ends_with("::"))
}

/// Link-time address of `name` in the object file `data`, and whether the
/// object is position independent
fn link_address(data: &[u8], name: &str) -> StasisResult<Option<(u64, bool)>>
{
    let file = object::File::parse(data)
        .map_err(|err| StasisError::InvalidArgument(format!("cannot parse executable: {err}")))?;
    let relocatable = file.kind() == ObjectKind::Dynamic;

    let address = file
        .symbols()
        .chain(file.dynamic_symbols())
        .filter(|symbol| symbol.is_definition() && symbol.address() != 0)
        .find(|symbol| symbol.name().is_ok_and(|raw| symbol_matches(raw, name)))
        .map(|symbol| symbol.address());

    Ok(address.map(|addr| (addr, relocatable)))
}

/// Start of the lowest mapping backed by `executable`
pub(crate) fn load_base(mappings: &[MappedRegion], executable: &Path) -> Option<Address>
{
    let wanted = executable.to_str()?;
    mappings
        .iter()
        .filter(|region| region.path.as_deref() == Some(wanted))
        .map(|region| region.start)
        .min()
}

/// Amount added to link-time addresses of `executable` at run time
///
/// Zero for fixed-address executables; the load base for position
/// independent ones.
pub(crate) fn load_bias(relocatable: bool, mappings: &[MappedRegion], executable: &Path) -> StasisResult<u64>
{
    if !relocatable {
        return Ok(0);
    }
    load_base(mappings, executable)
        .map(Address::value)
        .ok_or_else(|| StasisError::InvalidArgument(format!("{} is not mapped in the target", executable.display())))
}

/// Runtime address of function `name` inside `executable`
///
/// ## Errors
///
/// [`StasisError::InvalidArgument`] if the executable cannot be parsed, has
/// no such symbol, or is position independent but not mapped.
pub fn symbol_address(executable: &Path, name: &str, mappings: &[MappedRegion]) -> StasisResult<Address>
{
    let data = fs::read(executable)?;
    let (address, relocatable) = link_address(&data, name)?.ok_or_else(|| {
        StasisError::InvalidArgument(format!("symbol {name:?} not found in {}", executable.display()))
    })?;

    let bias = load_bias(relocatable, mappings, executable)?;
    let runtime = address.checked_add(bias).map(Address::new).ok_or_else(|| {
        StasisError::InvalidArgument(format!("symbol {name:?} relocates past the end of the address space"))
    })?;
    debug!(symbol = name, link = address, bias, runtime = %runtime, "resolved symbol");
    Ok(runtime)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::Permissions;

    #[test]
    fn test_plain_names_match_exactly()
    {
        assert!(symbol_matches("main", "main"));
        assert!(!symbol_matches("main", "mai"));
        assert!(!symbol_matches("checkpoint_all", "checkpoint"));
    }

    #[test]
    fn test_mangled_rust_names_match_by_path()
    {
        let raw = "_ZN3app10checkpoint17h0123456789abcdefE";
        assert!(symbol_matches(raw, "app::checkpoint"));
        assert!(symbol_matches(raw, "checkpoint"));
        assert!(!symbol_matches(raw, "point"));
        assert!(!symbol_matches(raw, "other::checkpoint"));
    }

    #[test]
    fn test_load_base_is_lowest_matching_mapping()
    {
        let exe = "/usr/bin/demo";
        let mappings = vec![
            MappedRegion::new(Address::new(0x5000), 0x1000, Permissions::READ_EXECUTE, Some(exe.to_string())),
            MappedRegion::new(Address::new(0x4000), 0x1000, Permissions::READ_ONLY, Some(exe.to_string())),
            MappedRegion::new(Address::new(0x1000), 0x1000, Permissions::READ_ONLY, Some("/lib/libc.so.6".into())),
        ];
        assert_eq!(load_base(&mappings, Path::new(exe)), Some(Address::new(0x4000)));
        assert_eq!(load_base(&mappings, Path::new("/usr/bin/other")), None);
    }

    #[test]
    fn test_load_bias()
    {
        let exe = Path::new("/usr/bin/demo");
        let mappings = vec![MappedRegion::new(
            Address::new(0x5555_5555_4000),
            0x1000,
            Permissions::READ_ONLY,
            Some("/usr/bin/demo".to_string()),
        )];
        assert_eq!(load_bias(false, &mappings, exe).unwrap(), 0);
        assert_eq!(load_bias(true, &mappings, exe).unwrap(), 0x5555_5555_4000);
        assert!(load_bias(true, &[], exe).is_err());
    }

    #[test]
    fn test_symbol_address_of_own_binary()
    {
        let exe = std::env::current_exe().unwrap();
        let err = symbol_address(&exe, "no_such_symbol_anywhere", &[]).unwrap_err();
        assert!(matches!(err, StasisError::InvalidArgument(_)));
    }
}
