//! # Memory Regions
//!
//! Enumeration of the target's writable regions, parsing of the Linux
//! mapping table, and coverage checks used by restore.

use tracing::trace;

use crate::error::{StasisError, StasisResult};
use crate::inferior::Inferior;
use crate::types::{Address, MappedRegion, MemoryKey, Permissions};

/// Lazily yield the writable regions of a stopped target
///
/// Read-only and execute-only regions are skipped, as are gaps between
/// mappings (they never appear in the table).
///
/// ## Errors
///
/// Returns [`StasisError::Introspection`] if the mapping table cannot be
/// read. Capture must abort in that case rather than save a partial image.
pub fn writable_regions<I>(inferior: &I) -> StasisResult<impl Iterator<Item = MappedRegion>>
where
    I: Inferior + ?Sized,
{
    let mappings = inferior.mappings().map_err(|err| match err {
        StasisError::Introspection(msg) => StasisError::Introspection(msg),
        other => StasisError::Introspection(format!("cannot read mapping table: {other}")),
    })?;

    Ok(mappings.into_iter().filter(|region| {
        let keep = region.is_writable();
        if !keep {
            trace!(start = %region.start, perms = %region.permissions, "skipping non-writable region");
        }
        keep
    }))
}

/// Parse the text of `/proc/<pid>/maps`
///
/// Each line is `start-end perms offset dev inode [path]`, with hexadecimal
/// addresses.
///
/// ```rust
/// use stasis_core::regions::parse_proc_maps;
///
/// let maps = "7ffd1000-7ffd3000 rw-p 00000000 00:00 0          [stack]\n";
/// let regions = parse_proc_maps(maps).unwrap();
/// assert_eq!(regions[0].length, 0x2000);
/// assert_eq!(regions[0].path.as_deref(), Some("[stack]"));
/// ```
///
/// ## Errors
///
/// Any malformed line is an [`StasisError::Introspection`].
pub fn parse_proc_maps(text: &str) -> StasisResult<Vec<MappedRegion>>
{
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_maps_line)
        .collect()
}

fn parse_maps_line(line: &str) -> StasisResult<MappedRegion>
{
    let malformed = |what: &str| StasisError::Introspection(format!("malformed maps line ({what}): {line:?}"));

    let mut columns = line.split_whitespace();
    let range = columns.next().ok_or_else(|| malformed("range"))?;
    let perms = columns.next().ok_or_else(|| malformed("permissions"))?;
    // offset, device, inode
    for what in ["offset", "device", "inode"] {
        columns.next().ok_or_else(|| malformed(what))?;
    }
    let path = columns.collect::<Vec<_>>().join(" ");

    let (start, end) = range.split_once('-').ok_or_else(|| malformed("range"))?;
    let start = u64::from_str_radix(start, 16).map_err(|_| malformed("start address"))?;
    let end = u64::from_str_radix(end, 16).map_err(|_| malformed("end address"))?;
    if end < start {
        return Err(malformed("end before start"));
    }
    let permissions: Permissions = perms.parse().map_err(|_| malformed("permissions"))?;

    Ok(MappedRegion::new(
        Address::new(start),
        end - start,
        permissions,
        (!path.is_empty()).then_some(path),
    ))
}

/// Sub-ranges of `key` not covered by any of `mappings`
///
/// `mappings` must be sorted by start address, as [`Inferior::mappings`]
/// returns them.
///
/// ```rust
/// use stasis_core::regions::uncovered_ranges;
/// use stasis_core::types::{Address, MappedRegion, MemoryKey, Permissions};
///
/// let maps = [MappedRegion::new(Address::new(0x2000), 0x1000, Permissions::READ_WRITE, None)];
/// let gaps = uncovered_ranges(&maps, MemoryKey::new(Address::new(0x1800), 0x2000));
/// assert_eq!(
///     gaps,
///     [
///         MemoryKey::new(Address::new(0x1800), 0x800),
///         MemoryKey::new(Address::new(0x3000), 0x800),
///     ]
/// );
/// ```
pub fn uncovered_ranges(mappings: &[MappedRegion], key: MemoryKey) -> Vec<MemoryKey>
{
    let mut gaps = Vec::new();
    let end = key.end();
    let mut cursor = key.address;

    for region in mappings {
        if cursor >= end {
            break;
        }
        if region.end() <= cursor {
            continue;
        }
        if region.start >= end {
            break;
        }
        if region.start > cursor {
            gaps.push(MemoryKey::new(cursor, region.start.value() - cursor.value()));
        }
        cursor = cursor.max(region.end());
    }

    if cursor < end {
        gaps.push(MemoryKey::new(cursor, end.value() - cursor.value()));
    }
    gaps
}

#[cfg(test)]
mod tests
{
    use super::*;

    const MAPS: &str = "\
55d0c0a00000-55d0c0a02000 r--p 00000000 fd:01 1835014                    /usr/bin/target
55d0c0a02000-55d0c0a05000 r-xp 00002000 fd:01 1835014                    /usr/bin/target
55d0c0a08000-55d0c0a09000 rw-p 00007000 fd:01 1835014                    /usr/bin/target
55d0c1a4e000-55d0c1a6f000 rw-p 00000000 00:00 0                          [heap]
7f1e2c000000-7f1e2c021000 rw-p 00000000 00:00 0
7ffd9f1e0000-7ffd9f201000 rw-p 00000000 00:00 0                          [stack]
7ffd9f3d4000-7ffd9f3d8000 r--p 00000000 00:00 0                          [vvar]
ffffffffff600000-ffffffffff601000 --xp 00000000 00:00 0                  [vsyscall]
";

    #[test]
    fn test_parse_proc_maps()
    {
        let regions = parse_proc_maps(MAPS).unwrap();
        assert_eq!(regions.len(), 8);

        assert_eq!(regions[0].start, Address::new(0x55d0_c0a0_0000));
        assert_eq!(regions[0].length, 0x2000);
        assert_eq!(regions[0].permissions, Permissions::READ_ONLY);
        assert_eq!(regions[0].path.as_deref(), Some("/usr/bin/target"));

        assert_eq!(regions[3].path.as_deref(), Some("[heap]"));
        assert!(regions[3].is_writable());

        assert_eq!(regions[4].path, None);
        assert!(regions[7].permissions.executable);
        assert!(!regions[7].permissions.readable);
    }

    #[test]
    fn test_parse_path_with_spaces()
    {
        let regions = parse_proc_maps("1000-2000 rw-s 00000000 00:05 42  /dev/shm/my file (deleted)\n").unwrap();
        assert_eq!(regions[0].path.as_deref(), Some("/dev/shm/my file (deleted)"));
        assert!(regions[0].permissions.shared);
    }

    #[test]
    fn test_parse_rejects_malformed_lines()
    {
        for bad in [
            "zzzz-2000 rw-p 00000000 00:00 0",
            "1000 rw-p 00000000 00:00 0",
            "2000-1000 rw-p 00000000 00:00 0",
            "1000-2000 rw-p",
            "1000-2000 rwzp 00000000 00:00 0",
        ] {
            let err = parse_proc_maps(bad).unwrap_err();
            assert!(matches!(err, StasisError::Introspection(_)), "{bad}");
        }
    }

    #[test]
    fn test_uncovered_fully_mapped()
    {
        let maps = parse_proc_maps(MAPS).unwrap();
        let key = MemoryKey::new(Address::new(0x55d0_c1a4_f000), 0x100);
        assert!(uncovered_ranges(&maps, key).is_empty());
    }

    #[test]
    fn test_uncovered_across_adjacent_mappings()
    {
        let maps = parse_proc_maps(MAPS).unwrap();
        // spans the r-- and r-x text mappings, which touch
        let key = MemoryKey::new(Address::new(0x55d0_c0a0_1000), 0x2000);
        assert!(uncovered_ranges(&maps, key).is_empty());
    }

    #[test]
    fn test_uncovered_entirely_unmapped()
    {
        let maps = parse_proc_maps(MAPS).unwrap();
        let key = MemoryKey::new(Address::new(0x7fff_0000), 16);
        assert_eq!(uncovered_ranges(&maps, key), vec![key]);
    }

    #[test]
    fn test_uncovered_zero_length()
    {
        assert!(uncovered_ranges(&[], MemoryKey::new(Address::new(0x1000), 0)).is_empty());
    }
}
