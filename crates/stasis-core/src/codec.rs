//! # Snapshot Codec
//!
//! Binary layout of a snapshot file. Everything is little-endian:
//!
//! ```text
//! u64 register_count
//! register_count × { char[8] name (NUL-padded), u64 value }
//! u64 region_count
//! region_count   × { u64 start_address, u64 length, byte[length] data }
//! u64 value_blob_count
//! value_blob_count × { u64 start_address, u64 length, byte[length] data }
//! ```
//!
//! There is no magic number or version field. A snapshot is only meaningful
//! for the exact build of the program it was captured from.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{StasisError, StasisResult};
use crate::types::{Address, MemoryKey, RegisterName, RegisterSet, Snapshot, REGISTER_NAME_WIDTH};

/// Bytes in one register record
const REGISTER_RECORD: usize = REGISTER_NAME_WIDTH + 8;
/// Bytes in a memory record header (address + length)
const MEMORY_HEADER: usize = 16;

/// Serialize a snapshot
///
/// Never fails: register names have a fixed width and every length is
/// taken from the data itself.
pub fn encode(snapshot: &Snapshot) -> Vec<u8>
{
    let region_bytes: usize = snapshot.regions.values().map(|d| d.len() + MEMORY_HEADER).sum();
    let value_bytes: usize = snapshot.values.values().map(|d| d.len() + MEMORY_HEADER).sum();
    let mut buf = Vec::with_capacity(24 + snapshot.registers.len() * REGISTER_RECORD + region_bytes + value_bytes);

    put_u64(&mut buf, snapshot.registers.len() as u64);
    for (name, value) in snapshot.registers.iter() {
        buf.extend_from_slice(&name.to_field());
        put_u64(&mut buf, value);
    }
    put_blobs(&mut buf, &snapshot.regions);
    put_blobs(&mut buf, &snapshot.values);
    buf
}

/// Serialize a snapshot into `writer`
pub fn encode_into<W: Write>(writer: &mut W, snapshot: &Snapshot) -> StasisResult<()>
{
    writer.write_all(&encode(snapshot))?;
    Ok(())
}

/// Deserialize a snapshot
///
/// ## Errors
///
/// [`StasisError::CorruptSnapshot`] if the stream is truncated, a count
/// implies reading past the end, a register name is not in the fixed set or
/// appears twice, a key appears twice, saved regions overlap, or bytes
/// follow the last blob.
pub fn decode(bytes: &[u8]) -> StasisResult<Snapshot>
{
    let mut reader = Reader::new(bytes);

    let register_count = reader.count("register", REGISTER_RECORD)?;
    let mut registers = RegisterSet::new();
    for _ in 0..register_count {
        let offset = reader.pos;
        let field: [u8; REGISTER_NAME_WIDTH] = reader
            .take(REGISTER_NAME_WIDTH, "register name")?
            .try_into()
            .map_err(|_| corrupt(offset, "register name"))?;
        let name = RegisterName::from_field(&field).map_err(|msg| corrupt(offset, &msg))?;
        let value = reader.u64("register value")?;
        if registers.set(name, value).is_some() {
            return Err(corrupt(offset, &format!("duplicate register {name}")));
        }
    }

    let regions = reader.blobs("region")?;
    if let Some((a, b)) = first_overlap(&regions) {
        return Err(StasisError::CorruptSnapshot(format!("regions {a} and {b} overlap")));
    }
    let values = reader.blobs("value blob")?;

    if reader.remaining() != 0 {
        return Err(corrupt(reader.pos, &format!("{} trailing bytes", reader.remaining())));
    }

    Ok(Snapshot {
        registers,
        regions,
        values,
    })
}

/// Deserialize a snapshot from `reader`, consuming it entirely
pub fn decode_from<R: Read>(reader: &mut R) -> StasisResult<Snapshot>
{
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode(&bytes)
}

/// Write a snapshot file, replacing any previous one
///
/// The whole image is encoded in memory, written to a temporary file next to
/// `path`, synced, and renamed over `path`. A failed write leaves the previous
/// file as it was.
pub fn write_snapshot(path: impl AsRef<Path>, snapshot: &Snapshot) -> StasisResult<()>
{
    let path = path.as_ref();
    let bytes = encode(snapshot);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(&bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    info!(path = %path.display(), bytes = bytes.len(), summary = %snapshot.summary(), "snapshot written");
    Ok(())
}

/// Read and decode a snapshot file
///
/// The file is read completely before decoding starts.
pub fn read_snapshot(path: impl AsRef<Path>) -> StasisResult<Snapshot>
{
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let snapshot = decode(&bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), summary = %snapshot.summary(), "snapshot read");
    Ok(snapshot)
}

fn put_u64(buf: &mut Vec<u8>, value: u64)
{
    let mut word = [0u8; 8];
    LittleEndian::write_u64(&mut word, value);
    buf.extend_from_slice(&word);
}

fn put_blobs(buf: &mut Vec<u8>, blobs: &BTreeMap<MemoryKey, Vec<u8>>)
{
    put_u64(buf, blobs.len() as u64);
    for (key, data) in blobs {
        put_u64(buf, key.address.value());
        // the data is authoritative for the length
        put_u64(buf, data.len() as u64);
        buf.extend_from_slice(data);
    }
}

fn corrupt(offset: usize, what: &str) -> StasisError
{
    StasisError::CorruptSnapshot(format!("at byte {offset}: {what}"))
}

fn first_overlap(regions: &BTreeMap<MemoryKey, Vec<u8>>) -> Option<(MemoryKey, MemoryKey)>
{
    // keys are sorted by address; compare each against the furthest-reaching
    // region seen so far
    let mut furthest: Option<MemoryKey> = None;
    for key in regions.keys() {
        if let Some(prev) = furthest {
            if prev.overlaps(key) {
                return Some((prev, *key));
            }
        }
        if key.length > 0 && furthest.map_or(true, |prev| key.end() > prev.end()) {
            furthest = Some(*key);
        }
    }
    None
}

struct Reader<'a>
{
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a>
{
    fn new(bytes: &'a [u8]) -> Self
    {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize
    {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> StasisResult<&'a [u8]>
    {
        if len > self.remaining() {
            return Err(corrupt(
                self.pos,
                &format!("truncated {what}: need {len} bytes, {} left", self.remaining()),
            ));
        }
        let bytes = self.bytes;
        let slice = &bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u64(&mut self, what: &str) -> StasisResult<u64>
    {
        self.take(8, what).map(LittleEndian::read_u64)
    }

    /// Read an element count and check that `min_record` bytes per element
    /// are still available
    fn count(&mut self, what: &str, min_record: usize) -> StasisResult<usize>
    {
        let offset = self.pos;
        let count = self.u64(&format!("{what} count"))?;
        let fits = usize::try_from(count)
            .ok()
            .filter(|&c| c.checked_mul(min_record).is_some_and(|n| n <= self.remaining()));
        match fits {
            Some(count) => Ok(count),
            None => Err(corrupt(
                offset,
                &format!("{count} {what} records cannot fit in {} remaining bytes", self.remaining()),
            )),
        }
    }

    fn blobs(&mut self, what: &str) -> StasisResult<BTreeMap<MemoryKey, Vec<u8>>>
    {
        let count = self.count(what, MEMORY_HEADER)?;
        let mut blobs = BTreeMap::new();
        for _ in 0..count {
            let offset = self.pos;
            let address = Address::new(self.u64("start address")?);
            let length = self.u64("length")?;
            let len = usize::try_from(length)
                .map_err(|_| corrupt(offset, &format!("{what} length {length} does not fit in memory")))?;
            let data = self.take(len, what)?.to_vec();
            let key = MemoryKey::new(address, length);
            if blobs.insert(key, data).is_some() {
                return Err(corrupt(offset, &format!("duplicate {what} {key}")));
            }
        }
        debug!(what, count, "decoded memory records");
        Ok(blobs)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn sample() -> Snapshot
    {
        let mut snapshot = Snapshot::new();
        snapshot.registers.set(RegisterName::Rax, 1);
        snapshot.registers.set(RegisterName::Rip, 0x40_0000);
        snapshot
            .regions
            .insert(MemoryKey::new(Address::new(0x7fff_0000), 16), (0u8..16).collect());
        snapshot
            .values
            .insert(MemoryKey::new(Address::new(0x7fff_0004), 4), vec![0xef, 0xbe, 0xad, 0xde]);
        snapshot
    }

    #[test]
    fn test_empty_snapshot_layout()
    {
        assert_eq!(encode(&Snapshot::new()), vec![0u8; 24]);
        assert_eq!(decode(&[0u8; 24]).unwrap(), Snapshot::new());
    }

    #[test]
    fn test_exact_byte_layout()
    {
        let bytes = encode(&sample());

        let mut expected = Vec::new();
        expected.extend_from_slice(&2u64.to_le_bytes());
        expected.extend_from_slice(b"rax\0\0\0\0\0");
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(b"rip\0\0\0\0\0");
        expected.extend_from_slice(&0x40_0000u64.to_le_bytes());
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&0x7fff_0000u64.to_le_bytes());
        expected.extend_from_slice(&16u64.to_le_bytes());
        expected.extend((0u8..16).collect::<Vec<_>>());
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&0x7fff_0004u64.to_le_bytes());
        expected.extend_from_slice(&4u64.to_le_bytes());
        expected.extend_from_slice(&[0xef, 0xbe, 0xad, 0xde]);

        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_round_trip_sample()
    {
        let snapshot = sample();
        assert_eq!(decode(&encode(&snapshot)).unwrap(), snapshot);
    }

    #[test]
    fn test_every_truncation_is_rejected()
    {
        let bytes = encode(&sample());
        for len in 0..bytes.len() {
            let err = decode(&bytes[..len]).unwrap_err();
            assert!(matches!(err, StasisError::CorruptSnapshot(_)), "prefix of {len} bytes");
        }
    }

    #[test]
    fn test_huge_count_is_rejected_without_allocating()
    {
        let mut bytes = u64::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        assert!(matches!(decode(&bytes), Err(StasisError::CorruptSnapshot(_))));

        let mut bytes = vec![0u8; 8];
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&0x1000u64.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(matches!(decode(&bytes), Err(StasisError::CorruptSnapshot(_))));
    }

    #[test]
    fn test_unknown_register_name_is_rejected()
    {
        let mut bytes = encode(&sample());
        bytes[8..16].copy_from_slice(b"xmm0\0\0\0\0");
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("Unknown register name"));
    }

    #[test]
    fn test_duplicate_register_is_rejected()
    {
        let mut bytes = encode(&sample());
        bytes[24..32].copy_from_slice(b"rax\0\0\0\0\0");
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("duplicate register rax"));
    }

    #[test]
    fn test_overlapping_regions_are_rejected()
    {
        let mut snapshot = sample();
        snapshot
            .regions
            .insert(MemoryKey::new(Address::new(0x7fff_0008), 16), vec![0; 16]);
        let err = decode(&encode(&snapshot)).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_overlapping_value_blobs_are_allowed()
    {
        let mut snapshot = sample();
        snapshot
            .values
            .insert(MemoryKey::new(Address::new(0x7fff_0000), 8), vec![1, 0, 0, 0, 0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(decode(&encode(&snapshot)).unwrap(), snapshot);
    }

    #[test]
    fn test_trailing_bytes_are_rejected()
    {
        let mut bytes = encode(&sample());
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(StasisError::CorruptSnapshot(_))));
    }

    #[test]
    fn test_stream_helpers()
    {
        let snapshot = sample();
        let mut buf = Vec::new();
        encode_into(&mut buf, &snapshot).unwrap();
        let decoded = decode_from(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, snapshot);
    }
}
