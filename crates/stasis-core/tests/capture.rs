//! Tests for checkpoint capture against an in-memory target

mod common;

use common::{boxed_labeled_layout, labeled_bytes, labeled_layout, sample_process, FakeInferior};
use stasis_core::capture::Capturer;
use stasis_core::codec;
use stasis_core::error::StasisError;
use stasis_core::types::{Address, Frame, MemoryKey, RegisterName, Scope, TypeLayout, Variable};

const SECRET: u64 = 0x7fff_0040;
const EMPTY: u64 = 0x7fff_0060;

fn key(addr: u64, len: u64) -> MemoryKey
{
    MemoryKey::new(Address::new(addr), len)
}

/// One present and one absent labeled value in the innermost frame, plus an
/// ordinary integer next to them
fn process_with_labeled_values() -> FakeInferior
{
    let mut inferior = sample_process();
    inferior.poke(SECRET, &labeled_bytes(Some(0xDEAD_BEEF), b"tag:high"));
    inferior.poke(EMPTY, &labeled_bytes(None, b"tag:low!"));

    inferior.frames = vec![
        Frame::new(
            "app::checkpoint",
            Address::new(0x40_0010),
            vec![
                Scope::new(vec![Variable::new("secret", labeled_layout(4, 8), Address::new(SECRET))]),
                Scope::new(vec![
                    Variable::new("count", TypeLayout::Scalar { size: 8 }, Address::new(0x7fff_0030)),
                    Variable::new("empty", labeled_layout(4, 8), Address::new(EMPTY)),
                ]),
            ],
        ),
        Frame::opaque(Address::new(0x40_0080)),
    ];
    inferior
}

#[test]
fn test_capture_reads_every_register()
{
    let mut inferior = sample_process();
    let snapshot = Capturer::new(&mut inferior).capture().unwrap();

    assert!(snapshot.registers.is_complete());
    assert_eq!(snapshot.registers.get(RegisterName::Rip), Some(0x40_0010));
    assert_eq!(snapshot.registers.get(RegisterName::Rax), Some(0x2a));
    assert_eq!(snapshot.registers.get(RegisterName::Mxcsr), Some(0));
}

#[test]
fn test_capture_saves_only_writable_regions()
{
    let mut inferior = sample_process();
    let snapshot = Capturer::new(&mut inferior).capture().unwrap();

    let keys: Vec<_> = snapshot.regions.keys().copied().collect();
    assert_eq!(keys, [key(0x60_1000, 0x40), key(0x80_0000, 0x80), key(0x7fff_0000, 0x100)]);
    assert_eq!(&snapshot.regions[&key(0x60_1000, 0x40)][..17], b"global counter: 7");
    assert_eq!(snapshot.regions[&key(0x80_0000, 0x80)], vec![0x11; 0x80]);
}

#[test]
fn test_capture_is_deterministic()
{
    let mut inferior = process_with_labeled_values();
    let first = Capturer::new(&mut inferior).capture().unwrap();
    let second = Capturer::new(&mut inferior).capture().unwrap();

    assert_eq!(first, second);
    assert_eq!(codec::encode(&first), codec::encode(&second));
}

#[test]
fn test_capture_does_not_touch_the_target()
{
    let mut inferior = process_with_labeled_values();
    let before = inferior.clone();
    Capturer::new(&mut inferior).capture().unwrap();

    assert_eq!(inferior.register_writes, 0);
    assert_eq!(inferior.memory_writes, 0);
    assert_eq!(inferior.resumed, 0);
    assert!(inferior.mapping_requests.is_empty());
    assert_eq!(inferior.bytes, before.bytes);
}

#[test]
fn test_present_value_yields_three_blobs()
{
    let mut inferior = process_with_labeled_values();
    let snapshot = Capturer::new(&mut inferior).capture().unwrap();

    let outer = key(SECRET, 8);
    let payload = key(SECRET + 4, 4);
    let metadata = key(SECRET + 8, 8);
    assert_eq!(snapshot.values[&outer], labeled_bytes(Some(0xDEAD_BEEF), b"")[..8].to_vec());
    assert_eq!(snapshot.values[&payload], 0xDEAD_BEEFu32.to_le_bytes().to_vec());
    assert_eq!(snapshot.values[&metadata], b"tag:high".to_vec());
}

#[test]
fn test_absent_value_never_captures_payload()
{
    let mut inferior = process_with_labeled_values();
    let snapshot = Capturer::new(&mut inferior).capture().unwrap();

    assert!(snapshot.values.contains_key(&key(EMPTY, 8)));
    assert!(snapshot.values.contains_key(&key(EMPTY + 8, 8)));
    assert!(!snapshot.values.contains_key(&key(EMPTY + 4, 4)));

    let in_empty = snapshot
        .values
        .keys()
        .filter(|k| k.address.value() >= EMPTY && k.address.value() < EMPTY + 16)
        .count();
    assert_eq!(in_empty, 2);
    // three for `secret`, two for `empty`, nothing for `count`
    assert_eq!(snapshot.values.len(), 5);
}

#[test]
fn test_present_boxed_value_stores_outer_and_payload_once()
{
    const BOXED: u64 = 0x7fff_0080;
    let mut inferior = sample_process();
    inferior.poke(BOXED, &0x80_0010u64.to_le_bytes());
    inferior.poke(BOXED + 8, b"meta");
    inferior.frames = vec![Frame::new(
        "app::checkpoint",
        Address::new(0x40_0010),
        vec![Scope::new(vec![Variable::new("boxed", boxed_labeled_layout(4), Address::new(BOXED))])],
    )];

    let snapshot = Capturer::new(&mut inferior).capture().unwrap();

    // outer option and payload are the same 8 bytes, so they share one key
    let keys: Vec<_> = snapshot.values.keys().copied().collect();
    assert_eq!(keys, [key(BOXED, 8), key(BOXED + 8, 4)]);
    assert_eq!(snapshot.values[&key(BOXED, 8)], 0x80_0010u64.to_le_bytes().to_vec());
}

#[test]
fn test_absent_boxed_value_yields_two_blobs()
{
    const BOXED: u64 = 0x7fff_0080;
    let mut inferior = sample_process();
    inferior.poke(BOXED, &[0; 8]);
    inferior.poke(BOXED + 8, b"meta");
    inferior.frames = vec![Frame::new(
        "app::checkpoint",
        Address::new(0x40_0010),
        vec![Scope::new(vec![Variable::new("boxed", boxed_labeled_layout(4), Address::new(BOXED))])],
    )];

    let snapshot = Capturer::new(&mut inferior).capture().unwrap();
    assert_eq!(snapshot.values.len(), 2);
    assert_eq!(snapshot.values[&key(BOXED + 8, 4)], b"meta".to_vec());
}

#[test]
fn test_frames_without_scopes_are_skipped()
{
    let mut inferior = sample_process();
    inferior.frames = vec![Frame::opaque(Address::new(0x40_0010)), Frame::opaque(Address::new(0x40_0020))];

    let snapshot = Capturer::new(&mut inferior).capture().unwrap();
    assert!(snapshot.values.is_empty());
    assert_eq!(snapshot.regions.len(), 3);
}

#[test]
fn test_unreadable_mapping_table_aborts()
{
    let mut inferior = sample_process();
    inferior.broken_maps = true;

    let err = Capturer::new(&mut inferior).capture().unwrap_err();
    assert!(matches!(err, StasisError::Introspection(_)), "{err}");
}

#[test]
fn test_unreadable_region_aborts()
{
    let mut inferior = sample_process();
    inferior.unreadable.push(key(0x80_0010, 1));

    let err = Capturer::new(&mut inferior).capture().unwrap_err();
    assert!(matches!(err, StasisError::Introspection(ref msg) if msg.contains("[heap]")), "{err}");
}

#[test]
fn test_unreadable_labeled_value_aborts()
{
    let mut inferior = process_with_labeled_values();
    // outside every mapping, so only the stack scan trips over it
    inferior.frames[0] = Frame::new(
        "app::checkpoint",
        Address::new(0x40_0010),
        vec![Scope::new(vec![Variable::new("lost", labeled_layout(4, 8), Address::new(0x9000_0000))])],
    );

    let err = Capturer::new(&mut inferior).capture().unwrap_err();
    assert!(matches!(err, StasisError::Introspection(ref msg) if msg.contains("lost")), "{err}");
}

#[test]
fn test_capture_to_writes_file_then_resumes()
{
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoint.bin");
    std::fs::write(&path, b"previous run").unwrap();

    let mut inferior = process_with_labeled_values();
    let snapshot = Capturer::new(&mut inferior).capture_to(&path).unwrap();

    assert_eq!(inferior.resumed, 1);
    assert_eq!(codec::read_snapshot(&path).unwrap(), snapshot);
}

#[test]
fn test_failed_capture_writes_nothing_and_stays_stopped()
{
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoint.bin");

    let mut inferior = sample_process();
    inferior.broken_maps = true;
    assert!(Capturer::new(&mut inferior).capture_to(&path).is_err());

    assert!(!path.exists());
    assert_eq!(inferior.resumed, 0);
}
