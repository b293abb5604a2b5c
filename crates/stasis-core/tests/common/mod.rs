//! In-memory inferior shared by the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

use stasis_core::error::{MappingError, StasisError, StasisResult};
use stasis_core::inferior::Inferior;
use stasis_core::types::{
    Address, Discriminant, Field, Frame, MappedRegion, MemoryKey, Permissions, RegisterName, TypeLayout, VariantCase,
};

/// A stopped "process" made of a register file, a mapping table and a
/// sparse byte store
#[derive(Debug, Clone, Default)]
pub struct FakeInferior
{
    pub registers: BTreeMap<RegisterName, u64>,
    pub regions: Vec<MappedRegion>,
    pub bytes: BTreeMap<u64, u8>,
    pub frames: Vec<Frame>,

    /// `establish_mapping` fails for requests touching these addresses
    pub refuse_mapping: Vec<Address>,
    /// Listed as mapped, but writes fail until a mapping is established
    pub stale: Vec<MemoryKey>,
    /// Reads touching these ranges fail
    pub unreadable: Vec<MemoryKey>,
    /// `mappings()` fails
    pub broken_maps: bool,

    pub mapping_requests: Vec<(Address, u64)>,
    pub register_writes: usize,
    pub memory_writes: usize,
    pub resumed: usize,
}

impl FakeInferior
{
    /// Every register zeroed, nothing mapped
    pub fn new() -> Self
    {
        Self {
            registers: RegisterName::ALL.iter().map(|&name| (name, 0)).collect(),
            ..Self::default()
        }
    }

    pub fn map(mut self, start: u64, length: u64, permissions: Permissions, path: Option<&str>) -> Self
    {
        self.regions.push(MappedRegion::new(
            Address::new(start),
            length,
            permissions,
            path.map(str::to_string),
        ));
        self.regions.sort_by_key(|r| r.start);
        self
    }

    /// Write bytes without any checks, as the program itself would
    pub fn poke(&mut self, addr: u64, data: &[u8])
    {
        for (i, &b) in data.iter().enumerate() {
            self.bytes.insert(addr + i as u64, b);
        }
    }

    /// Read bytes without any checks; never-written bytes are zero
    pub fn peek(&self, addr: u64, len: u64) -> Vec<u8>
    {
        (addr..addr + len).map(|a| self.bytes.get(&a).copied().unwrap_or(0)).collect()
    }

    pub fn reg(&self, name: RegisterName) -> u64
    {
        self.registers[&name]
    }

    fn covering(&self, addr: u64) -> Option<&MappedRegion>
    {
        self.regions
            .iter()
            .find(|r| r.start.value() <= addr && addr < r.end().value())
    }

    fn touches(ranges: &[MemoryKey], addr: u64, len: u64) -> bool
    {
        let key = MemoryKey::new(Address::new(addr), len);
        ranges.iter().any(|r| r.overlaps(&key))
    }
}

impl Inferior for FakeInferior
{
    fn read_register(&self, name: RegisterName) -> StasisResult<u64>
    {
        self.registers
            .get(&name)
            .copied()
            .ok_or_else(|| StasisError::InvalidArgument(format!("no register {name}")))
    }

    fn write_register(&mut self, name: RegisterName, value: u64) -> StasisResult<()>
    {
        self.registers.insert(name, value);
        self.register_writes += 1;
        Ok(())
    }

    fn read_memory(&self, addr: Address, len: usize) -> StasisResult<Vec<u8>>
    {
        let start = addr.value();
        if Self::touches(&self.unreadable, start, len as u64) {
            return Err(MappingError::new(addr, len as u64, "unreadable").into());
        }
        for a in start..start + len as u64 {
            match self.covering(a) {
                Some(region) if region.permissions.readable => {}
                _ => return Err(MappingError::new(addr, len as u64, "not mapped").into()),
            }
        }
        Ok(self.peek(start, len as u64))
    }

    fn write_memory(&mut self, addr: Address, data: &[u8]) -> Result<(), MappingError>
    {
        let start = addr.value();
        let len = data.len() as u64;
        if Self::touches(&self.stale, start, len) {
            return Err(MappingError::new(addr, len, "stale mapping"));
        }
        if (start..start + len).any(|a| self.covering(a).is_none()) {
            return Err(MappingError::new(addr, len, "not mapped"));
        }
        self.poke(start, data);
        self.memory_writes += 1;
        Ok(())
    }

    fn mappings(&self) -> StasisResult<Vec<MappedRegion>>
    {
        if self.broken_maps {
            return Err(StasisError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "maps unreadable",
            )));
        }
        Ok(self.regions.clone())
    }

    fn establish_mapping(&mut self, addr: Address, length: u64) -> Result<(), MappingError>
    {
        self.mapping_requests.push((addr, length));
        let requested = MemoryKey::new(addr, length);
        if self
            .refuse_mapping
            .iter()
            .any(|&a| requested.overlaps(&MemoryKey::new(a, 1)))
        {
            return Err(MappingError::new(addr, length, "address space exhausted"));
        }
        self.stale.retain(|key| !key.overlaps(&requested));
        if (addr.value()..addr.value() + length).any(|a| self.covering(a).is_none()) {
            self.regions
                .push(MappedRegion::new(addr, length, Permissions::READ_WRITE, None));
            self.regions.sort_by_key(|r| r.start);
        }
        Ok(())
    }

    fn stack_frames(&self) -> StasisResult<Vec<Frame>>
    {
        Ok(self.frames.clone())
    }

    fn resume(&mut self) -> StasisResult<()>
    {
        self.resumed += 1;
        Ok(())
    }
}

/// `{ val: Option<u32-like payload>, metadata: [u8; metadata_size] }` with a
/// 4-byte tag at offset 0 (`None` = 0, `Some` = 1) and the payload at 4
pub fn labeled_layout(payload_size: u64, metadata_size: u64) -> TypeLayout
{
    let option_size = 4 + payload_size;
    let option = TypeLayout::Variant {
        name: "core::option::Option<u32>".into(),
        size: option_size,
        discriminant: Discriminant::Tagged { offset: 0, size: 4 },
        cases: vec![
            VariantCase::new("None", Some(0), vec![]),
            VariantCase::new(
                "Some",
                Some(1),
                vec![Field::new("__0", 4, TypeLayout::Scalar { size: payload_size })],
            ),
        ],
    };
    TypeLayout::Struct {
        name: "Labeled<u32, Public>".into(),
        size: option_size + metadata_size,
        fields: vec![
            Field::new("val", 0, option),
            Field::new("metadata", option_size, TypeLayout::Scalar { size: metadata_size }),
        ],
    }
}

/// `{ val: Option<Box<T>>, metadata: [u8; metadata_size] }`: the option is
/// a bare 8-byte pointer whose null value encodes `None`
pub fn boxed_labeled_layout(metadata_size: u64) -> TypeLayout
{
    let option = TypeLayout::Variant {
        name: "core::option::Option<alloc::boxed::Box<u64>>".into(),
        size: 8,
        discriminant: Discriminant::Niche { offset: 0, size: 8 },
        cases: vec![
            VariantCase::new("None", Some(0), vec![]),
            VariantCase::new("Some", None, vec![Field::new("__0", 0, TypeLayout::Pointer { size: 8 })]),
        ],
    };
    TypeLayout::Struct {
        name: "Labeled<Box<u64>, Public>".into(),
        size: 8 + metadata_size,
        fields: vec![
            Field::new("val", 0, option),
            Field::new("metadata", 8, TypeLayout::Scalar { size: metadata_size }),
        ],
    }
}

/// Bytes of a labeled value laid out by [`labeled_layout`] with a 4-byte
/// payload
pub fn labeled_bytes(payload: Option<u32>, metadata: &[u8]) -> Vec<u8>
{
    let mut bytes = Vec::new();
    match payload {
        Some(value) => {
            bytes.extend_from_slice(&1u32.to_le_bytes());
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        None => {
            bytes.extend_from_slice(&0u32.to_le_bytes());
            // stale garbage in the unused payload slot
            bytes.extend_from_slice(&0xAAAA_AAAAu32.to_le_bytes());
        }
    }
    bytes.extend_from_slice(metadata);
    bytes
}

/// A typical small process: code, a data page, heap and stack
pub fn sample_process() -> FakeInferior
{
    let mut inferior = FakeInferior::new()
        .map(0x40_0000, 0x100, Permissions::READ_EXECUTE, Some("/bin/app"))
        .map(0x60_0000, 0x40, Permissions::READ_ONLY, Some("/bin/app"))
        .map(0x60_1000, 0x40, Permissions::READ_WRITE, Some("/bin/app"))
        .map(0x80_0000, 0x80, Permissions::READ_WRITE, Some("[heap]"))
        .map(0x7fff_0000, 0x100, Permissions::READ_WRITE, Some("[stack]"));

    inferior.registers.insert(RegisterName::Rip, 0x40_0010);
    inferior.registers.insert(RegisterName::Rsp, 0x7fff_0080);
    inferior.registers.insert(RegisterName::Rax, 0x2a);
    inferior.poke(0x60_1000, b"global counter: 7");
    inferior.poke(0x80_0000, &[0x11; 0x80]);
    inferior
}
