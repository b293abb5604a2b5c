//! # Debug Info
//!
//! Recovers variable scopes for frame-pointer frames from the target
//! executable's DWARF.
//!
//! For each frame the covering `DW_TAG_subprogram` is found by program
//! counter. Its variables, and those of every `DW_TAG_lexical_block` or
//! `DW_TAG_inlined_subroutine` that also covers the program counter, become
//! the frame's scopes (innermost block first). Variable locations are
//! evaluated against the registers known for that frame; variables that live
//! in registers or need unsupported operations are left out.
//!
//! Static types are turned into [`TypeLayout`]s: members and their offsets
//! for structs, and for Rust enums the `DW_TAG_variant_part` with its
//! discriminant member and per-variant `DW_AT_discr_value`.
//!
//! Only the innermost frame has its full register file. Outer frames know
//! their program counter, stack pointer, frame pointer and CFA, which covers
//! the `DW_OP_fbreg` / `DW_OP_call_frame_cfa` locations debug builds emit.
//! Targets must keep frame pointers (`-C force-frame-pointers=yes`) for the
//! walk to reach them.
//!
//! ## References
//!
//! - [DWARF 5, section 5.7.10: Variant Entries](https://dwarfstd.org/doc/DWARF5.pdf)

use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use gimli::{
    constants, AttributeValue, DebuggingInformationEntry, DwAt, Dwarf, EndianArcSlice, EntriesTreeNode,
    EvaluationResult, Expression, Location, Reader, Register, RunTimeEndian, SectionId, Unit, UnitOffset,
    UnitSectionOffset, Value,
};
use libc::user_regs_struct;
use object::{Object, ObjectKind, ObjectSection};
use rustc_demangle::try_demangle;
use tracing::{debug, trace};

use crate::error::{StasisError, StasisResult};
use crate::types::{Address, Discriminant, Field, Frame, Scope, TypeLayout, Variable, VariantCase};

type SectionReader = EndianArcSlice<RunTimeEndian>;

const MAX_TYPE_DEPTH: usize = 32;
const MAX_ORIGIN_HOPS: usize = 4;
const POINTER_SIZE: u64 = 8;
/// DWARF numbers `rax` (0) through `r15` (15) plus the return address (16)
const TRACKED_REGISTERS: usize = 17;

/// Register values known for one physical frame, by DWARF register number
#[derive(Debug, Clone, Default)]
pub(crate) struct FrameRegisters
{
    values: [Option<u64>; TRACKED_REGISTERS],
    cfa: Option<u64>,
}

impl FrameRegisters
{
    /// The stopped frame; `at_entry` when its prologue has not run yet
    pub(crate) fn innermost(regs: &user_regs_struct, at_entry: bool) -> Self
    {
        let mut frame = Self::default();
        let ordered = [
            (gimli::X86_64::RAX, regs.rax),
            (gimli::X86_64::RDX, regs.rdx),
            (gimli::X86_64::RCX, regs.rcx),
            (gimli::X86_64::RBX, regs.rbx),
            (gimli::X86_64::RSI, regs.rsi),
            (gimli::X86_64::RDI, regs.rdi),
            (gimli::X86_64::RBP, regs.rbp),
            (gimli::X86_64::RSP, regs.rsp),
            (gimli::X86_64::R8, regs.r8),
            (gimli::X86_64::R9, regs.r9),
            (gimli::X86_64::R10, regs.r10),
            (gimli::X86_64::R11, regs.r11),
            (gimli::X86_64::R12, regs.r12),
            (gimli::X86_64::R13, regs.r13),
            (gimli::X86_64::R14, regs.r14),
            (gimli::X86_64::R15, regs.r15),
            (gimli::X86_64::RA, regs.rip),
        ];
        for (register, value) in ordered {
            frame.set(register, value);
        }
        frame.cfa = Some(if at_entry {
            regs.rsp.wrapping_add(8)
        } else {
            regs.rbp.wrapping_add(16)
        });
        frame
    }

    /// A caller frame recovered from the frame-pointer chain
    pub(crate) fn caller(pc: u64, sp: u64, fp: u64) -> Self
    {
        let mut frame = Self::default();
        frame.set(gimli::X86_64::RA, pc);
        frame.set(gimli::X86_64::RSP, sp);
        frame.set(gimli::X86_64::RBP, fp);
        frame.cfa = Some(fp.wrapping_add(16));
        frame
    }

    fn set(&mut self, register: Register, value: u64)
    {
        if let Some(slot) = self.values.get_mut(usize::from(register.0)) {
            *slot = Some(value);
        }
    }

    fn get(&self, register: Register) -> Option<u64>
    {
        self.values.get(usize::from(register.0)).copied().flatten()
    }
}

/// One frame found by the stack walk, before debug info is attached
#[derive(Debug, Clone)]
pub(crate) struct RawFrame
{
    pub(crate) pc: u64,
    pub(crate) registers: FrameRegisters,
    /// `pc` is a return address, so the call itself is at `pc - 1`
    pub(crate) return_address: bool,
}

/// Where a location expression says a value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement
{
    Memory(u64),
    Register(u64),
}

/// Everything a location expression may ask about its frame
struct Locator<'a>
{
    link_pc: u64,
    bias: u64,
    registers: &'a FrameRegisters,
    frame_base: Option<u64>,
    memory: &'a dyn Fn(Address, usize) -> Option<Vec<u8>>,
}

/// Parsed DWARF of one executable
pub(crate) struct DebugInfo
{
    dwarf: Dwarf<SectionReader>,
    units: Vec<Unit<SectionReader>>,
    relocatable: bool,
}

impl DebugInfo
{
    /// Parse the DWARF of `executable`; `None` if it carries none
    pub(crate) fn load(executable: &Path) -> StasisResult<Option<Self>>
    {
        let data = fs::read(executable)?;
        let file = object::File::parse(&*data)
            .map_err(|err| StasisError::InvalidArgument(format!("cannot parse {}: {err}", executable.display())))?;
        if file.section_by_name(".debug_info").is_none() {
            return Ok(None);
        }

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let dwarf = Dwarf::load(|id| load_section(&file, id, endian))?;

        let mut units = Vec::new();
        let mut headers = dwarf.units();
        while let Some(header) = headers
            .next()
            .map_err(|err| dwarf_error("reading .debug_info unit header", err))?
        {
            units.push(
                dwarf
                    .unit(header)
                    .map_err(|err| dwarf_error("parsing compilation unit", err))?,
            );
        }

        debug!(executable = %executable.display(), units = units.len(), "loaded debug info");
        Ok(Some(Self {
            dwarf,
            units,
            relocatable: file.kind() == ObjectKind::Dynamic,
        }))
    }

    /// Whether link-time addresses must be shifted by the load base
    pub(crate) fn relocatable(&self) -> bool
    {
        self.relocatable
    }

    /// Is `link_pc` the first instruction of a function?
    pub(crate) fn starts_function(&self, link_pc: u64) -> StasisResult<bool>
    {
        let Some((unit, offset)) = self.subprogram_at(link_pc)? else {
            return Ok(false);
        };
        let entry = unit
            .entry(offset)
            .map_err(|err| dwarf_error("reading subprogram", err))?;
        let Some(low_pc) = entry
            .attr_value(constants::DW_AT_low_pc)
            .map_err(|err| dwarf_error("reading DW_AT_low_pc", err))?
        else {
            return Ok(false);
        };
        let start = self
            .dwarf
            .attr_address(unit, low_pc)
            .map_err(|err| dwarf_error("resolving DW_AT_low_pc", err))?;
        Ok(start == Some(link_pc))
    }

    /// Attach function name and scopes to a walked frame
    ///
    /// Frames outside any described function come back opaque.
    pub(crate) fn frame(
        &self,
        raw: &RawFrame,
        bias: u64,
        memory: &dyn Fn(Address, usize) -> Option<Vec<u8>>,
    ) -> StasisResult<Frame>
    {
        let pc = Address::new(raw.pc);
        let link_pc = raw
            .pc
            .wrapping_sub(bias)
            .wrapping_sub(u64::from(raw.return_address));
        let Some((unit, offset)) = self.subprogram_at(link_pc)? else {
            trace!(pc = %pc, "no subprogram covers frame");
            return Ok(Frame::opaque(pc));
        };

        let entry = unit
            .entry(offset)
            .map_err(|err| dwarf_error("reading subprogram", err))?;
        let function = self.function_name(unit, &entry)?;

        let mut locator = Locator {
            link_pc,
            bias,
            registers: &raw.registers,
            frame_base: None,
            memory,
        };
        if let Some(AttributeValue::Exprloc(expr)) = entry
            .attr_value(constants::DW_AT_frame_base)
            .map_err(|err| dwarf_error("reading DW_AT_frame_base", err))?
        {
            locator.frame_base = self.evaluate(unit, expr, &locator)?.map(|placement| match placement {
                Placement::Memory(value) | Placement::Register(value) => value,
            });
        }

        let mut tree = unit
            .entries_tree(Some(offset))
            .map_err(|err| dwarf_error("building subprogram tree", err))?;
        let root = tree
            .root()
            .map_err(|err| dwarf_error("navigating subprogram root", err))?;
        let mut scopes = Vec::new();
        self.block_scopes(unit, root, &locator, &mut scopes)?;

        trace!(pc = %pc, function = function.as_deref().unwrap_or("<unknown>"), scopes = scopes.len(), "described frame");
        Ok(Frame {
            function,
            pc,
            scopes: Some(scopes),
        })
    }

    fn subprogram_at(&self, link_pc: u64) -> StasisResult<Option<(&Unit<SectionReader>, UnitOffset)>>
    {
        for unit in &self.units {
            if !self.unit_covers(unit, link_pc)? {
                continue;
            }
            let mut cursor = unit.entries();
            while let Some((_delta, entry)) = cursor.next_dfs().map_err(|err| dwarf_error("traversing DIE tree", err))? {
                if entry.tag() == constants::DW_TAG_subprogram && self.covers(unit, entry, link_pc)? {
                    return Ok(Some((unit, entry.offset())));
                }
            }
        }
        Ok(None)
    }

    fn unit_covers(&self, unit: &Unit<SectionReader>, link_pc: u64) -> StasisResult<bool>
    {
        let mut ranges = self
            .dwarf
            .unit_ranges(unit)
            .map_err(|err| dwarf_error("reading unit ranges", err))?;
        while let Some(range) = ranges.next().map_err(|err| dwarf_error("iterating unit ranges", err))? {
            if range.begin <= link_pc && link_pc < range.end {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn covers(
        &self,
        unit: &Unit<SectionReader>,
        entry: &DebuggingInformationEntry<'_, '_, SectionReader>,
        link_pc: u64,
    ) -> StasisResult<bool>
    {
        let mut ranges = self
            .dwarf
            .die_ranges(unit, entry)
            .map_err(|err| dwarf_error("reading DIE ranges", err))?;
        while let Some(range) = ranges.next().map_err(|err| dwarf_error("iterating DIE ranges", err))? {
            if range.begin <= link_pc && link_pc < range.end {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Push the scopes of `node` and of every nested block covering the
    /// program counter, innermost first
    fn block_scopes(
        &self,
        unit: &Unit<SectionReader>,
        node: EntriesTreeNode<'_, '_, '_, SectionReader>,
        locator: &Locator<'_>,
        scopes: &mut Vec<Scope>,
    ) -> StasisResult<()>
    {
        let mut variables = Vec::new();
        let mut children = node.children();
        while let Some(child) = children
            .next()
            .map_err(|err| dwarf_error("iterating block children", err))?
        {
            match child.entry().tag() {
                constants::DW_TAG_variable | constants::DW_TAG_formal_parameter => {
                    if let Some(var) = self.variable(unit, child.entry(), locator)? {
                        variables.push(var);
                    }
                }
                constants::DW_TAG_lexical_block | constants::DW_TAG_inlined_subroutine => {
                    if self.covers(unit, child.entry(), locator.link_pc)? {
                        self.block_scopes(unit, child, locator, scopes)?;
                    }
                }
                _ => {}
            }
        }
        scopes.push(Scope::new(variables));
        Ok(())
    }

    fn variable(
        &self,
        unit: &Unit<SectionReader>,
        entry: &DebuggingInformationEntry<'_, '_, SectionReader>,
        locator: &Locator<'_>,
    ) -> StasisResult<Option<Variable>>
    {
        let Some(name) = self.inherited_string(unit, entry, constants::DW_AT_name)? else {
            return Ok(None);
        };
        let Some(type_ref) = self.inherited_attr(unit, entry, constants::DW_AT_type)? else {
            return Ok(None);
        };
        let Some(address) = self.variable_address(unit, entry, locator)? else {
            trace!(name = %name, "variable has no memory location here");
            return Ok(None);
        };
        let layout = self.type_layout(unit, type_ref, 0)?;
        Ok(Some(Variable::new(name, layout, Address::new(address))))
    }

    fn variable_address(
        &self,
        unit: &Unit<SectionReader>,
        entry: &DebuggingInformationEntry<'_, '_, SectionReader>,
        locator: &Locator<'_>,
    ) -> StasisResult<Option<u64>>
    {
        let Some(value) = entry
            .attr_value(constants::DW_AT_location)
            .map_err(|err| dwarf_error("reading DW_AT_location", err))?
        else {
            return Ok(None);
        };
        let expr = match value {
            AttributeValue::Exprloc(expr) => Some(expr),
            other => self.location_at(unit, other, locator.link_pc)?,
        };
        let Some(expr) = expr else {
            return Ok(None);
        };
        Ok(match self.evaluate(unit, expr, locator)? {
            Some(Placement::Memory(address)) => Some(address),
            _ => None,
        })
    }

    /// The location list entry that applies at `link_pc`
    fn location_at(
        &self,
        unit: &Unit<SectionReader>,
        value: AttributeValue<SectionReader>,
        link_pc: u64,
    ) -> StasisResult<Option<Expression<SectionReader>>>
    {
        let Some(mut locations) = self
            .dwarf
            .attr_locations(unit, value)
            .map_err(|err| dwarf_error("reading location list", err))?
        else {
            return Ok(None);
        };
        while let Some(entry) = locations
            .next()
            .map_err(|err| dwarf_error("iterating location list", err))?
        {
            if entry.range.begin <= link_pc && link_pc < entry.range.end {
                return Ok(Some(entry.data));
            }
        }
        Ok(None)
    }

    fn evaluate(
        &self,
        unit: &Unit<SectionReader>,
        expr: Expression<SectionReader>,
        locator: &Locator<'_>,
    ) -> StasisResult<Option<Placement>>
    {
        let mut eval = expr.evaluation(unit.encoding());
        let mut step = eval
            .evaluate()
            .map_err(|err| dwarf_error("evaluating location", err))?;
        loop {
            step = match step {
                EvaluationResult::Complete => break,
                EvaluationResult::RequiresRegister { register, .. } => match locator.registers.get(register) {
                    Some(value) => eval.resume_with_register(Value::Generic(value)),
                    None => return Ok(None),
                },
                EvaluationResult::RequiresFrameBase => match locator.frame_base {
                    Some(base) => eval.resume_with_frame_base(base),
                    None => return Ok(None),
                },
                EvaluationResult::RequiresCallFrameCfa => match locator.registers.cfa {
                    Some(cfa) => eval.resume_with_call_frame_cfa(cfa),
                    None => return Ok(None),
                },
                EvaluationResult::RequiresMemory { address, size, .. } => {
                    match (locator.memory)(Address::new(address), usize::from(size)) {
                        Some(bytes) => eval.resume_with_memory(Value::Generic(little_endian(&bytes))),
                        None => return Ok(None),
                    }
                }
                EvaluationResult::RequiresRelocatedAddress(address) => {
                    eval.resume_with_relocated_address(address.wrapping_add(locator.bias))
                }
                _ => return Ok(None),
            }
            .map_err(|err| dwarf_error("evaluating location", err))?;
        }

        let pieces = eval.result();
        let [piece] = pieces.as_slice() else {
            return Ok(None);
        };
        Ok(match &piece.location {
            Location::Address { address } => Some(Placement::Memory(*address)),
            Location::Register { register } => locator.registers.get(*register).map(Placement::Register),
            _ => None,
        })
    }

    fn type_layout(
        &self,
        unit: &Unit<SectionReader>,
        value: AttributeValue<SectionReader>,
        depth: usize,
    ) -> StasisResult<TypeLayout>
    {
        match self.resolve_ref(unit, value) {
            Some((target, offset)) => self.layout_at(target, offset, depth),
            None => Ok(TypeLayout::Scalar { size: 0 }),
        }
    }

    fn layout_at(&self, unit: &Unit<SectionReader>, offset: UnitOffset, depth: usize) -> StasisResult<TypeLayout>
    {
        let entry = unit
            .entry(offset)
            .map_err(|err| dwarf_error("resolving type reference", err))?;
        let size = byte_size(&entry)?;
        if depth >= MAX_TYPE_DEPTH {
            return Ok(TypeLayout::Scalar {
                size: size.unwrap_or(0),
            });
        }

        match entry.tag() {
            constants::DW_TAG_pointer_type | constants::DW_TAG_reference_type | constants::DW_TAG_rvalue_reference_type => {
                Ok(TypeLayout::Pointer {
                    size: size.unwrap_or(POINTER_SIZE),
                })
            }
            constants::DW_TAG_typedef
            | constants::DW_TAG_const_type
            | constants::DW_TAG_volatile_type
            | constants::DW_TAG_atomic_type
            | constants::DW_TAG_restrict_type => match entry
                .attr_value(constants::DW_AT_type)
                .map_err(|err| dwarf_error("reading aliased type", err))?
            {
                Some(inner) => self.type_layout(unit, inner, depth + 1),
                None => Ok(TypeLayout::Scalar { size: 0 }),
            },
            constants::DW_TAG_structure_type | constants::DW_TAG_class_type | constants::DW_TAG_union_type => {
                self.aggregate_layout(unit, &entry, size.unwrap_or(0), depth)
            }
            constants::DW_TAG_array_type => {
                let size = match size {
                    Some(size) => size,
                    None => self.array_size(unit, &entry, depth)?,
                };
                Ok(TypeLayout::Scalar { size })
            }
            _ => Ok(TypeLayout::Scalar {
                size: size.unwrap_or(0),
            }),
        }
    }

    fn aggregate_layout(
        &self,
        unit: &Unit<SectionReader>,
        entry: &DebuggingInformationEntry<'_, '_, SectionReader>,
        size: u64,
        depth: usize,
    ) -> StasisResult<TypeLayout>
    {
        let name = self.entry_name(unit, entry)?.unwrap_or_default();
        let mut fields = Vec::new();
        let mut variant_part = None;

        let mut tree = unit
            .entries_tree(Some(entry.offset()))
            .map_err(|err| dwarf_error("building struct tree", err))?;
        let root = tree.root().map_err(|err| dwarf_error("navigating struct root", err))?;
        let mut children = root.children();
        while let Some(child) = children
            .next()
            .map_err(|err| dwarf_error("iterating struct children", err))?
        {
            let child_entry = child.entry();
            match child_entry.tag() {
                constants::DW_TAG_member => {
                    if let Some(field) = self.member(unit, child_entry, depth)? {
                        fields.push(field);
                    }
                }
                constants::DW_TAG_variant_part => variant_part = Some(child_entry.offset()),
                _ => {}
            }
        }

        match variant_part {
            Some(part) => self.variant_layout(unit, part, name, size, depth),
            None => Ok(TypeLayout::Struct { name, size, fields }),
        }
    }

    /// Enum layout from a `DW_TAG_variant_part`
    ///
    /// When every variant carries a discriminant value the discriminant is a
    /// dedicated tag; a variant without one is the dataful variant of a
    /// niche-encoded enum.
    fn variant_layout(
        &self,
        unit: &Unit<SectionReader>,
        part: UnitOffset,
        name: String,
        size: u64,
        depth: usize,
    ) -> StasisResult<TypeLayout>
    {
        let part_entry = unit
            .entry(part)
            .map_err(|err| dwarf_error("reading variant part", err))?;
        let discr = match part_entry
            .attr_value(constants::DW_AT_discr)
            .map_err(|err| dwarf_error("reading DW_AT_discr", err))?
        {
            Some(AttributeValue::UnitRef(offset)) => {
                let member = unit
                    .entry(offset)
                    .map_err(|err| dwarf_error("reading discriminant member", err))?;
                let width = match member
                    .attr_value(constants::DW_AT_type)
                    .map_err(|err| dwarf_error("reading discriminant type", err))?
                {
                    Some(ty) => self.type_layout(unit, ty, depth + 1)?.size(),
                    None => 0,
                };
                Some((member_offset(&member)?.unwrap_or(0), width))
            }
            _ => None,
        };

        let mut cases = Vec::new();
        let mut tree = unit
            .entries_tree(Some(part))
            .map_err(|err| dwarf_error("building variant tree", err))?;
        let root = tree.root().map_err(|err| dwarf_error("navigating variant root", err))?;
        let mut variants = root.children();
        while let Some(variant) = variants.next().map_err(|err| dwarf_error("iterating variants", err))? {
            if variant.entry().tag() != constants::DW_TAG_variant {
                continue;
            }
            let value = discr_value(variant.entry())?;

            let mut members = variant.children();
            while let Some(member) = members
                .next()
                .map_err(|err| dwarf_error("iterating variant members", err))?
            {
                if member.entry().tag() != constants::DW_TAG_member {
                    continue;
                }
                let Some(Field {
                    name: case,
                    offset,
                    layout,
                }) = self.member(unit, member.entry(), depth)?
                else {
                    continue;
                };
                // Variant members wrap a struct named after the case; lift its
                // fields so offsets are relative to the enum
                let fields = match layout {
                    TypeLayout::Struct { fields, .. } => fields
                        .into_iter()
                        .map(|field| Field::new(field.name, field.offset + offset, field.layout))
                        .collect(),
                    other => vec![Field::new("__0", offset, other)],
                };
                cases.push(VariantCase::new(case, value, fields));
            }
        }

        let Some((offset, width)) = discr else {
            trace!(name = %name, "variant part without discriminant");
            return Ok(TypeLayout::Struct {
                name,
                size,
                fields: Vec::new(),
            });
        };
        let discriminant = if cases.iter().all(|case| case.value.is_some()) {
            Discriminant::Tagged { offset, size: width }
        } else {
            Discriminant::Niche { offset, size: width }
        };
        Ok(TypeLayout::Variant {
            name,
            size,
            discriminant,
            cases,
        })
    }

    fn member(
        &self,
        unit: &Unit<SectionReader>,
        entry: &DebuggingInformationEntry<'_, '_, SectionReader>,
        depth: usize,
    ) -> StasisResult<Option<Field>>
    {
        let Some(type_ref) = entry
            .attr_value(constants::DW_AT_type)
            .map_err(|err| dwarf_error("reading member type", err))?
        else {
            return Ok(None);
        };
        let name = self.entry_name(unit, entry)?.unwrap_or_default();
        let offset = member_offset(entry)?.unwrap_or(0);
        let layout = self.type_layout(unit, type_ref, depth + 1)?;
        Ok(Some(Field::new(name, offset, layout)))
    }

    fn array_size(
        &self,
        unit: &Unit<SectionReader>,
        entry: &DebuggingInformationEntry<'_, '_, SectionReader>,
        depth: usize,
    ) -> StasisResult<u64>
    {
        let element = match entry
            .attr_value(constants::DW_AT_type)
            .map_err(|err| dwarf_error("reading element type", err))?
        {
            Some(ty) => self.type_layout(unit, ty, depth + 1)?.size(),
            None => return Ok(0),
        };

        let mut total = element;
        let mut tree = unit
            .entries_tree(Some(entry.offset()))
            .map_err(|err| dwarf_error("building array tree", err))?;
        let root = tree.root().map_err(|err| dwarf_error("navigating array root", err))?;
        let mut children = root.children();
        while let Some(child) = children
            .next()
            .map_err(|err| dwarf_error("iterating array dimensions", err))?
        {
            let dimension = child.entry();
            if dimension.tag() != constants::DW_TAG_subrange_type {
                continue;
            }
            let count = match udata(dimension, constants::DW_AT_count)? {
                Some(count) => count,
                None => match udata(dimension, constants::DW_AT_upper_bound)? {
                    Some(upper) => {
                        let lower = udata(dimension, constants::DW_AT_lower_bound)?.unwrap_or(0);
                        (upper + 1).saturating_sub(lower)
                    }
                    None => 0,
                },
            };
            total = total.saturating_mul(count);
        }
        Ok(total)
    }

    fn resolve_ref<'a>(
        &'a self,
        unit: &'a Unit<SectionReader>,
        value: AttributeValue<SectionReader>,
    ) -> Option<(&'a Unit<SectionReader>, UnitOffset)>
    {
        match value {
            AttributeValue::UnitRef(offset) => Some((unit, offset)),
            AttributeValue::DebugInfoRef(offset) => {
                let target = UnitSectionOffset::from(offset);
                self.units
                    .iter()
                    .find_map(|candidate| target.to_unit_offset(candidate).map(|offset| (candidate, offset)))
            }
            _ => None,
        }
    }

    /// `name` on the entry itself, or on what it is an instance of
    fn inherited_attr(
        &self,
        unit: &Unit<SectionReader>,
        entry: &DebuggingInformationEntry<'_, '_, SectionReader>,
        name: DwAt,
    ) -> StasisResult<Option<AttributeValue<SectionReader>>>
    {
        let mut current = entry.clone();
        for _ in 0..MAX_ORIGIN_HOPS {
            if let Some(value) = current
                .attr_value(name)
                .map_err(|err| dwarf_error("reading attribute", err))?
            {
                return Ok(Some(value));
            }
            let origin = match current
                .attr_value(constants::DW_AT_abstract_origin)
                .map_err(|err| dwarf_error("reading DW_AT_abstract_origin", err))?
            {
                Some(origin) => Some(origin),
                None => current
                    .attr_value(constants::DW_AT_specification)
                    .map_err(|err| dwarf_error("reading DW_AT_specification", err))?,
            };
            let Some(AttributeValue::UnitRef(offset)) = origin else {
                return Ok(None);
            };
            current = unit
                .entry(offset)
                .map_err(|err| dwarf_error("following origin", err))?;
        }
        Ok(None)
    }

    fn inherited_string(
        &self,
        unit: &Unit<SectionReader>,
        entry: &DebuggingInformationEntry<'_, '_, SectionReader>,
        name: DwAt,
    ) -> StasisResult<Option<String>>
    {
        match self.inherited_attr(unit, entry, name)? {
            Some(value) => self.attr_to_string(unit, value).map(Some),
            None => Ok(None),
        }
    }

    /// Demangled linkage name when there is one, otherwise the plain name
    fn function_name(
        &self,
        unit: &Unit<SectionReader>,
        entry: &DebuggingInformationEntry<'_, '_, SectionReader>,
    ) -> StasisResult<Option<String>>
    {
        if let Some(linkage) = self.inherited_string(unit, entry, constants::DW_AT_linkage_name)? {
            return Ok(Some(match try_demangle(&linkage) {
                Ok(demangled) => format!("{demangled:#}"),
                Err(_) => linkage,
            }));
        }
        self.inherited_string(unit, entry, constants::DW_AT_name)
    }

    fn entry_name(
        &self,
        unit: &Unit<SectionReader>,
        entry: &DebuggingInformationEntry<'_, '_, SectionReader>,
    ) -> StasisResult<Option<String>>
    {
        match entry
            .attr_value(constants::DW_AT_name)
            .map_err(|err| dwarf_error("reading DW_AT_name", err))?
        {
            Some(value) => self.attr_to_string(unit, value).map(Some),
            None => Ok(None),
        }
    }

    fn attr_to_string(&self, unit: &Unit<SectionReader>, value: AttributeValue<SectionReader>) -> StasisResult<String>
    {
        let reader = self
            .dwarf
            .attr_string(unit, value)
            .map_err(|err| dwarf_error("resolving DWARF string", err))?;
        let text = reader
            .to_string_lossy()
            .map_err(|err| dwarf_error("decoding DWARF string", err))?;
        Ok(text.into_owned())
    }
}

fn load_section(file: &object::File<'_>, id: SectionId, endian: RunTimeEndian) -> StasisResult<SectionReader>
{
    let data: Arc<[u8]> = match file.section_by_name(id.name()) {
        Some(section) => match section
            .uncompressed_data()
            .map_err(|err| StasisError::InvalidArgument(format!("cannot read {}: {err}", id.name())))?
        {
            Cow::Borrowed(bytes) => Arc::from(bytes),
            Cow::Owned(bytes) => Arc::from(bytes),
        },
        None => Arc::from(Vec::new()),
    };
    Ok(EndianArcSlice::new(data, endian))
}

fn byte_size(entry: &DebuggingInformationEntry<'_, '_, SectionReader>) -> StasisResult<Option<u64>>
{
    if let Some(bytes) = udata(entry, constants::DW_AT_byte_size)? {
        return Ok(Some(bytes));
    }
    Ok(udata(entry, constants::DW_AT_bit_size)?.map(|bits| bits.div_ceil(8)))
}

fn member_offset(entry: &DebuggingInformationEntry<'_, '_, SectionReader>) -> StasisResult<Option<u64>>
{
    if let Some(bytes) = udata(entry, constants::DW_AT_data_member_location)? {
        return Ok(Some(bytes));
    }
    Ok(udata(entry, constants::DW_AT_data_bit_offset)?.map(|bits| bits / 8))
}

fn discr_value(entry: &DebuggingInformationEntry<'_, '_, SectionReader>) -> StasisResult<Option<u64>>
{
    let attr = entry
        .attr(constants::DW_AT_discr_value)
        .map_err(|err| dwarf_error("reading DW_AT_discr_value", err))?;
    Ok(attr.and_then(|attr| attr.udata_value().or_else(|| attr.sdata_value().map(|value| value as u64))))
}

fn udata(entry: &DebuggingInformationEntry<'_, '_, SectionReader>, name: DwAt) -> StasisResult<Option<u64>>
{
    let attr = entry
        .attr(name)
        .map_err(|err| dwarf_error("reading constant attribute", err))?;
    Ok(attr.and_then(|attr| attr.udata_value()))
}

fn little_endian(bytes: &[u8]) -> u64
{
    let mut raw = [0u8; 8];
    let len = bytes.len().min(raw.len());
    raw[..len].copy_from_slice(&bytes[..len]);
    u64::from_le_bytes(raw)
}

fn dwarf_error(context: &str, err: gimli::Error) -> StasisError
{
    StasisError::Introspection(format!("{context}: {err}"))
}
