//! # Labeled Values
//!
//! Recognition of labeled values: an optional payload plus metadata, laid out
//! in memory as
//!
//! ```text
//! struct Labeled<T, L> {
//!     val: Option<T>,      // discriminant + payload
//!     metadata: L::Meta,   // always present
//! }
//! ```
//!
//! [`ValueShape::classify`] is the single place that decides what counts as a
//! labeled value. It matches the structural type description (field names,
//! offsets and sizes, and where the option's discriminant lives), never the
//! type's name, so renaming or re-parameterising the type does not break
//! recognition.

use crate::types::{Address, Discriminant, Field, MemoryKey, TypeLayout, VariantCase};

/// Widest discriminant the classifier will decode
const MAX_DISCRIMINANT_SIZE: u64 = 8;

/// Value shapes known to the stack scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueShape
{
    /// `{ val: Option<T>, metadata: M }`
    Labeled(LabeledLayout),
    /// Anything else; skipped by the scanner
    Other,
}

impl ValueShape
{
    /// Classify a static type
    ///
    /// ```rust
    /// use stasis_core::tagged::ValueShape;
    /// use stasis_core::types::TypeLayout;
    ///
    /// let int = TypeLayout::Scalar { size: 4 };
    /// assert_eq!(ValueShape::classify(&int), ValueShape::Other);
    /// ```
    pub fn classify(layout: &TypeLayout) -> Self
    {
        LabeledLayout::from_layout(layout).map_or(ValueShape::Other, ValueShape::Labeled)
    }

    /// The labeled layout, if this is one
    pub fn labeled(self) -> Option<LabeledLayout>
    {
        match self {
            ValueShape::Labeled(layout) => Some(layout),
            ValueShape::Other => None,
        }
    }
}

/// Byte range relative to the start of an enclosing value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span
{
    /// Offset from the enclosing value's start
    pub offset: u64,
    /// Length in bytes
    pub size: u64,
}

impl Span
{
    fn of(field: &Field) -> Self
    {
        Span {
            offset: field.offset,
            size: field.layout.size(),
        }
    }

    /// Absolute key of this span for a value at `base`
    pub fn at(self, base: Address) -> MemoryKey
    {
        MemoryKey::new(base + self.offset, self.size)
    }

    fn fits_in(self, size: u64) -> bool
    {
        self.offset.checked_add(self.size).is_some_and(|end| end <= size)
    }
}

/// How an option encodes presence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence
{
    /// Dedicated tag; present when the tag equals `some`
    Tagged
    {
        /// Tag bytes, relative to the option start
        tag: Span,
        /// Tag value of the `Some` case
        some: u64,
    },
    /// Niche in the payload; present when the niche differs from `none`
    Niche
    {
        /// Niche bytes, relative to the option start
        niche: Span,
        /// Niche value that encodes `None`
        none: u64,
    },
}

impl Presence
{
    /// Bytes that must be read to decide presence, relative to the option
    pub fn span(self) -> Span
    {
        match self {
            Presence::Tagged { tag, .. } => tag,
            Presence::Niche { niche, .. } => niche,
        }
    }

    /// Decide presence from the little-endian bytes at [`Presence::span`]
    pub fn is_present(self, bytes: &[u8]) -> bool
    {
        let mut raw = [0u8; 8];
        let len = bytes.len().min(raw.len());
        raw[..len].copy_from_slice(&bytes[..len]);
        let value = u64::from_le_bytes(raw);
        match self {
            Presence::Tagged { some, .. } => value == some,
            Presence::Niche { none, .. } => value != none,
        }
    }
}

/// Memory layout of an `Option<T>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionLayout
{
    /// Presence encoding
    pub presence: Presence,
    /// Payload of the `Some` case, relative to the option start
    pub payload: Span,
}

/// Memory layout of a labeled value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabeledLayout
{
    /// The whole `val` option (discriminant and payload), relative to the
    /// labeled value
    pub outer: Span,
    /// Encoding of the option
    pub option: OptionLayout,
    /// The `metadata` field, relative to the labeled value
    pub metadata: Span,
}

impl LabeledLayout
{
    fn from_layout(layout: &TypeLayout) -> Option<Self>
    {
        let TypeLayout::Struct { size, fields, .. } = layout else {
            return None;
        };
        if fields.len() != 2 {
            return None;
        }
        let val = fields.iter().find(|f| f.name == "val")?;
        let metadata = fields.iter().find(|f| f.name == "metadata")?;

        let outer = Span::of(val);
        let metadata = Span::of(metadata);
        if !outer.fits_in(*size) || !metadata.fits_in(*size) {
            return None;
        }

        let option = OptionLayout::from_layout(&val.layout)?;
        Some(Self {
            outer,
            option,
            metadata,
        })
    }

    /// Absolute range of the presence bytes for a value at `base`
    pub fn presence_key(&self, base: Address) -> MemoryKey
    {
        let tag = self.option.presence.span();
        MemoryKey::new(base + self.outer.offset + tag.offset, tag.size)
    }

    /// Ranges to capture for a value at `base`
    ///
    /// Present: outer option, inner payload, metadata. Absent: outer option
    /// and metadata; the payload holds no valid value and is left alone.
    ///
    /// A niche-encoded option whose payload spans the whole option (a boxed
    /// or referenced payload) yields the same key for the outer option and the
    /// payload. Snapshots key blobs by range, so such a present value is
    /// stored as two blobs, not three.
    pub fn capture_keys(&self, base: Address, present: bool) -> Vec<MemoryKey>
    {
        let outer_base = base + self.outer.offset;
        let mut keys = vec![self.outer.at(base)];
        if present {
            keys.push(self.option.payload.at(outer_base));
        }
        keys.push(self.metadata.at(base));
        keys
    }
}

impl OptionLayout
{
    fn from_layout(layout: &TypeLayout) -> Option<Self>
    {
        let TypeLayout::Variant {
            size,
            discriminant,
            cases,
            ..
        } = layout
        else {
            return None;
        };
        if cases.len() != 2 {
            return None;
        }
        let none = case_named(cases, "None")?;
        let some = case_named(cases, "Some")?;
        if !none.fields.is_empty() {
            return None;
        }
        let [payload] = some.fields.as_slice() else {
            return None;
        };
        let payload = Span::of(payload);
        if !payload.fits_in(*size) {
            return None;
        }

        let presence = match *discriminant {
            Discriminant::Tagged { offset, size: tag_size } => Presence::Tagged {
                tag: Span { offset, size: tag_size },
                some: some.value?,
            },
            Discriminant::Niche { offset, size: niche_size } => Presence::Niche {
                niche: Span {
                    offset,
                    size: niche_size,
                },
                none: none.value?,
            },
        };
        let span = presence.span();
        if span.size == 0 || span.size > MAX_DISCRIMINANT_SIZE || !span.fits_in(*size) {
            return None;
        }

        Some(Self { presence, payload })
    }
}

fn case_named<'a>(cases: &'a [VariantCase], name: &str) -> Option<&'a VariantCase>
{
    cases.iter().find(|c| c.name == name)
}
