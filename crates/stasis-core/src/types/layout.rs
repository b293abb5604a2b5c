//! Structural type descriptions reported by the process-control layer.
//!
//! These mirror what debug information says about a variable's static type:
//! sizes, field names and offsets, and for enum-like types where the
//! discriminant lives. The labeled-value classifier in [`crate::tagged`]
//! matches against this structure instead of against type-name strings.

/// Structural description of a static type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeLayout
{
    /// Integer, float, bool, char or any other opaque leaf
    Scalar
    {
        /// Size in bytes
        size: u64,
    },
    /// Raw pointer or reference
    Pointer
    {
        /// Size in bytes
        size: u64,
    },
    /// Struct, tuple or unit type
    Struct
    {
        /// Type name as reported by debug info (informational only)
        name: String,
        /// Size in bytes
        size: u64,
        /// Fields in declaration order
        fields: Vec<Field>,
    },
    /// Enum with a discriminant (e.g. `Option<T>`)
    Variant
    {
        /// Type name as reported by debug info (informational only)
        name: String,
        /// Size in bytes
        size: u64,
        /// Where the active case is encoded
        discriminant: Discriminant,
        /// Cases in declaration order
        cases: Vec<VariantCase>,
    },
}

impl TypeLayout
{
    /// Size of the type in bytes
    pub fn size(&self) -> u64
    {
        match self {
            TypeLayout::Scalar { size }
            | TypeLayout::Pointer { size }
            | TypeLayout::Struct { size, .. }
            | TypeLayout::Variant { size, .. } => *size,
        }
    }

    /// Fields of a struct type, empty for every other kind
    pub fn fields(&self) -> &[Field]
    {
        match self {
            TypeLayout::Struct { fields, .. } => fields,
            _ => &[],
        }
    }
}

/// Named member at a fixed offset inside its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field
{
    /// Member name
    pub name: String,
    /// Byte offset from the start of the parent
    pub offset: u64,
    /// Type of the member
    pub layout: TypeLayout,
}

impl Field
{
    /// Create a field description
    pub fn new(name: impl Into<String>, offset: u64, layout: TypeLayout) -> Self
    {
        Self {
            name: name.into(),
            offset,
            layout,
        }
    }

    /// One past the last byte of the field relative to the parent
    pub fn end(&self) -> Option<u64>
    {
        self.offset.checked_add(self.layout.size())
    }
}

/// Location of an enum's discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discriminant
{
    /// Dedicated tag bytes at `offset`
    Tagged
    {
        /// Byte offset from the start of the enum
        offset: u64,
        /// Width of the tag in bytes
        size: u64,
    },
    /// No tag: the empty case is encoded as a reserved value inside the
    /// payload (pointer-style options such as `Option<Box<T>>`)
    Niche
    {
        /// Byte offset of the niche from the start of the enum
        offset: u64,
        /// Width of the niche in bytes
        size: u64,
    },
}

/// One case of a [`TypeLayout::Variant`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantCase
{
    /// Case name (`None`, `Some`, ...)
    pub name: String,
    /// Discriminant value selecting this case; `None` for the dataful case
    /// of a niche-encoded enum
    pub value: Option<u64>,
    /// Fields carried by this case, offsets relative to the enum start
    pub fields: Vec<Field>,
}

impl VariantCase
{
    /// Create a case description
    pub fn new(name: impl Into<String>, value: Option<u64>, fields: Vec<Field>) -> Self
    {
        Self {
            name: name.into(),
            value,
            fields,
        }
    }
}
