//! CPU register names and saved register values.

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::str::FromStr;

/// Width of the NUL-padded register name field in a snapshot
pub const REGISTER_NAME_WIDTH: usize = 8;

macro_rules! register_names {
    ($($variant:ident => $name:literal,)*) => {
        /// Identifier for one register of the fixed x86-64 checkpoint set
        ///
        /// The set covers the general purpose registers, the instruction
        /// pointer, the flags, segment selectors, the x87 stack and control
        /// words, and the SSE control/status register. Variants are ordered in
        /// architecture order, which is also the order they are captured and
        /// serialized in.
        ///
        /// ## Example
        ///
        /// ```rust
        /// use stasis_core::types::RegisterName;
        ///
        /// let rip: RegisterName = "rip".parse().unwrap();
        /// assert_eq!(rip, RegisterName::Rip);
        /// assert_eq!(rip.as_str(), "rip");
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum RegisterName
        {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )*
        }

        impl RegisterName
        {
            /// Every register of the set, in architecture order
            pub const ALL: &'static [RegisterName] = &[$(RegisterName::$variant,)*];

            /// Canonical lowercase name, as stored in snapshots
            pub const fn as_str(self) -> &'static str
            {
                match self {
                    $(RegisterName::$variant => $name,)*
                }
            }
        }

        impl FromStr for RegisterName
        {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err>
            {
                match s {
                    $($name => Ok(RegisterName::$variant),)*
                    _ => Err(format!("Unknown register name: {s}")),
                }
            }
        }
    };
}

register_names! {
    Rax => "rax",
    Rbx => "rbx",
    Rcx => "rcx",
    Rdx => "rdx",
    Rsi => "rsi",
    Rdi => "rdi",
    Rbp => "rbp",
    Rsp => "rsp",
    R8 => "r8",
    R9 => "r9",
    R10 => "r10",
    R11 => "r11",
    R12 => "r12",
    R13 => "r13",
    R14 => "r14",
    R15 => "r15",
    Rip => "rip",
    Eflags => "eflags",
    Cs => "cs",
    Ss => "ss",
    Ds => "ds",
    Es => "es",
    Fs => "fs",
    Gs => "gs",
    St0 => "st0",
    St1 => "st1",
    St2 => "st2",
    St3 => "st3",
    St4 => "st4",
    St5 => "st5",
    St6 => "st6",
    St7 => "st7",
    Fctrl => "fctrl",
    Fstat => "fstat",
    Ftag => "ftag",
    Fiseg => "fiseg",
    Fioff => "fioff",
    Foseg => "foseg",
    Fooff => "fooff",
    Fop => "fop",
    Mxcsr => "mxcsr",
}

impl RegisterName
{
    /// Encode the name into the fixed-width, NUL-padded snapshot field
    pub fn to_field(self) -> [u8; REGISTER_NAME_WIDTH]
    {
        let mut field = [0u8; REGISTER_NAME_WIDTH];
        let name = self.as_str().as_bytes();
        field[..name.len()].copy_from_slice(name);
        field
    }

    /// Decode a fixed-width, NUL-padded snapshot field
    ///
    /// Fails if the bytes after the first NUL are not all NUL, or if the name
    /// is not part of the fixed set.
    ///
    /// ```rust
    /// use stasis_core::types::RegisterName;
    ///
    /// assert_eq!(RegisterName::from_field(b"mxcsr\0\0\0"), Ok(RegisterName::Mxcsr));
    /// assert!(RegisterName::from_field(b"xmm0\0\0\0\0").is_err());
    /// ```
    pub fn from_field(field: &[u8; REGISTER_NAME_WIDTH]) -> Result<Self, String>
    {
        let len = field.iter().position(|&b| b == 0).unwrap_or(REGISTER_NAME_WIDTH);
        if field[len..].iter().any(|&b| b != 0) {
            return Err(format!("register name field {field:02x?} is not NUL-padded"));
        }
        let name = std::str::from_utf8(&field[..len])
            .map_err(|_| format!("register name field {field:02x?} is not valid UTF-8"))?;
        name.parse()
    }
}

impl fmt::Display for RegisterName
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.pad(self.as_str())
    }
}

/// Saved register values keyed by register name
///
/// Iteration follows architecture order regardless of insertion order. A set
/// may hold any subset of [`RegisterName::ALL`]; capture always fills every
/// register. Values are opaque bit patterns.
///
/// ```rust
/// use stasis_core::types::{RegisterName, RegisterSet};
///
/// let mut regs = RegisterSet::new();
/// regs.set(RegisterName::Rip, 0x40_0000);
/// regs.set(RegisterName::Rax, 1);
///
/// let names: Vec<_> = regs.iter().map(|(name, _)| name).collect();
/// assert_eq!(names, [RegisterName::Rax, RegisterName::Rip]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterSet
{
    values: BTreeMap<RegisterName, u64>,
}

impl RegisterSet
{
    /// Create an empty register set
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Value of `name`, if it was saved
    pub fn get(&self, name: RegisterName) -> Option<u64>
    {
        self.values.get(&name).copied()
    }

    /// Store `value` for `name`, returning the previous value
    pub fn set(&mut self, name: RegisterName, value: u64) -> Option<u64>
    {
        self.values.insert(name, value)
    }

    /// Number of saved registers
    pub fn len(&self) -> usize
    {
        self.values.len()
    }

    /// `true` if no register is saved
    pub fn is_empty(&self) -> bool
    {
        self.values.is_empty()
    }

    /// `true` if every register of the fixed set is present
    pub fn is_complete(&self) -> bool
    {
        self.values.len() == RegisterName::ALL.len()
    }

    /// Iterate in architecture order
    pub fn iter(&self) -> impl Iterator<Item = (RegisterName, u64)> + '_
    {
        self.values.iter().map(|(&name, &value)| (name, value))
    }
}

impl FromIterator<(RegisterName, u64)> for RegisterSet
{
    fn from_iter<I: IntoIterator<Item = (RegisterName, u64)>>(iter: I) -> Self
    {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for RegisterSet
{
    type Item = (RegisterName, u64);
    type IntoIter = btree_map::IntoIter<RegisterName, u64>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_fixed_set_has_41_unique_names()
    {
        assert_eq!(RegisterName::ALL.len(), 41);
        let mut names: Vec<&str> = RegisterName::ALL.iter().map(|r| r.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 41);
    }

    #[test]
    fn test_names_fit_field_width()
    {
        for name in RegisterName::ALL {
            assert!(name.as_str().len() <= REGISTER_NAME_WIDTH, "{name} too long");
            assert_eq!(RegisterName::from_field(&name.to_field()), Ok(*name));
        }
    }

    #[test]
    fn test_all_is_sorted_in_architecture_order()
    {
        assert!(RegisterName::ALL.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(RegisterName::ALL[0], RegisterName::Rax);
        assert_eq!(RegisterName::ALL[16], RegisterName::Rip);
        assert_eq!(RegisterName::ALL[40], RegisterName::Mxcsr);
    }

    #[test]
    fn test_from_field_rejects_garbage_after_nul()
    {
        assert!(RegisterName::from_field(b"rax\0x\0\0\0").is_err());
        assert!(RegisterName::from_field(b"\0\0\0\0\0\0\0\0").is_err());
        assert!(RegisterName::from_field(&[0xff; 8]).is_err());
    }

    #[test]
    fn test_register_set_completeness()
    {
        let full: RegisterSet = RegisterName::ALL.iter().map(|&name| (name, 0)).collect();
        assert!(full.is_complete());

        let mut partial = RegisterSet::new();
        partial.set(RegisterName::Rax, 1);
        assert!(!partial.is_complete());
        assert_eq!(partial.get(RegisterName::Rax), Some(1));
        assert_eq!(partial.get(RegisterName::Rbx), None);
    }
}
