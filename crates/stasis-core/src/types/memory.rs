//! Memory mapping and saved-range types.

use std::fmt;
use std::str::FromStr;

use super::Address;

/// Access permissions of a mapped region
///
/// Parsed from the four-character `rwxp`/`rwxs` column of a mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions
{
    /// Region may be read
    pub readable: bool,
    /// Region may be written
    pub writable: bool,
    /// Region may be executed
    pub executable: bool,
    /// Region is shared rather than copy-on-write private
    pub shared: bool,
}

impl Permissions
{
    /// Read + write, private
    pub const READ_WRITE: Self = Self {
        readable: true,
        writable: true,
        executable: false,
        shared: false,
    };

    /// Read only, private
    pub const READ_ONLY: Self = Self {
        readable: true,
        writable: false,
        executable: false,
        shared: false,
    };

    /// Read + execute, private
    pub const READ_EXECUTE: Self = Self {
        readable: true,
        writable: false,
        executable: true,
        shared: false,
    };
}

impl FromStr for Permissions
{
    type Err = String;

    /// ```rust
    /// use stasis_core::types::Permissions;
    ///
    /// let perms: Permissions = "rw-p".parse().unwrap();
    /// assert!(perms.writable && !perms.executable);
    /// assert!("rw".parse::<Permissions>().is_ok());
    /// assert!("rq-p".parse::<Permissions>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 {
            return Err(format!("Invalid permission string: {s:?}"));
        }

        let flag = |index: usize, set: u8| -> Result<bool, String> {
            match bytes.get(index) {
                None | Some(b'-') => Ok(false),
                Some(&c) if c == set => Ok(true),
                Some(_) => Err(format!("Invalid permission string: {s:?}")),
            }
        };

        let shared = match bytes.get(3) {
            None | Some(b'p') => false,
            Some(b's') => true,
            Some(_) => return Err(format!("Invalid permission string: {s:?}")),
        };

        Ok(Self {
            readable: flag(0, b'r')?,
            writable: flag(1, b'w')?,
            executable: flag(2, b'x')?,
            shared,
        })
    }
}

impl fmt::Display for Permissions
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(
            f,
            "{}{}{}{}",
            if self.readable { 'r' } else { '-' },
            if self.writable { 'w' } else { '-' },
            if self.executable { 'x' } else { '-' },
            if self.shared { 's' } else { 'p' },
        )
    }
}

/// One row of a process mapping table
///
/// ## Examples
///
/// ```
/// use stasis_core::types::{Address, MappedRegion, Permissions};
///
/// let heap = MappedRegion::new(Address::new(0x5000), 0x2000, Permissions::READ_WRITE, Some("[heap]".into()));
/// assert_eq!(heap.end(), Address::new(0x7000));
/// assert!(heap.is_writable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRegion
{
    /// Start address of the region (inclusive)
    pub start: Address,
    /// Length of the region in bytes
    pub length: u64,
    /// Access permissions
    pub permissions: Permissions,
    /// Backing file or pseudo-name such as `[heap]` or `[stack]`
    pub path: Option<String>,
}

impl MappedRegion
{
    /// Create a mapping row
    pub fn new(start: Address, length: u64, permissions: Permissions, path: Option<String>) -> Self
    {
        Self {
            start,
            length,
            permissions,
            path,
        }
    }

    /// End address of the region (exclusive), saturating at `u64::MAX`
    pub fn end(&self) -> Address
    {
        self.start.saturating_add(self.length)
    }

    /// Whether the process may write to this region
    pub fn is_writable(&self) -> bool
    {
        self.permissions.writable
    }

    /// Key describing the whole region
    pub fn key(&self) -> MemoryKey
    {
        MemoryKey::new(self.start, self.length)
    }
}

/// Saved byte range, identified by `(address, length)`
///
/// Keys order by address first, then by length, which gives snapshots a
/// stable, layout-derived serialization order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryKey
{
    /// First byte of the range in the capturing process
    pub address: Address,
    /// Number of bytes
    pub length: u64,
}

impl MemoryKey
{
    /// Create a key for `length` bytes at `address`
    pub const fn new(address: Address, length: u64) -> Self
    {
        Self { address, length }
    }

    /// One past the last byte, saturating at `u64::MAX`
    pub fn end(&self) -> Address
    {
        self.address.saturating_add(self.length)
    }

    /// `true` if the two ranges share at least one byte
    ///
    /// ```rust
    /// use stasis_core::types::{Address, MemoryKey};
    ///
    /// let a = MemoryKey::new(Address::new(0x1000), 0x100);
    /// assert!(a.overlaps(&MemoryKey::new(Address::new(0x10ff), 1)));
    /// assert!(!a.overlaps(&MemoryKey::new(Address::new(0x1100), 1)));
    /// ```
    pub fn overlaps(&self, other: &MemoryKey) -> bool
    {
        self.length > 0 && other.length > 0 && self.address < other.end() && other.address < self.end()
    }
}

impl fmt::Display for MemoryKey
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}+{:#x}", self.address, self.length)
    }
}
