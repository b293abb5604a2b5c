//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed virtual address in the target process
///
/// Addresses saved in a snapshot belong to the *capturing* process; they are
/// only meaningful relative to that process's layout. Keeping them in a
/// newtype stops sizes and counts from being mixed up with them.
///
/// ## Example
///
/// ```rust
/// use stasis_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100;
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// ```rust
    /// use stasis_core::types::Address;
    ///
    /// const STACK_BASE: Address = Address::new(0x7fff_0000_0000);
    /// assert_eq!(STACK_BASE.value(), 0x7fff_0000_0000);
    /// ```
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use stasis_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, checking for underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Add an offset to this address, saturating at the maximum value
    pub fn saturating_add(self, offset: u64) -> Self
    {
        Address(self.0.saturating_add(offset))
    }

    /// Round down to a multiple of `align` (a power of two)
    ///
    /// ```rust
    /// use stasis_core::types::Address;
    ///
    /// assert_eq!(Address::new(0x1234).align_down(0x1000), Address::new(0x1000));
    /// ```
    pub const fn align_down(self, align: u64) -> Self
    {
        Address(self.0 & !(align - 1))
    }

    /// Round up to a multiple of `align` (a power of two), saturating at the
    /// highest aligned address
    ///
    /// ```rust
    /// use stasis_core::types::Address;
    ///
    /// assert_eq!(Address::new(0x1001).align_up(0x1000), Address::new(0x2000));
    /// assert_eq!(Address::new(0x2000).align_up(0x1000), Address::new(0x2000));
    /// ```
    pub const fn align_up(self, align: u64) -> Self
    {
        let mask = align - 1;
        match self.0.checked_add(mask) {
            Some(value) => Address(value & !mask),
            None => Address(u64::MAX & !mask),
        }
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
