//! # Platform-Specific Implementations
//!
//! Backends implementing [`Inferior`](crate::inferior::Inferior) with a
//! platform's native process-control APIs:
//!
//! - **Linux x86-64**: `ptrace` and `/proc`
//!   - See: [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//!
//! Other platforms can still use capture, restore and the snapshot codec
//! through their own `Inferior` implementation.

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod linux;
