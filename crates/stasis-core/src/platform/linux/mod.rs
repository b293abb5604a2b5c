//! # Linux x86-64 Backend
//!
//! Process control through `ptrace(2)` and `/proc`.

mod debuginfo;
mod ptrace;
mod registers;
mod symbols;

pub use ptrace::PtraceInferior;
pub use symbols::symbol_address;
