//! # x86-64 Register Access
//!
//! Mapping between [`RegisterName`] and the kernel's ptrace register
//! structures.
//!
//! - `user_regs_struct` (`PTRACE_GETREGS`): general purpose registers, RIP,
//!   RFLAGS and segment selectors
//! - `user_fpregs_struct` (`PTRACE_GETFPREGS`): the FXSAVE area, holding the
//!   x87 stack and control words and MXCSR
//!
//! x87 stack slots are 80 bits wide. `st0`..`st7` carry the 64-bit mantissa
//! of each slot; writing one leaves the slot's exponent bytes untouched.
//! The FXSAVE instruction and operand pointers are 64 bits wide; `fioff` /
//! `fooff` carry the low halves and `fiseg` / `foseg` the high halves.
//!
//! ## References
//!
//! - [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - Intel SDM Vol. 1, §10.5.1 (FXSAVE area layout)

use libc::{user_fpregs_struct, user_regs_struct};

use crate::types::RegisterName;

/// Which ptrace structure holds a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegisterBank
{
    /// `PTRACE_GETREGS` / `PTRACE_SETREGS`
    General,
    /// `PTRACE_GETFPREGS` / `PTRACE_SETFPREGS`
    FloatingPoint,
}

pub(crate) fn bank(name: RegisterName) -> RegisterBank
{
    use RegisterName::*;
    match name {
        Rax | Rbx | Rcx | Rdx | Rsi | Rdi | Rbp | Rsp | R8 | R9 | R10 | R11 | R12 | R13 | R14 | R15 | Rip | Eflags
        | Cs | Ss | Ds | Es | Fs | Gs => RegisterBank::General,
        _ => RegisterBank::FloatingPoint,
    }
}

fn general_slot(regs: &mut user_regs_struct, name: RegisterName) -> Option<&mut u64>
{
    use RegisterName::*;
    Some(match name {
        Rax => &mut regs.rax,
        Rbx => &mut regs.rbx,
        Rcx => &mut regs.rcx,
        Rdx => &mut regs.rdx,
        Rsi => &mut regs.rsi,
        Rdi => &mut regs.rdi,
        Rbp => &mut regs.rbp,
        Rsp => &mut regs.rsp,
        R8 => &mut regs.r8,
        R9 => &mut regs.r9,
        R10 => &mut regs.r10,
        R11 => &mut regs.r11,
        R12 => &mut regs.r12,
        R13 => &mut regs.r13,
        R14 => &mut regs.r14,
        R15 => &mut regs.r15,
        Rip => &mut regs.rip,
        Eflags => &mut regs.eflags,
        Cs => &mut regs.cs,
        Ss => &mut regs.ss,
        Ds => &mut regs.ds,
        Es => &mut regs.es,
        Fs => &mut regs.fs,
        Gs => &mut regs.gs,
        _ => return None,
    })
}

pub(crate) fn get_general(regs: &user_regs_struct, name: RegisterName) -> Option<u64>
{
    let mut copy = *regs;
    general_slot(&mut copy, name).map(|slot| *slot)
}

pub(crate) fn set_general(regs: &mut user_regs_struct, name: RegisterName, value: u64) -> Option<()>
{
    general_slot(regs, name).map(|slot| *slot = value)
}

/// Index of an x87 stack register, `st0` = 0
fn st_index(name: RegisterName) -> Option<usize>
{
    use RegisterName::*;
    match name {
        St0 => Some(0),
        St1 => Some(1),
        St2 => Some(2),
        St3 => Some(3),
        St4 => Some(4),
        St5 => Some(5),
        St6 => Some(6),
        St7 => Some(7),
        _ => None,
    }
}

const fn low(value: u64) -> u64
{
    value & 0xffff_ffff
}

const fn high(value: u64) -> u64
{
    value >> 32
}

pub(crate) fn get_fp(fp: &user_fpregs_struct, name: RegisterName) -> Option<u64>
{
    use RegisterName::*;
    if let Some(i) = st_index(name) {
        // each slot is 16 bytes = 4 words; the mantissa is the first two
        return Some(u64::from(fp.st_space[i * 4]) | (u64::from(fp.st_space[i * 4 + 1]) << 32));
    }
    Some(match name {
        Fctrl => u64::from(fp.cwd),
        Fstat => u64::from(fp.swd),
        Ftag => u64::from(fp.ftw),
        Fop => u64::from(fp.fop),
        Fioff => low(fp.rip),
        Fiseg => high(fp.rip),
        Fooff => low(fp.rdp),
        Foseg => high(fp.rdp),
        Mxcsr => u64::from(fp.mxcsr),
        _ => return None,
    })
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn set_fp(fp: &mut user_fpregs_struct, name: RegisterName, value: u64) -> Option<()>
{
    use RegisterName::*;
    if let Some(i) = st_index(name) {
        fp.st_space[i * 4] = value as u32;
        fp.st_space[i * 4 + 1] = (value >> 32) as u32;
        return Some(());
    }
    match name {
        Fctrl => fp.cwd = value as u16,
        Fstat => fp.swd = value as u16,
        Ftag => fp.ftw = value as u16,
        Fop => fp.fop = value as u16,
        Fioff => fp.rip = (high(fp.rip) << 32) | low(value),
        Fiseg => fp.rip = (low(value) << 32) | low(fp.rip),
        Fooff => fp.rdp = (high(fp.rdp) << 32) | low(value),
        Foseg => fp.rdp = (low(value) << 32) | low(fp.rdp),
        Mxcsr => fp.mxcsr = value as u32,
        _ => return None,
    }
    Some(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn zeroed_regs() -> user_regs_struct
    {
        // SAFETY: plain-old-data kernel structure, all-zero is a valid value
        unsafe { std::mem::zeroed() }
    }

    fn zeroed_fp() -> user_fpregs_struct
    {
        // SAFETY: plain-old-data kernel structure, all-zero is a valid value
        unsafe { std::mem::zeroed() }
    }

    #[test]
    fn test_every_register_has_a_slot()
    {
        let mut regs = zeroed_regs();
        let mut fp = zeroed_fp();
        for &name in RegisterName::ALL {
            let found = match bank(name) {
                RegisterBank::General => set_general(&mut regs, name, 1),
                RegisterBank::FloatingPoint => set_fp(&mut fp, name, 1),
            };
            assert_eq!(found, Some(()), "{name}");
        }
    }

    #[test]
    fn test_general_registers_are_independent()
    {
        let mut regs = zeroed_regs();
        for (i, &name) in RegisterName::ALL.iter().enumerate() {
            if bank(name) == RegisterBank::General {
                set_general(&mut regs, name, 0x1000 + i as u64);
            }
        }
        for (i, &name) in RegisterName::ALL.iter().enumerate() {
            if bank(name) == RegisterBank::General {
                assert_eq!(get_general(&regs, name), Some(0x1000 + i as u64), "{name}");
            }
        }
    }

    #[test]
    fn test_st_mantissa_preserves_exponent()
    {
        let mut fp = zeroed_fp();
        fp.st_space[2 * 4 + 2] = 0x3fff;
        set_fp(&mut fp, RegisterName::St2, 0x8000_0000_0000_0001).unwrap();
        assert_eq!(get_fp(&fp, RegisterName::St2), Some(0x8000_0000_0000_0001));
        assert_eq!(fp.st_space[2 * 4 + 2], 0x3fff);
        assert_eq!(get_fp(&fp, RegisterName::St1), Some(0));
    }

    #[test]
    fn test_fpu_pointer_halves()
    {
        let mut fp = zeroed_fp();
        set_fp(&mut fp, RegisterName::Fioff, 0x1234_5678).unwrap();
        set_fp(&mut fp, RegisterName::Fiseg, 0x9abc).unwrap();
        assert_eq!(fp.rip, 0x9abc_1234_5678);
        assert_eq!(get_fp(&fp, RegisterName::Fioff), Some(0x1234_5678));
        assert_eq!(get_fp(&fp, RegisterName::Fiseg), Some(0x9abc));

        set_fp(&mut fp, RegisterName::Fooff, 0xdead_beef).unwrap();
        set_fp(&mut fp, RegisterName::Foseg, 0x1).unwrap();
        assert_eq!(fp.rdp, 0x1_dead_beef);
    }
}
