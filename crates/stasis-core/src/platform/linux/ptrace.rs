//! # ptrace Inferior
//!
//! [`Inferior`] implementation for Linux x86-64 processes.
//!
//! - Registers: `PTRACE_GETREGS` / `PTRACE_GETFPREGS` and their setters
//! - Memory: `/proc/<pid>/mem`, which bypasses page protection the same way
//!   `PTRACE_POKEDATA` does, without the word-at-a-time round trips
//! - Mapping table: `/proc/<pid>/maps`
//! - New mappings: an `mmap` system call injected at the current stop
//!   location, then undone instruction-wise
//! - Stack: frame-pointer chain, described with the executable's DWARF when
//!   it has any. Targets must keep frame pointers; without debug info every
//!   frame is opaque
//!
//! Launched programs run with address space randomization disabled so a
//! restore run sees the same stack, heap and library addresses as the
//! capture run.
//!
//! ## References
//!
//! - [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - [proc_pid_mem(5)](https://man7.org/linux/man-pages/man5/proc_pid_mem.5.html)
//! - [personality(2)](https://man7.org/linux/man-pages/man2/personality.2.html)

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::ptr;

use libc::{c_int, c_void, pid_t, user_fpregs_struct, user_regs_struct};
use once_cell::sync::Lazy;
use tracing::{debug, info, trace, warn};

use super::debuginfo::{DebugInfo, FrameRegisters, RawFrame};
use super::registers::{self, RegisterBank};
use super::symbols::{load_bias, symbol_address};
use crate::error::{MappingError, StasisError, StasisResult};
use crate::inferior::Inferior;
use crate::regions::parse_proc_maps;
use crate::types::{Address, Frame, MappedRegion, RegisterName};

static PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 { 4096 } else { size as u64 }
});

const INT3: u8 = 0xcc;
const SYSCALL: [u8; 2] = [0x0f, 0x05];
const MAX_FRAMES: usize = 4096;

/// How a `waitpid` came back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitStatus
{
    Stopped(c_int),
    Exited(c_int),
    Signaled(c_int),
}

/// A traced process, stopped whenever this type hands control back
pub struct PtraceInferior
{
    pid: pid_t,
    executable: PathBuf,
    mem: File,
    debug: Option<DebugInfo>,
    launched: bool,
    exited: bool,
}

impl PtraceInferior
{
    /// Start `program` with `args`, stopped before its first instruction
    ///
    /// ## Errors
    ///
    /// Fails if the program cannot be found, forked or traced.
    pub fn launch(program: &Path, args: &[String]) -> StasisResult<Self>
    {
        let program = program.canonicalize()?;
        let path = CString::new(program.as_os_str().as_bytes())
            .map_err(|_| StasisError::InvalidArgument(format!("program path {} contains NUL", program.display())))?;
        let mut argv = vec![path.clone()];
        for arg in args {
            argv.push(
                CString::new(arg.as_str())
                    .map_err(|_| StasisError::InvalidArgument(format!("argument {arg:?} contains NUL")))?,
            );
        }
        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(ptr::null());

        // Everything the child touches is allocated before the fork
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(ptrace_error("fork"));
        }
        if pid == 0 {
            unsafe {
                libc::ptrace(libc::PTRACE_TRACEME, 0, ptr::null_mut::<c_void>(), ptr::null_mut::<c_void>());
                libc::personality(libc::ADDR_NO_RANDOMIZE as libc::c_ulong);
                libc::execv(path.as_ptr(), argv_ptrs.as_ptr());
                libc::_exit(127);
            }
        }

        match wait_for(pid)? {
            WaitStatus::Stopped(libc::SIGTRAP) => {}
            other => {
                return Err(StasisError::Ptrace {
                    operation: "execv",
                    details: format!("{} did not start under trace: {other:?}", program.display()),
                });
            }
        }
        request(libc::PTRACE_SETOPTIONS, pid, 0, libc::PTRACE_O_EXITKILL as usize, "PTRACE_SETOPTIONS")?;

        let mem = open_mem(pid)?;
        info!(pid, program = %program.display(), "launched target");
        Ok(Self {
            pid,
            debug: load_debug_info(&program),
            executable: program,
            mem,
            launched: true,
            exited: false,
        })
    }

    /// Attach to a running process and stop it
    pub fn attach(pid: u32) -> StasisResult<Self>
    {
        let raw = pid_t::try_from(pid).map_err(|_| StasisError::InvalidArgument(format!("invalid pid {pid}")))?;
        let executable = fs::read_link(format!("/proc/{pid}/exe")).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => StasisError::ProcessNotFound(pid),
            _ => StasisError::Io(err),
        })?;

        request(libc::PTRACE_ATTACH, raw, 0, 0, "PTRACE_ATTACH")?;
        match wait_for(raw)? {
            WaitStatus::Stopped(_) => {}
            _ => return Err(StasisError::ProcessNotFound(pid)),
        }

        let mem = open_mem(raw)?;
        info!(pid, executable = %executable.display(), "attached to target");
        Ok(Self {
            pid: raw,
            debug: load_debug_info(&executable),
            executable,
            mem,
            launched: false,
            exited: false,
        })
    }

    /// Process ID of the target
    pub fn pid(&self) -> u32
    {
        self.pid as u32
    }

    /// Whether frames can be described with variable scopes
    pub fn has_debug_info(&self) -> bool
    {
        self.debug.is_some()
    }

    /// Frame-pointer walk from the current stop
    ///
    /// At a function's first instruction the return address is still on top
    /// of the stack and `rbp` belongs to the caller.
    fn walk_stack(&self, regs: &user_regs_struct, at_entry: bool) -> Vec<RawFrame>
    {
        let mut frames = vec![RawFrame {
            pc: regs.rip,
            registers: FrameRegisters::innermost(regs, at_entry),
            return_address: false,
        }];
        if at_entry {
            if let Some(ret) = self.read_word(regs.rsp).filter(|&ret| ret != 0) {
                frames.push(caller_frame(ret, regs.rsp.wrapping_add(8), regs.rbp));
            }
        }

        let mut fp = regs.rbp;
        while fp != 0 && frames.len() < MAX_FRAMES {
            let (Some(saved_fp), Some(ret)) = (self.read_word(fp), self.read_word(fp.wrapping_add(8))) else {
                break;
            };
            if ret == 0 {
                break;
            }
            frames.push(caller_frame(ret, fp.wrapping_add(16), saved_fp));
            // The caller's frame lives higher on the stack
            if saved_fp <= fp {
                break;
            }
            fp = saved_fp;
        }
        frames
    }

    fn read_word(&self, addr: u64) -> Option<u64>
    {
        let mut word = [0u8; 8];
        self.mem.read_exact_at(&mut word, addr).ok()?;
        Some(u64::from_le_bytes(word))
    }

    /// Path of the traced executable
    pub fn executable(&self) -> &Path
    {
        &self.executable
    }

    /// Let the target run until it executes the instruction at `addr`
    ///
    /// A temporary breakpoint is planted and removed again; on return the
    /// target is stopped with its program counter at `addr`.
    pub fn run_to(&mut self, addr: Address) -> StasisResult<()>
    {
        let mut original = [0u8; 1];
        self.mem.read_exact_at(&mut original, addr.value()).map_err(|err| {
            StasisError::InvalidArgument(format!("cannot plant breakpoint at {addr}: {err}"))
        })?;
        self.write_memory(addr, &[INT3])?;
        debug!(address = %addr, "temporary breakpoint planted");

        let mut signal = 0;
        loop {
            request(libc::PTRACE_CONT, self.pid, 0, signal as usize, "PTRACE_CONT")?;
            match wait_for(self.pid)? {
                WaitStatus::Stopped(libc::SIGTRAP) => break,
                WaitStatus::Stopped(other) => {
                    trace!(signal = other, "forwarding signal");
                    signal = other;
                }
                status => {
                    self.exited = true;
                    return Err(StasisError::InvalidArgument(format!(
                        "target ended before reaching {addr}: {status:?}"
                    )));
                }
            }
        }

        self.write_memory(addr, &original)?;
        let rip = self.read_register(RegisterName::Rip)?;
        if rip != addr.value() + 1 {
            warn!(rip = %Address::new(rip), expected = %addr, "stopped by an unexpected trap");
        }
        self.write_register(RegisterName::Rip, addr.value())?;
        info!(address = %addr, "target stopped at checkpoint location");
        Ok(())
    }

    /// [`run_to`](Self::run_to) the function called `symbol`
    pub fn run_to_symbol(&mut self, symbol: &str) -> StasisResult<Address>
    {
        let mappings = self.mappings()?;
        let addr = symbol_address(&self.executable, symbol, &mappings)?;
        self.run_to(addr)?;
        Ok(addr)
    }

    /// Block until the target exits, forwarding signals it receives
    ///
    /// Returns the exit code, or `128 + signal` when it was killed.
    pub fn wait_for_exit(&mut self) -> StasisResult<i32>
    {
        if self.exited {
            return Err(StasisError::ProcessNotFound(self.pid()));
        }
        loop {
            match wait_for(self.pid)? {
                WaitStatus::Stopped(signal) => {
                    let forward = if signal == libc::SIGTRAP { 0 } else { signal };
                    request(libc::PTRACE_CONT, self.pid, 0, forward as usize, "PTRACE_CONT")?;
                }
                WaitStatus::Exited(code) => {
                    self.exited = true;
                    info!(pid = self.pid, code, "target exited");
                    return Ok(code);
                }
                WaitStatus::Signaled(signal) => {
                    self.exited = true;
                    info!(pid = self.pid, signal, "target killed by signal");
                    return Ok(128 + signal);
                }
            }
        }
    }

    /// Stop tracing and let the target run on its own
    pub fn detach(mut self) -> StasisResult<()>
    {
        request(libc::PTRACE_DETACH, self.pid, 0, 0, "PTRACE_DETACH")?;
        self.exited = true;
        Ok(())
    }

    fn general_registers(&self) -> StasisResult<user_regs_struct>
    {
        let mut regs: user_regs_struct = unsafe { std::mem::zeroed() };
        request(libc::PTRACE_GETREGS, self.pid, 0, &mut regs as *mut _ as usize, "PTRACE_GETREGS")?;
        Ok(regs)
    }

    fn set_general_registers(&mut self, regs: &user_regs_struct) -> StasisResult<()>
    {
        request(libc::PTRACE_SETREGS, self.pid, 0, regs as *const _ as usize, "PTRACE_SETREGS")?;
        Ok(())
    }

    fn fp_registers(&self) -> StasisResult<user_fpregs_struct>
    {
        let mut fp: user_fpregs_struct = unsafe { std::mem::zeroed() };
        request(libc::PTRACE_GETFPREGS, self.pid, 0, &mut fp as *mut _ as usize, "PTRACE_GETFPREGS")?;
        Ok(fp)
    }

    fn set_fp_registers(&mut self, fp: &user_fpregs_struct) -> StasisResult<()>
    {
        request(libc::PTRACE_SETFPREGS, self.pid, 0, fp as *const _ as usize, "PTRACE_SETFPREGS")?;
        Ok(())
    }

    /// Execute `mmap` inside the target at its current stop location
    fn inject_mmap(&mut self, start: Address, length: u64) -> StasisResult<u64>
    {
        let saved = self.general_registers()?;
        let rip = Address::new(saved.rip);
        let mut code = [0u8; 2];
        self.mem
            .read_exact_at(&mut code, rip.value())
            .map_err(|err| MappingError::new(rip, 2, format!("cannot save code at rip: {err}")))?;

        let mut regs = saved;
        regs.rax = libc::SYS_mmap as u64;
        regs.rdi = start.value();
        regs.rsi = length;
        regs.rdx = (libc::PROT_READ | libc::PROT_WRITE) as u64;
        regs.r10 = (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE) as u64;
        regs.r8 = u64::MAX;
        regs.r9 = 0;

        self.write_memory(rip, &SYSCALL)?;
        self.set_general_registers(&regs)?;
        let stepped = request(libc::PTRACE_SINGLESTEP, self.pid, 0, 0, "PTRACE_SINGLESTEP")
            .and_then(|_| wait_for(self.pid))
            .and_then(|status| match status {
                WaitStatus::Stopped(_) => self.general_registers().map(|after| after.rax),
                _ => Err(StasisError::ProcessNotFound(self.pid())),
            });

        // Undo the injection even when the step failed
        self.write_memory(rip, &code)?;
        self.set_general_registers(&saved)?;
        stepped
    }
}

impl Inferior for PtraceInferior
{
    fn read_register(&self, name: RegisterName) -> StasisResult<u64>
    {
        let value = match registers::bank(name) {
            RegisterBank::General => registers::get_general(&self.general_registers()?, name),
            RegisterBank::FloatingPoint => registers::get_fp(&self.fp_registers()?, name),
        };
        value.ok_or_else(|| StasisError::InvalidArgument(format!("register {name} is not available")))
    }

    fn write_register(&mut self, name: RegisterName, value: u64) -> StasisResult<()>
    {
        let missing = || StasisError::InvalidArgument(format!("register {name} is not available"));
        match registers::bank(name) {
            RegisterBank::General => {
                let mut regs = self.general_registers()?;
                registers::set_general(&mut regs, name, value).ok_or_else(missing)?;
                self.set_general_registers(&regs)
            }
            RegisterBank::FloatingPoint => {
                let mut fp = self.fp_registers()?;
                registers::set_fp(&mut fp, name, value).ok_or_else(missing)?;
                self.set_fp_registers(&fp)
            }
        }
    }

    fn read_memory(&self, addr: Address, len: usize) -> StasisResult<Vec<u8>>
    {
        let mut buf = vec![0u8; len];
        self.mem
            .read_exact_at(&mut buf, addr.value())
            .map_err(|err| MappingError::new(addr, len as u64, err.to_string()))?;
        Ok(buf)
    }

    fn write_memory(&mut self, addr: Address, data: &[u8]) -> Result<(), MappingError>
    {
        self.mem
            .write_all_at(data, addr.value())
            .map_err(|err| MappingError::new(addr, data.len() as u64, err.to_string()))
    }

    fn mappings(&self) -> StasisResult<Vec<MappedRegion>>
    {
        let text = fs::read_to_string(format!("/proc/{}/maps", self.pid)).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => StasisError::ProcessNotFound(self.pid()),
            _ => StasisError::Io(err),
        })?;
        parse_proc_maps(&text)
    }

    fn establish_mapping(&mut self, addr: Address, length: u64) -> Result<(), MappingError>
    {
        let page = *PAGE_SIZE;
        let start = addr.align_down(page);
        let end = addr.saturating_add(length).align_up(page);
        let span = end.value() - start.value();
        debug!(start = %start, length = span, "injecting mmap");

        let result = self
            .inject_mmap(start, span)
            .map_err(|err| MappingError::new(addr, length, err.to_string()))?;

        // Kernel errors come back as -errno in rax
        let signed = result as i64;
        if (-4095..0).contains(&signed) {
            let err = io::Error::from_raw_os_error(-signed as i32);
            return Err(MappingError::new(addr, length, format!("mmap failed: {err}")));
        }
        if result != start.value() {
            return Err(MappingError::new(
                addr,
                length,
                format!("mmap placed the mapping at {} instead", Address::new(result)),
            ));
        }
        info!(start = %start, length = span, "mapping established in target");
        Ok(())
    }

    fn stack_frames(&self) -> StasisResult<Vec<Frame>>
    {
        let regs = self.general_registers()?;
        let Some(debug) = &self.debug else {
            let frames: Vec<Frame> = self
                .walk_stack(&regs, false)
                .iter()
                .map(|raw| Frame::opaque(Address::new(raw.pc)))
                .collect();
            trace!(depth = frames.len(), "walked frame-pointer chain");
            return Ok(frames);
        };

        let bias = load_bias(debug.relocatable(), &self.mappings()?, &self.executable)?;
        let at_entry = debug.starts_function(regs.rip.wrapping_sub(bias))?;
        let memory = |addr: Address, len: usize| self.read_memory(addr, len).ok();
        let frames = self
            .walk_stack(&regs, at_entry)
            .iter()
            .map(|raw| debug.frame(raw, bias, &memory))
            .collect::<StasisResult<Vec<_>>>()?;

        trace!(depth = frames.len(), at_entry, bias, "described frame-pointer chain");
        Ok(frames)
    }

    fn resume(&mut self) -> StasisResult<()>
    {
        request(libc::PTRACE_CONT, self.pid, 0, 0, "PTRACE_CONT")?;
        Ok(())
    }
}

impl Drop for PtraceInferior
{
    fn drop(&mut self)
    {
        if self.exited {
            return;
        }
        unsafe {
            if self.launched {
                let _ = libc::kill(self.pid, libc::SIGKILL);
                let mut status = 0;
                let _ = libc::waitpid(self.pid, &mut status, 0);
            } else {
                let _ = libc::ptrace(
                    libc::PTRACE_DETACH,
                    self.pid,
                    ptr::null_mut::<c_void>(),
                    ptr::null_mut::<c_void>(),
                );
            }
        }
    }
}

fn ptrace_error(operation: &'static str) -> StasisError
{
    let err = io::Error::last_os_error();
    StasisError::Ptrace {
        operation,
        details: err.to_string(),
    }
}

#[cfg(target_env = "gnu")]
type Request = libc::c_uint;
#[cfg(not(target_env = "gnu"))]
type Request = libc::c_int;

fn request(req: Request, pid: pid_t, addr: usize, data: usize, operation: &'static str) -> StasisResult<libc::c_long>
{
    let result = unsafe { libc::ptrace(req, pid, addr as *mut c_void, data as *mut c_void) };
    if result == -1 {
        return Err(ptrace_error(operation));
    }
    Ok(result)
}

fn wait_for(pid: pid_t) -> StasisResult<WaitStatus>
{
    let mut status: c_int = 0;
    loop {
        let result = unsafe { libc::waitpid(pid, &mut status, 0) };
        if result >= 0 {
            break;
        }
        if io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
            return Err(ptrace_error("waitpid"));
        }
    }

    if libc::WIFSTOPPED(status) {
        Ok(WaitStatus::Stopped(libc::WSTOPSIG(status)))
    } else if libc::WIFEXITED(status) {
        Ok(WaitStatus::Exited(libc::WEXITSTATUS(status)))
    } else {
        Ok(WaitStatus::Signaled(libc::WTERMSIG(status)))
    }
}

fn caller_frame(pc: u64, sp: u64, fp: u64) -> RawFrame
{
    RawFrame {
        pc,
        registers: FrameRegisters::caller(pc, sp, fp),
        return_address: true,
    }
}

fn load_debug_info(executable: &Path) -> Option<DebugInfo>
{
    match DebugInfo::load(executable) {
        Ok(Some(info)) => Some(info),
        Ok(None) => {
            warn!(executable = %executable.display(), "no DWARF debug info; frames carry no variable scopes");
            None
        }
        Err(err) => {
            warn!(executable = %executable.display(), error = %err, "cannot load debug info");
            None
        }
    }
}

fn open_mem(pid: pid_t) -> StasisResult<File>
{
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(format!("/proc/{pid}/mem"))
        .map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => StasisError::ProcessNotFound(pid as u32),
            _ => StasisError::Io(err),
        })
}
