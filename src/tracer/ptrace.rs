use libc::{c_long, c_void};
use nix::errno::Errno;
use nix::sys::ptrace::{self, AddressType, Options};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use simple_error::try_with;
use std::mem;

use crate::cpu::{self, Regs};
use crate::result::Result;

// elf note type of the general purpose register set
const NT_PRSTATUS: usize = 1;

/// A process that is, or is about to be, traced by us.
/// Does not detach on drop: the caller decides when the tracee is resumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tracee {
    pub pid: Pid,
}

/// Get user registers, as with `ptrace(PTRACE_GETREGSET, NT_PRSTATUS, ...)`
fn getregs(pid: Pid) -> nix::Result<Regs> {
    let mut regs = mem::MaybeUninit::<Regs>::uninit();
    let mut iov = libc::iovec {
        iov_base: regs.as_mut_ptr() as *mut c_void,
        iov_len: mem::size_of::<Regs>(),
    };
    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            libc::pid_t::from(pid),
            NT_PRSTATUS as *mut c_void,
            &mut iov as *mut _ as *mut c_void,
        )
    };
    Errno::result(res)?;
    if iov.iov_len != mem::size_of::<Regs>() {
        return Err(Errno::EIO);
    }
    Ok(unsafe { regs.assume_init() })
}

/// Set user registers, as with `ptrace(PTRACE_SETREGSET, NT_PRSTATUS, ...)`
fn setregs(pid: Pid, regs: &Regs) -> nix::Result<()> {
    let mut iov = libc::iovec {
        iov_base: regs as *const _ as *mut c_void,
        iov_len: mem::size_of::<Regs>(),
    };
    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_SETREGSET,
            libc::pid_t::from(pid),
            NT_PRSTATUS as *mut c_void,
            &mut iov as *mut _ as *mut c_void,
        )
    };
    Errno::result(res).map(drop)
}

impl Tracee {
    pub fn new(pid: Pid) -> Tracee {
        Tracee { pid }
    }

    pub fn getregs(&self) -> Result<Regs> {
        Ok(try_with!(
            getregs(self.pid),
            "cannot get registers with ptrace"
        ))
    }

    pub fn setregs(&self, regs: &Regs) -> Result<()> {
        try_with!(setregs(self.pid, regs), "cannot set registers with ptrace");
        Ok(())
    }

    /// Instruction pointer, only readable while the tracee is in a ptrace-stop.
    pub fn ip(&self) -> Option<u64> {
        getregs(self.pid).ok().map(|regs| cpu::get_ip(&regs))
    }

    /// Report the next execve() of the tracee as a ptrace event stop.
    pub fn trace_exec(&self) -> Result<()> {
        try_with!(
            ptrace::setoptions(self.pid, Options::PTRACE_O_TRACEEXEC),
            "cannot set ptrace options"
        );
        Ok(())
    }

    pub fn cont(&self, sig: Option<Signal>) -> Result<()> {
        try_with!(
            ptrace::cont(self.pid, sig),
            "cannot continue tracee with ptrace"
        );
        Ok(())
    }

    /// Detach and let the tracee run.
    pub fn detach(&self) -> Result<()> {
        try_with!(
            ptrace::detach(self.pid, None),
            "cannot detach from tracee"
        );
        Ok(())
    }

    /// Detach, but deliver SIGSTOP so the process stays suspended until
    /// another tracer attaches or SIGCONT arrives.
    pub fn detach_stopped(&self) -> Result<()> {
        try_with!(
            ptrace::detach(self.pid, Some(Signal::SIGSTOP)),
            "cannot detach from tracee"
        );
        Ok(())
    }

    pub fn read(&self, addr: AddressType) -> Result<c_long> {
        Ok(try_with!(
            ptrace::read(self.pid, addr),
            "cannot read with ptrace"
        ))
    }

    /// # Safety
    ///
    /// The `data` argument is passed directly to `ptrace(2)`. Read that man page for guidance.
    pub unsafe fn write(&self, addr: AddressType, data: *mut c_void) -> Result<()> {
        try_with!(
            ptrace::write(self.pid, addr, data),
            "cannot write with ptrace"
        );
        Ok(())
    }
}

/// Called in a freshly forked child: let the parent trace us.
pub fn traceme() -> Result<()> {
    try_with!(ptrace::traceme(), "PTRACE_TRACEME failed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::getpid;

    #[test]
    fn test_untraced_process_has_no_ip() {
        // we are not a tracee of ourselves
        let me = Tracee::new(getpid());
        assert_eq!(me.ip(), None);
        assert!(me.getregs().is_err());
    }
}
