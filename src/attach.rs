//! Stop a freshly forked child at the entry point of the program it execs.
//!
//! The child calls [`stop_at_main_in_child`] between fork() and exec(), the
//! parent calls [`stop_child_at_main`]. On success the child is left in a
//! ptrace-stop on its first instruction with its code unmodified.

use log::{error, info, warn};
use nix::sys::signal::{raise, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use simple_error::bail;

use crate::config;
use crate::cpu::{self, Arch, Regs};
use crate::entry;
use crate::result::Result;
use crate::scope::ptrace_scope_ok;
use crate::tracer::breakpoint::{Breakpoint, WordMemory};
use crate::tracer::ptrace::{self, Tracee};
use crate::tracer::wait::{wait_traced, StopProbe};
use crate::try_ptrace;

/// The self-stop comes right after fork(), fail fast if it does not.
const INITIAL_STOP_TIMEOUT_MS: u64 = 100;
/// We don't control when the child calls exec() after fork().
const EXEC_STOP_TIMEOUT_MS: u64 = 250;
/// Time to reach the entry point depends on the dynamic loader and the program.
const BREAKPOINT_TIMEOUT_MS: u64 = 2000;

/// Everything the attach sequence needs from the traced child.
pub trait Inferior: StopProbe + WordMemory {
    fn pid(&self) -> Pid;
    fn trace_exec(&self) -> Result<()>;
    fn cont(&self) -> Result<()>;
    fn getregs(&self) -> Result<Regs>;
    fn setregs(&self, regs: &Regs) -> Result<()>;
    fn resolve_entry(&self) -> Result<u64>;
}

impl Inferior for Tracee {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn trace_exec(&self) -> Result<()> {
        Tracee::trace_exec(self)
    }

    fn cont(&self) -> Result<()> {
        Tracee::cont(self, None)
    }

    fn getregs(&self) -> Result<Regs> {
        Tracee::getregs(self)
    }

    fn setregs(&self, regs: &Regs) -> Result<()> {
        Tracee::setregs(self, regs)
    }

    fn resolve_entry(&self) -> Result<u64> {
        entry::resolve_entry(self.pid)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachState {
    WaitingInitialStop,
    ArmedForExecStop,
    WaitingExecStop,
    EntryResolved,
    BreakpointArmed,
    WaitingBreakpointHit,
    Restored,
}

pub struct Attach<'a, I: Inferior> {
    inferior: &'a I,
    arch: Arch,
    pub state: AttachState,
}

impl<'a, I: Inferior> Attach<'a, I> {
    pub fn new(inferior: &'a I, arch: Arch) -> Attach<'a, I> {
        Attach {
            inferior,
            arch,
            state: AttachState::WaitingInitialStop,
        }
    }

    fn enter(&mut self, state: AttachState) {
        self.state = state;
        if config::ptrace_logging() {
            info!("Child PID {}: {:?}", self.inferior.pid(), state);
        }
    }

    /// Drive the child from its self-stop to a stop at the entry point.
    /// Returns the entry address.
    pub fn run(&mut self) -> Result<u64> {
        let pid = self.inferior.pid();

        self.enter(AttachState::WaitingInitialStop);
        let res = wait_traced(self.inferior, INITIAL_STOP_TIMEOUT_MS);
        if !res.stopped {
            bail!("didn't get initial stop from child PID {}", pid);
        }
        match res.status {
            None | Some(WaitStatus::Stopped(_, Signal::SIGSTOP)) => {}
            Some(status) => bail!(
                "initial stop of child PID {} was {:?}, expected {}",
                pid,
                status,
                Signal::SIGSTOP
            ),
        }

        self.enter(AttachState::ArmedForExecStop);
        try_ptrace!(self.inferior.trace_exec(), "cannot trace exec of {}", pid);
        try_ptrace!(self.inferior.cont(), "cannot continue {} to exec", pid);

        self.enter(AttachState::WaitingExecStop);
        let res = wait_traced(self.inferior, EXEC_STOP_TIMEOUT_MS);
        if !res.stopped {
            if res.exited() {
                bail!(
                    "child PID {} exited after continue, status {:?}",
                    pid,
                    res.status
                );
            }
            bail!("didn't get to execve in child PID {}", pid);
        }
        if let Some(status) = res.status {
            if !matches!(status, WaitStatus::PtraceEvent(_, _, libc::PTRACE_EVENT_EXEC)) {
                warn!(
                    "child PID {} stopped with {:?} instead of an exec event",
                    pid, status
                );
            }
        }

        let entry = self.inferior.resolve_entry()?;
        self.enter(AttachState::EntryResolved);

        let bp = try_ptrace!(
            Breakpoint::inject(self.inferior, entry, &self.arch),
            "cannot set breakpoint in {}",
            pid
        );
        self.enter(AttachState::BreakpointArmed);

        if let Err(e) = self.inferior.cont() {
            self.abandon(bp);
            bail!("cannot continue {} to entry: {}", pid, e);
        }

        self.enter(AttachState::WaitingBreakpointHit);
        let res = wait_traced(self.inferior, BREAKPOINT_TIMEOUT_MS);
        if !res.stopped {
            self.abandon(bp);
            bail!("didn't hit breakpoint in PID {} ({:?})", pid, res.status);
        }
        if config::ptrace_logging() {
            info!("Process {} hit entry point", pid);
        }

        let mut regs = match self.inferior.getregs() {
            Ok(regs) => regs,
            Err(e) => {
                self.abandon(bp);
                error!("ptrace invariant broken: cannot get registers of {}", pid);
                bail!("cannot get registers of {}: {}", pid, e);
            }
        };
        let ip = cpu::get_ip(&regs);
        if config::ptrace_logging() {
            info!(
                "Process {} instruction pointer is at {:#x}, for entry point {:#x}",
                pid, ip, entry
            );
        }
        if ip != entry.wrapping_add(self.arch.ip_rollback) {
            warn!(
                "process {} stopped at {:#x}, expected the breakpoint at {:#x}",
                pid, ip, entry
            );
        }

        // step back over the trap
        cpu::set_ip(&mut regs, ip.wrapping_sub(self.arch.ip_rollback));
        if let Err(e) = self.inferior.setregs(&regs) {
            self.abandon(bp);
            error!("ptrace invariant broken: cannot set registers of {}", pid);
            bail!("cannot set registers of {}: {}", pid, e);
        }
        try_ptrace!(
            bp.restore(self.inferior),
            "cannot remove breakpoint from {}",
            pid
        );
        self.enter(AttachState::Restored);

        if config::ptrace_logging() {
            info!(
                "Process {} instruction pointer adjusted and breakpoint removed.",
                pid
            );
        }
        Ok(entry)
    }

    /// Best effort: put the original code back after a failure with the
    /// breakpoint still in place. Only succeeds if the child is stopped.
    fn abandon(&self, bp: Breakpoint) {
        let addr = bp.addr;
        if let Err(e) = bp.restore(self.inferior) {
            error!(
                "child PID {} is left with a breakpoint at {:#x}: {}",
                self.inferior.pid(),
                addr,
                e
            );
        }
    }
}

/// Stop the child `pid` at the entry point of its program. The child must
/// have called [`stop_at_main_in_child`]. Returns false if tracing is not
/// permitted or anything went wrong; the child is then left as it is.
pub fn stop_child_at_main(pid: Pid) -> bool {
    if !ptrace_scope_ok() {
        return false;
    }
    if config::ptrace_logging() {
        info!("Stopping child PID {} at main", pid);
    }

    let tracee = Tracee::new(pid);
    let mut attach = Attach::new(&tracee, cpu::ARCH);
    match attach.run() {
        Ok(_) => true,
        Err(e) => {
            error!("{:?}: {}", attach.state, e);
            false
        }
    }
}

/// To be called in the child after fork() and before exec(): become
/// traceable by our parent and stop until it has caught up.
pub fn stop_at_main_in_child() {
    if !ptrace_scope_ok() {
        return;
    }
    if config::ptrace_logging() {
        info!("Stopping in main at child for ptracing");
    }

    if let Err(e) = ptrace::traceme() {
        error!("{}", e);
        return;
    }
    if config::ptrace_logging() {
        info!("Done PTRACE_TRACEME, raising SIGSTOP");
    }

    if let Err(e) = raise(Signal::SIGSTOP) {
        error!("cannot raise SIGSTOP: {}", e);
        return;
    }
    if config::ptrace_logging() {
        info!("Resumed after SIGSTOP");
    }
}
