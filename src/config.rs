//! Process-wide settings, read at call time.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};

/// Use ptrace to stop child processes at startup so that instrumentation can
/// connect as early as possible.
pub static PTRACE_CHILD_PROCESSES: AtomicBool = AtomicBool::new(true);

/// Verbose diagnostics for every ptrace step.
pub static PTRACE_LOGGING: AtomicBool = AtomicBool::new(false);

/// Set when running as the replay tool. Only affects whether a restrictive
/// ptrace_scope is reported.
pub static REPLAY_APP: AtomicBool = AtomicBool::new(false);

pub fn ptrace_child_processes() -> bool {
    PTRACE_CHILD_PROCESSES.load(Ordering::Acquire)
}

pub fn ptrace_logging() -> bool {
    PTRACE_LOGGING.load(Ordering::Acquire)
}

pub fn replay_app() -> bool {
    REPLAY_APP.load(Ordering::Acquire)
}

pub const FIRST_IDENT_PORT: u16 = 38920;
pub const LAST_IDENT_PORT: u16 = FIRST_IDENT_PORT + 7;

/// Ports a tracee may listen on for target control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl PortRange {
    pub fn contains(&self, port: u32) -> bool {
        u32::from(self.first) <= port && port <= u32::from(self.last)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        PortRange {
            first: FIRST_IDENT_PORT,
            last: LAST_IDENT_PORT,
        }
    }
}

impl From<RangeInclusive<u16>> for PortRange {
    fn from(r: RangeInclusive<u16>) -> Self {
        PortRange {
            first: *r.start(),
            last: *r.end(),
        }
    }
}
