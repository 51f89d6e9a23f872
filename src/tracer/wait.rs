use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use std::thread::sleep;
use std::time::Duration;

use crate::clock::{elapsed_since, millis, nanotime};
use crate::tracer::ptrace::Tracee;

const POLL_INTERVAL: Duration = Duration::from_micros(10);

/// The two independent ways of telling whether a tracee has stopped.
pub trait StopProbe {
    /// Non-blocking waitpid() on the tracee. `None` if no state change is
    /// pending.
    fn try_wait(&self) -> Option<WaitStatus>;

    /// Instruction pointer of the tracee. Only readable while it is stopped.
    fn ip(&self) -> Option<u64>;
}

impl StopProbe for Tracee {
    fn try_wait(&self) -> Option<WaitStatus> {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => None,
            Ok(status) => Some(status),
        }
    }

    fn ip(&self) -> Option<u64> {
        Tracee::ip(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaitResult {
    pub stopped: bool,
    /// `None` if the stop was only detected through the instruction pointer
    /// and the real status could not be reconciled.
    pub status: Option<WaitStatus>,
}

impl WaitResult {
    pub fn exited(&self) -> bool {
        matches!(
            self.status,
            Some(WaitStatus::Exited(..)) | Some(WaitStatus::Signaled(..))
        )
    }
}

pub fn is_stop(status: &WaitStatus) -> bool {
    matches!(
        status,
        WaitStatus::Stopped(..) | WaitStatus::PtraceEvent(..) | WaitStatus::PtraceSyscall(..)
    )
}

/// Poll until the tracee stops, changes state or `timeout_ms` elapses.
///
/// If we live in a process that does `waitpid(-1)` itself, the status
/// change of our child may already be gone. Being able to read the
/// instruction pointer then is the only sign that the tracee is stopped.
pub fn wait_traced<P: StopProbe>(tracee: &P, timeout_ms: u64) -> WaitResult {
    let start = nanotime();
    let timeout = millis(timeout_ms);

    loop {
        if let Some(status) = tracee.try_wait() {
            return WaitResult {
                stopped: is_stop(&status),
                status: Some(status),
            };
        }

        if tracee.ip().is_some() {
            // we may have raced with the stop between the two checks
            let status = tracee.try_wait();
            return WaitResult {
                stopped: true,
                status,
            };
        }

        sleep(POLL_INTERVAL);

        if elapsed_since(start) > timeout {
            return WaitResult {
                stopped: false,
                status: None,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;
    use std::cell::Cell;

    struct FakeTracee {
        polls: Cell<usize>,
        wait_after: Option<usize>,
        status: WaitStatus,
        ip_after: Option<usize>,
        reconcile: bool,
    }

    impl FakeTracee {
        fn new() -> FakeTracee {
            FakeTracee {
                polls: Cell::new(0),
                wait_after: None,
                status: WaitStatus::Stopped(Pid::from_raw(42), Signal::SIGSTOP),
                ip_after: None,
                reconcile: false,
            }
        }
    }

    impl StopProbe for FakeTracee {
        fn try_wait(&self) -> Option<WaitStatus> {
            let n = self.polls.get();
            self.polls.set(n + 1);
            match self.wait_after {
                Some(after) if n >= after => Some(self.status),
                _ if self.reconcile && self.ip_after.map_or(false, |a| n > a) => {
                    Some(self.status)
                }
                _ => None,
            }
        }

        fn ip(&self) -> Option<u64> {
            match self.ip_after {
                Some(after) if self.polls.get() > after => Some(0x1000),
                _ => None,
            }
        }
    }

    #[test]
    fn test_never_stops() {
        let tracee = FakeTracee::new();
        let start = nanotime();
        let res = wait_traced(&tracee, 20);
        assert!(!res.stopped);
        assert_eq!(res.status, None);
        assert!(elapsed_since(start) >= millis(20));
    }

    #[test]
    fn test_stop_reported_by_wait() {
        let mut tracee = FakeTracee::new();
        tracee.wait_after = Some(3);
        let res = wait_traced(&tracee, 1000);
        assert!(res.stopped);
        assert_eq!(
            res.status,
            Some(WaitStatus::Stopped(Pid::from_raw(42), Signal::SIGSTOP))
        );
    }

    #[test]
    fn test_exit_is_not_a_stop() {
        let mut tracee = FakeTracee::new();
        tracee.wait_after = Some(0);
        tracee.status = WaitStatus::Exited(Pid::from_raw(42), 1);
        let res = wait_traced(&tracee, 1000);
        assert!(!res.stopped);
        assert!(res.exited());
    }

    #[test]
    fn test_stop_swallowed_by_someone_else() {
        let mut tracee = FakeTracee::new();
        tracee.ip_after = Some(2);
        let res = wait_traced(&tracee, 1000);
        assert!(res.stopped);
        assert_eq!(res.status, None);
    }

    #[test]
    fn test_stop_reconciled_after_ip() {
        let mut tracee = FakeTracee::new();
        tracee.ip_after = Some(2);
        tracee.reconcile = true;
        let res = wait_traced(&tracee, 1000);
        assert!(res.stopped);
        assert!(res.status.is_some());
    }
}
