use log::{debug, error, info};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::thread::sleep;
use std::time::Duration;

use crate::clock::{elapsed_since, nanotime, seconds};
use crate::tracer::proc::{parse_tracer_pid, status_path};
use crate::tracer::ptrace::Tracee;

const POLL_INTERVAL: Duration = Duration::from_micros(10);

/// Poll `tracer_pid` until it reports a tracer or `timeout_ns` passed.
/// Calls `resume` exactly once if no tracer showed up. Returns the pid of the
/// tracer that attached.
pub fn wait_for_debugger<S, R>(mut tracer_pid: S, timeout_ns: u64, resume: R) -> Option<i32>
where
    S: FnMut() -> Option<i32>,
    R: FnOnce(),
{
    let start = nanotime();
    loop {
        sleep(POLL_INTERVAL);

        let tracer = match tracer_pid() {
            Some(pid) => pid,
            // the process is gone or has no status
            None => break,
        };
        if tracer != 0 {
            info!(
                "Debugger PID {} attached after {} seconds",
                tracer,
                elapsed_since(start) as f64 / 1_000_000_000.0
            );
            return Some(tracer);
        }
        if elapsed_since(start) >= timeout_ns {
            break;
        }
    }

    info!("Timed out waiting for debugger, resuming");
    resume();
    None
}

/// Let the traced child `pid` run again.
///
/// With a non-zero `delay_secs` a stopped child is detached but kept
/// suspended until a debugger attaches to it or the delay passes.
pub fn resume_process(pid: Pid, delay_secs: u32) {
    if pid.as_raw() == 0 {
        return;
    }
    let tracee = Tracee::new(pid);

    if delay_secs > 0 {
        if tracee.ip().is_some() {
            if let Err(e) = tracee.detach_stopped() {
                error!("{}", e);
            }
            let path = status_path(Some(pid));
            wait_for_debugger(
                || {
                    fs::read_to_string(&path)
                        .ok()
                        .and_then(|s| parse_tracer_pid(&s))
                },
                seconds(u64::from(delay_secs)),
                || {
                    if let Err(e) = kill(pid, Signal::SIGCONT) {
                        error!("cannot send SIGCONT to {}: {}", pid, e);
                    }
                },
            );
            return;
        }
        error!("Can't delay for debugger without ptrace, check ptrace_scope value");
    }

    // we might not be tracing the process at all
    if let Err(e) = tracee.detach() {
        debug!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::millis;
    use std::cell::Cell;
    use std::io::Write;
    use std::thread;

    fn write_status(path: &std::path::Path, tracer: i32) {
        let mut f = fs::File::create(path).expect("cannot create status file");
        write!(f, "Name:\tchild\nState:\tT (stopped)\nTracerPid:\t{}\n", tracer)
            .expect("cannot write status file");
    }

    fn read_status(path: &std::path::Path) -> Option<i32> {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| parse_tracer_pid(&s))
    }

    #[test]
    fn test_debugger_attaches() {
        let dir = tempfile::tempdir().expect("cannot create tempdir");
        let path = dir.path().join("status");
        write_status(&path, 0);

        let writer_path = path.clone();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let tmp = writer_path.with_extension("tmp");
            write_status(&tmp, 555);
            fs::rename(&tmp, &writer_path).expect("cannot replace status");
        });

        let resumed = Cell::new(0);
        let tracer = wait_for_debugger(
            || read_status(&path),
            seconds(5),
            || resumed.set(resumed.get() + 1),
        );
        writer.join().expect("writer failed");

        assert_eq!(tracer, Some(555));
        assert_eq!(resumed.get(), 0);
    }

    #[test]
    fn test_debugger_timeout() {
        let dir = tempfile::tempdir().expect("cannot create tempdir");
        let path = dir.path().join("status");
        write_status(&path, 0);

        let resumed = Cell::new(0);
        let start = nanotime();
        let tracer = wait_for_debugger(
            || read_status(&path),
            millis(30),
            || resumed.set(resumed.get() + 1),
        );

        assert_eq!(tracer, None);
        assert_eq!(resumed.get(), 1);
        assert!(elapsed_since(start) >= millis(30));
    }

    #[test]
    fn test_status_vanishes() {
        let resumed = Cell::new(0);
        let tracer = wait_for_debugger(|| None, seconds(5), || resumed.set(resumed.get() + 1));
        assert_eq!(tracer, None);
        assert_eq!(resumed.get(), 1);
    }

    #[test]
    fn test_resume_untraced_process() {
        // must not fail or block for a process we don't trace
        let child = std::process::Command::new("sleep")
            .arg("0")
            .spawn()
            .expect("cannot spawn sleep");
        let pid = Pid::from_raw(child.id() as i32);
        resume_process(pid, 0);
        resume_process(pid, 1);
        resume_process(Pid::from_raw(0), 1);
        let mut child = child;
        assert!(child.wait().expect("wait failed").success());
    }
}
