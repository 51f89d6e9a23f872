use log::warn;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config;

const PTRACE_SCOPE: &str = "/proc/sys/kernel/yama/ptrace_scope";

static WARNED: AtomicBool = AtomicBool::new(false);

/// Parsed value of yama's ptrace_scope. A missing or unparsable file means
/// no restriction.
pub fn parse_ptrace_scope(contents: Option<&str>) -> i32 {
    contents
        .map(str::trim)
        .and_then(|c| c.parse::<i32>().ok())
        .unwrap_or(0)
}

/// Decide whether we may ptrace our children. `warned` latches the one
/// warning we emit per process.
pub fn scope_allows(enabled: bool, ptrace_scope: i32, replay_app: bool, warned: &AtomicBool) -> bool {
    if !enabled {
        return false;
    }
    if ptrace_scope > 1 {
        if replay_app && !warned.swap(true, Ordering::AcqRel) {
            warn!(
                "ptrace_scope value {} means ptrace can't be used to pause child processes while attaching.",
                ptrace_scope
            );
        }
        return false;
    }
    true
}

pub fn ptrace_scope_ok() -> bool {
    if !config::ptrace_child_processes() {
        return false;
    }
    let contents = fs::read_to_string(PTRACE_SCOPE).ok();
    scope_allows(
        true,
        parse_ptrace_scope(contents.as_deref()),
        config::replay_app(),
        &WARNED,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ptrace_scope() {
        assert_eq!(parse_ptrace_scope(None), 0);
        assert_eq!(parse_ptrace_scope(Some("1\n")), 1);
        assert_eq!(parse_ptrace_scope(Some(" 3 ")), 3);
        assert_eq!(parse_ptrace_scope(Some("")), 0);
    }

    #[test]
    fn test_disabled() {
        let warned = AtomicBool::new(false);
        assert!(!scope_allows(false, 0, true, &warned));
        assert!(!warned.load(Ordering::Acquire));
    }

    #[test]
    fn test_restricted() {
        let warned = AtomicBool::new(false);
        assert!(scope_allows(true, 0, false, &warned));
        assert!(scope_allows(true, 1, false, &warned));
        assert!(!scope_allows(true, 2, false, &warned));
        assert!(!warned.load(Ordering::Acquire));

        assert!(!scope_allows(true, 3, true, &warned));
        assert!(warned.load(Ordering::Acquire));
        // still refused once the warning was printed
        assert!(!scope_allows(true, 3, true, &warned));
    }
}
