use log::warn;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use crate::tracer::proc::{parse_tracer_pid, status_path};

/// Whether a debugger traces us. Queried often, so it is computed once at
/// startup instead of parsing procfs every time. A debugger attaching later
/// is not noticed.
pub struct DebuggerPresence {
    once: Once,
    present: AtomicBool,
}

impl DebuggerPresence {
    pub const fn new() -> DebuggerPresence {
        DebuggerPresence {
            once: Once::new(),
            present: AtomicBool::new(false),
        }
    }

    /// Compute the flag from the contents of our status file. Only the
    /// first call has an effect.
    pub fn cache<F: FnOnce() -> Option<String>>(&self, read_status: F) {
        self.once.call_once(|| match read_status() {
            Some(status) => {
                let tracer = parse_tracer_pid(&status).unwrap_or(0);
                self.present.store(tracer != 0, Ordering::Release);
            }
            None => warn!("Couldn't open {}", status_path(None).display()),
        });
    }

    pub fn get(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }
}

impl Default for DebuggerPresence {
    fn default() -> Self {
        DebuggerPresence::new()
    }
}

static DEBUGGER_PRESENT: DebuggerPresence = DebuggerPresence::new();

/// Call once at startup, before [`debugger_present`] is used.
pub fn cache_debugger_present() {
    DEBUGGER_PRESENT.cache(|| fs::read_to_string(status_path(None)).ok());
}

pub fn debugger_present() -> bool {
    DEBUGGER_PRESENT.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_once() {
        let presence = DebuggerPresence::new();
        presence.cache(|| Some("Name:\ttest\nTracerPid:\t555\n".to_string()));
        assert!(presence.get());

        // the debugger went away, but we keep the first answer
        presence.cache(|| Some("TracerPid:\t0\n".to_string()));
        assert!(presence.get());
        assert!(presence.get());
    }

    #[test]
    fn test_not_traced() {
        let presence = DebuggerPresence::new();
        presence.cache(|| Some("TracerPid:\t0\n".to_string()));
        assert!(!presence.get());
    }

    #[test]
    fn test_unreadable_status() {
        let presence = DebuggerPresence::default();
        presence.cache(|| None);
        assert!(!presence.get());
    }

    #[test]
    fn test_own_status() {
        cache_debugger_present();
        let first = debugger_present();
        cache_debugger_present();
        assert_eq!(debugger_present(), first);
    }
}
