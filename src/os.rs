use nix::sys::resource::{getrusage, UsageWho};
use std::env;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;

/// Value of environment variable `name`, empty if unset or not unicode.
pub fn env_variable(name: &str) -> String {
    env::var(name).unwrap_or_default()
}

/// Environment of this process as `KEY=VALUE` strings, ready to be passed
/// to `execve`.
pub fn current_environment() -> Vec<CString> {
    env::vars_os()
        .filter_map(|(key, value)| {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            CString::new(entry).ok()
        })
        .collect()
}

/// Peak resident set size of this process in bytes, 0 if unknown.
pub fn memory_usage() -> u64 {
    match getrusage(UsageWho::RUSAGE_SELF) {
        // linux reports kilobytes
        Ok(usage) => usage.max_rss() as u64 * 1024,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_variable() {
        env::set_var("MAINSTOP_TEST_VAR", "42");
        assert_eq!(env_variable("MAINSTOP_TEST_VAR"), "42");
        assert_eq!(env_variable("MAINSTOP_TEST_UNSET_VAR"), "");
    }

    #[test]
    fn test_current_environment() {
        env::set_var("MAINSTOP_TEST_ENV", "a=b");
        let expected = CString::new("MAINSTOP_TEST_ENV=a=b").expect("nul in literal");
        assert!(current_environment().contains(&expected));
    }

    #[test]
    fn test_memory_usage() {
        assert!(memory_usage() > 0);
    }
}
