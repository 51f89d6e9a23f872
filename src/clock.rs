use log::error;
use nix::time::{clock_gettime, ClockId};

fn read_clock() -> Option<u64> {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => Some(ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64),
        Err(e) => {
            error!("cannot read monotonic clock: {}", e);
            None
        }
    }
}

/// Monotonic timestamp in nanoseconds. Returns 0 if the clock is unavailable.
pub fn nanotime() -> u64 {
    read_clock().unwrap_or(0)
}

/// Time passed between `start` and `now`. A failed reading on either side
/// counts as forever, so timeouts expire instead of polling endlessly.
fn elapsed_between(start: u64, now: Option<u64>) -> u64 {
    match now {
        Some(now) if start != 0 => now.saturating_sub(start),
        _ => u64::MAX,
    }
}

pub fn elapsed_since(start: u64) -> u64 {
    elapsed_between(start, read_clock())
}

pub const fn millis(ms: u64) -> u64 {
    ms * 1_000_000
}

pub const fn seconds(s: u64) -> u64 {
    s * 1_000_000_000
}

#[test]
fn test_nanotime_monotonic() {
    let a = nanotime();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = nanotime();
    assert!(b >= a + millis(1));
}

#[test]
fn test_clock_failure_expires() {
    assert_eq!(elapsed_between(millis(5), Some(millis(7))), millis(2));
    assert_eq!(elapsed_between(millis(5), None), u64::MAX);
    assert_eq!(elapsed_between(0, Some(millis(7))), u64::MAX);
    assert!(elapsed_since(nanotime()) < seconds(10));
}
