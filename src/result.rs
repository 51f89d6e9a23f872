use simple_error::SimpleError;
use std::result;

pub type Result<T> = result::Result<T, SimpleError>;

/// For ptrace requests that cannot fail once the tracee is in the expected
/// stop. A failure here aborts the whole attach sequence.
#[macro_export]
macro_rules! try_ptrace {
    ($expr: expr, $str: expr) => (match $expr {
        Ok(val) => val,
        Err(err) => {
            log::error!("ptrace invariant broken: {}: {}", $str, err);
            simple_error::bail!("{}: {}", $str, err);
        },
    });
    ($expr: expr, $fmt:expr, $($arg:tt)+) => (match $expr {
        Ok(val) => val,
        Err(err) => {
            let msg = format!($fmt, $($arg)+);
            log::error!("ptrace invariant broken: {}: {}", msg, err);
            simple_error::bail!("{}: {}", msg, err);
        },
    });
}
