pub mod breakpoint;
pub mod proc;
pub mod ptrace;
pub mod wait;

pub use self::ptrace::Tracee;
