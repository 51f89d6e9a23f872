#![deny(clippy::print_stdout, clippy::print_stderr, clippy::unwrap_used)]

pub mod attach;
pub mod clock;
pub mod config;
pub mod cpu;
pub mod debugger;
pub mod elf;
pub mod entry;
pub mod ident;
pub mod os;
pub mod result;
pub mod resume;
pub mod scope;
pub mod tracer;

pub use attach::{stop_at_main_in_child, stop_child_at_main};
pub use debugger::{cache_debugger_present, debugger_present};
pub use ident::get_ident_port;
pub use resume::resume_process;
