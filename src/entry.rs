//! Locate the entry point of a freshly exec'd process in its address space.

use log::info;
use nix::unistd::Pid;
use simple_error::{bail, SimpleError};
use std::path::Path;

use crate::config;
use crate::elf::{self, EntryInfo};
use crate::result::Result;
use crate::tracer::proc::{self, Mapping};

/// Runtime address of the entry point, given where the first executable
/// segment of the binary has been mapped.
///
/// The mapping covers the file starting at `mapping.offset`, so the entry's
/// file offset has to be rebased onto that.
pub fn entry_address(mapping: &Mapping, info: &EntryInfo) -> Option<u64> {
    let file_offset = info.entry_file_offset()?;
    (mapping.start as u64)
        .checked_add(file_offset)?
        .checked_sub(mapping.offset)
}

pub fn resolve_entry(pid: Pid) -> Result<u64> {
    let maps = proc::maps(pid)?;
    let mapping = match proc::first_executable(&maps) {
        Some(m) => m,
        None => bail!("couldn't find executable mapping in maps of {}", pid),
    };
    if config::ptrace_logging() {
        info!(
            "Child PID {} has exepath {} basePointer {:#x} and sectionOffset {:#x}",
            pid, mapping.pathname, mapping.start, mapping.offset
        );
    }

    let info = elf::read_entry_info_from(Path::new(&mapping.pathname))?;
    let entry = entry_address(mapping, &info).ok_or_else(|| {
        SimpleError::new(format!(
            "no section of {} contains entry {:#x}",
            mapping.pathname, info.entry
        ))
    })?;

    if config::ptrace_logging() {
        info!(
            "child process {} executable {} has entry {:#x} at {:#x} + ({:#x} - {:#x})",
            pid,
            mapping.pathname,
            entry,
            mapping.start,
            info.entry_file_offset().unwrap_or_default(),
            mapping.offset
        );
    }
    Ok(entry)
}
