use libc::c_void;
use log::info;
use simple_error::try_with;

use crate::config;
use crate::cpu::Arch;
use crate::result::Result;
use crate::tracer::ptrace::Tracee;

/// Word sized access to the text of a stopped tracee.
pub trait WordMemory {
    fn read_word(&self, addr: u64) -> Result<u64>;
    fn write_word(&self, addr: u64, word: u64) -> Result<()>;
}

impl WordMemory for Tracee {
    fn read_word(&self, addr: u64) -> Result<u64> {
        Ok(self.read(addr as *mut c_void)? as u64)
    }

    fn write_word(&self, addr: u64, word: u64) -> Result<()> {
        unsafe { self.write(addr as *mut c_void, word as *mut c_void) }
    }
}

/// A trap written over the first instruction at `addr`. Until `restore()`
/// succeeds the tracee's code is corrupted at that address.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "the original instruction has to be restored"]
pub struct Breakpoint {
    pub addr: u64,
    pub orig_word: u64,
    pub patched_word: u64,
}

impl Breakpoint {
    pub fn inject<M: WordMemory>(mem: &M, addr: u64, arch: &Arch) -> Result<Breakpoint> {
        let orig_word = try_with!(
            mem.read_word(addr),
            "cannot read word at {:#x}",
            addr
        );
        if config::ptrace_logging() {
            info!("Read word {:#x} from {:#x}", orig_word, addr);
        }

        let patched_word = arch.patch(orig_word);
        try_with!(
            mem.write_word(addr, patched_word),
            "cannot write breakpoint to {:#x}",
            addr
        );
        if config::ptrace_logging() {
            info!("Changed word at {:#x} to {:#x}", addr, patched_word);
        }

        Ok(Breakpoint {
            addr,
            orig_word,
            patched_word,
        })
    }

    pub fn restore<M: WordMemory>(self, mem: &M) -> Result<()> {
        try_with!(
            mem.write_word(self.addr, self.orig_word),
            "cannot restore original word at {:#x}",
            self.addr
        );
        Ok(())
    }
}
