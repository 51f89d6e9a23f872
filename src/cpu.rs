pub use libc::user_regs_struct as Regs;

/// Per-architecture details of the software breakpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arch {
    /// Trap instruction, in the low bytes of a little-endian word.
    pub trap: u64,
    /// Width of `trap` in bytes.
    pub trap_len: usize,
    /// How far the instruction pointer has moved past the trap once it fired.
    pub ip_rollback: u64,
}

impl Arch {
    /// Replace the low `trap_len` bytes of `word` with the trap instruction.
    pub fn patch(&self, word: u64) -> u64 {
        let keep = if self.trap_len >= 8 {
            0
        } else {
            u64::MAX << (self.trap_len * 8)
        };
        (word & keep) | self.trap
    }
}

// int3
#[cfg(target_arch = "x86_64")]
pub const ARCH: Arch = Arch {
    trap: 0xcc,
    trap_len: 1,
    ip_rollback: 1,
};

// brk #0, pc still points at the trap when it is reported
#[cfg(target_arch = "aarch64")]
pub const ARCH: Arch = Arch {
    trap: 0xd420_0000,
    trap_len: 4,
    ip_rollback: 0,
};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("only x86_64 and aarch64 are supported");

#[cfg(target_arch = "x86_64")]
pub fn get_ip(regs: &Regs) -> u64 {
    regs.rip
}

#[cfg(target_arch = "x86_64")]
pub fn set_ip(regs: &mut Regs, ip: u64) {
    regs.rip = ip;
}

#[cfg(target_arch = "aarch64")]
pub fn get_ip(regs: &Regs) -> u64 {
    regs.pc
}

#[cfg(target_arch = "aarch64")]
pub fn set_ip(regs: &mut Regs, ip: u64) {
    regs.pc = ip;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_keeps_high_bytes() {
        let x86 = Arch {
            trap: 0xcc,
            trap_len: 1,
            ip_rollback: 1,
        };
        assert_eq!(x86.patch(0x1122_3344_5566_7788), 0x1122_3344_5566_77cc);

        let arm = Arch {
            trap: 0xd420_0000,
            trap_len: 4,
            ip_rollback: 0,
        };
        assert_eq!(arm.patch(0x1122_3344_5566_7788), 0x1122_3344_d420_0000);
    }

    #[test]
    fn test_ip_roundtrip() {
        let mut regs: Regs = unsafe { std::mem::zeroed() };
        set_ip(&mut regs, 0x4010);
        assert_eq!(get_ip(&regs), 0x4010);
    }
}
