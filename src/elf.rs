use log::info;
use simple_error::{bail, try_with};
use std::fs;
use std::path::Path;
use xmas_elf::header::Class;
use xmas_elf::ElfFile;

use crate::config;
use crate::result::Result;

/// Size of an ELF64 section header.
const SHDR64_SIZE: u64 = 64;

/// What we need from a binary to find its entry point in memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryInfo {
    pub entry: u64,
    pub sections: Vec<Section>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Section {
    pub addr: u64,
    pub size: u64,
    pub offset: u64,
}

impl Section {
    pub fn contains(&self, vaddr: u64) -> bool {
        self.addr <= vaddr && vaddr - self.addr < self.size
    }
}

pub fn read_entry_info(binary: &[u8]) -> Result<EntryInfo> {
    let elf = match ElfFile::new(binary) {
        Err(e) => bail!("cannot parse elf binary: {}", e),
        Ok(v) => v,
    };
    if elf.header.pt1.class() != Class::SixtyFour {
        bail!("not a 64-bit elf file ({:?})", elf.header.pt1.class());
    }

    let pt2 = &elf.header.pt2;
    let mut info = EntryInfo {
        entry: pt2.entry_point(),
        sections: vec![],
    };
    if pt2.sh_offset() == 0 || pt2.sh_count() == 0 {
        return Ok(info);
    }

    if u64::from(pt2.sh_entry_size()) != SHDR64_SIZE {
        bail!(
            "unexpected section header size {}, expected {}",
            pt2.sh_entry_size(),
            SHDR64_SIZE
        );
    }
    // xmas-elf slices the table without bounds checks
    let table_end = u64::from(pt2.sh_count())
        .checked_mul(SHDR64_SIZE)
        .and_then(|len| len.checked_add(pt2.sh_offset()));
    match table_end {
        Some(end) if end <= binary.len() as u64 => {}
        _ => bail!(
            "section table at {:#x} with {} entries exceeds file size {}",
            pt2.sh_offset(),
            pt2.sh_count(),
            binary.len()
        ),
    }

    info.sections = elf
        .section_iter()
        .map(|s| Section {
            addr: s.address(),
            size: s.size(),
            offset: s.offset(),
        })
        .collect();
    Ok(info)
}

pub fn read_entry_info_from(path: &Path) -> Result<EntryInfo> {
    let binary = try_with!(
        fs::read(path),
        "cannot read {} to parse elf header",
        path.display()
    );
    let info = try_with!(
        read_entry_info(&binary),
        "cannot parse {}",
        path.display()
    );
    if config::ptrace_logging() && !info.sections.is_empty() {
        info!(
            "{} contains {} sections, rebasing to correct section",
            path.display(),
            info.sections.len()
        );
    }
    Ok(info)
}

impl EntryInfo {
    /// File offset of the entry point. Without section headers the file is
    /// assumed to be mapped flat.
    pub fn entry_file_offset(&self) -> Option<u64> {
        if self.sections.is_empty() {
            return Some(self.entry);
        }
        self.sections
            .iter()
            .find(|s| s.contains(self.entry))
            .map(|s| self.entry - s.addr + s.offset)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use libc::{Elf64_Ehdr, Elf64_Shdr};
    use std::mem::size_of;

    unsafe fn any_as_bytes<T: Sized>(p: &T) -> &[u8] {
        std::slice::from_raw_parts((p as *const T) as *const u8, size_of::<T>())
    }

    /// Minimal little-endian ELF64 image: header followed by the given
    /// section headers.
    pub fn fake_elf(entry: u64, sections: &[Section]) -> Vec<u8> {
        let mut ehdr: Elf64_Ehdr = unsafe { std::mem::zeroed() };
        // magic, ELFCLASS64, ELFDATA2LSB, EV_CURRENT
        ehdr.e_ident[..7].copy_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1]);
        ehdr.e_type = 2;
        ehdr.e_version = 1;
        ehdr.e_entry = entry;
        ehdr.e_ehsize = size_of::<Elf64_Ehdr>() as u16;
        if !sections.is_empty() {
            ehdr.e_shoff = size_of::<Elf64_Ehdr>() as u64;
            ehdr.e_shentsize = size_of::<Elf64_Shdr>() as u16;
            ehdr.e_shnum = sections.len() as u16;
        }
        let mut buf = unsafe { any_as_bytes(&ehdr) }.to_vec();
        for s in sections {
            let mut shdr: Elf64_Shdr = unsafe { std::mem::zeroed() };
            shdr.sh_addr = s.addr;
            shdr.sh_size = s.size;
            shdr.sh_offset = s.offset;
            buf.extend_from_slice(unsafe { any_as_bytes(&shdr) });
        }
        buf
    }

    #[test]
    fn test_flat_binary() {
        let info = read_entry_info(&fake_elf(0x401000, &[])).expect("cannot parse");
        assert!(info.sections.is_empty());
        assert_eq!(info.entry_file_offset(), Some(0x401000));
    }

    #[test]
    fn test_entry_in_section() {
        let sections = [
            Section {
                addr: 0,
                size: 0,
                offset: 0,
            },
            Section {
                addr: 0x1000,
                size: 0x100,
                offset: 0x1000,
            },
            Section {
                addr: 0x2040,
                size: 0x500,
                offset: 0x1040,
            },
        ];
        let info = read_entry_info(&fake_elf(0x2100, &sections)).expect("cannot parse");
        assert_eq!(info.entry, 0x2100);
        assert_eq!(info.sections, sections.to_vec());
        assert_eq!(info.entry_file_offset(), Some(0x1100));
    }

    #[test]
    fn test_entry_outside_sections() {
        let info = EntryInfo {
            entry: 0x9000,
            sections: vec![Section {
                addr: 0x1000,
                size: 0x100,
                offset: 0x1000,
            }],
        };
        assert_eq!(info.entry_file_offset(), None);
    }

    #[test]
    fn test_section_end_is_exclusive() {
        let s = Section {
            addr: 0x1000,
            size: 0x100,
            offset: 0,
        };
        assert!(s.contains(0x1000));
        assert!(s.contains(0x10ff));
        assert!(!s.contains(0x1100));
        assert!(!s.contains(0xfff));
    }

    #[test]
    fn test_truncated_section_table() {
        let mut image = fake_elf(
            0x1000,
            &[Section {
                addr: 0x1000,
                size: 0x10,
                offset: 0x1000,
            }],
        );
        image.truncate(image.len() - 8);
        assert!(read_entry_info(&image).is_err());
    }

    #[test]
    fn test_not_elf() {
        assert!(read_entry_info(&vec![0u8; 64]).is_err());
        assert!(read_entry_info(&[0x7f, b'E']).is_err());
    }

    #[test]
    fn test_32bit_rejected() {
        let mut image = fake_elf(0x1000, &[]);
        image[4] = 1;
        assert!(read_entry_info(&image).is_err());
    }

    #[test]
    fn test_own_binary() {
        let exe = std::fs::read_link("/proc/self/exe").expect("no exe link");
        let info = read_entry_info_from(&exe).expect("cannot parse own binary");
        assert!(!info.sections.is_empty());
        assert!(info.entry_file_offset().is_some());
    }
}
