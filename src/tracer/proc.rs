use nix::sys::mman::ProtFlags;
use nix::unistd::Pid;
use simple_error::{bail, try_with};
use std::fs::{read_dir, read_link, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::result::Result;

/// One line of `/proc/<pid>/maps`, reduced to what locating code needs.
#[derive(Clone, Debug, PartialEq)]
pub struct Mapping {
    pub start: usize,
    pub end: usize,
    pub prot_flags: ProtFlags,
    /// File offset the mapping starts at.
    pub offset: u64,
    /// Empty for anonymous mappings.
    pub pathname: String,
}

impl Mapping {
    pub fn is_executable(&self) -> bool {
        self.prot_flags.contains(ProtFlags::PROT_EXEC)
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.start as u64 <= addr && addr < self.end as u64
    }
}

/// The first executable mapping is where the main binary's code is loaded.
pub fn first_executable(mappings: &[Mapping]) -> Option<&Mapping> {
    mappings.iter().find(|m| m.is_executable())
}

pub fn pid_path(pid: Pid) -> PathBuf {
    PathBuf::from("/proc").join(pid.as_raw().to_string())
}

fn parse_prot(perms: &str) -> Result<ProtFlags> {
    let perms = perms.as_bytes();
    if perms.len() != 4 {
        bail!(
            "expected 4 permission characters, got '{}'",
            String::from_utf8_lossy(perms)
        );
    }
    let mut prot = ProtFlags::empty();
    if perms[0] == b'r' {
        prot |= ProtFlags::PROT_READ;
    }
    if perms[1] == b'w' {
        prot |= ProtFlags::PROT_WRITE;
    }
    if perms[2] == b'x' {
        prot |= ProtFlags::PROT_EXEC;
    }
    Ok(prot)
}

/// `start-end perms offset dev inode [pathname]`
fn parse_line(line: &str) -> Result<Mapping> {
    let fields = line.splitn(6, ' ').collect::<Vec<_>>();
    if fields.len() < 5 {
        bail!("expected at least 5 fields");
    }
    let (start, end) = match fields[0].split_once('-') {
        Some(range) => range,
        None => bail!("address range has no '-': {}", fields[0]),
    };
    let start = try_with!(
        usize::from_str_radix(start, 16),
        "start address is not a number: {}",
        start
    );
    let end = try_with!(
        usize::from_str_radix(end, 16),
        "end address is not a number: {}",
        end
    );
    let prot_flags = parse_prot(fields[1])?;
    let offset = try_with!(
        u64::from_str_radix(fields[2], 16),
        "offset is not a number: {}",
        fields[2]
    );

    Ok(Mapping {
        start,
        end,
        prot_flags,
        offset,
        pathname: fields.get(5).map_or("", |p| p.trim()).to_string(),
    })
}

pub fn parse_maps<R: BufRead>(reader: R) -> Result<Vec<Mapping>> {
    let mut maps = vec![];
    for line in reader.lines() {
        let line = try_with!(line, "cannot read memory map");
        maps.push(try_with!(parse_line(&line), "cannot parse line {}", line));
    }
    Ok(maps)
}

pub fn maps(pid: Pid) -> Result<Vec<Mapping>> {
    let path = pid_path(pid).join("maps");
    let f = try_with!(File::open(&path), "cannot open {}", path.display());
    parse_maps(BufReader::new(f))
}

/// Value of the `TracerPid:` line of a `/proc/<pid>/status` file.
pub fn parse_tracer_pid(status: &str) -> Option<i32> {
    status
        .lines()
        .find_map(|l| l.strip_prefix("TracerPid:"))
        .and_then(|v| v.trim().parse::<i32>().ok())
}

pub fn status_path(pid: Option<Pid>) -> PathBuf {
    match pid {
        Some(pid) => pid_path(pid).join("status"),
        None => PathBuf::from("/proc/self/status"),
    }
}

fn parse_socket_link(target: &Path) -> Option<u64> {
    target
        .to_str()?
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse::<u64>()
        .ok()
}

/// Inodes of all sockets the process has open.
pub fn socket_inodes(pid: Pid) -> Result<Vec<u64>> {
    let path = pid_path(pid).join("fd");
    let entries = try_with!(read_dir(&path), "failed to read {}", path.display());
    let mut sockets = vec![];
    for maybe_entry in entries {
        let entry = try_with!(maybe_entry, "failed to read {}", path.display());
        let target = if let Ok(res) = read_link(entry.path()) {
            res
        } else {
            // file might be closed again
            continue;
        };
        if let Some(inode) = parse_socket_link(&target) {
            sockets.push(inode);
        }
    }
    Ok(sockets)
}

const TCP_LISTEN: &str = "0A";

/// (port, inode) of every listening socket in a `/proc/net/tcp{,6}` table.
pub fn parse_tcp_listeners(table: &str) -> Vec<(u32, u64)> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields = line.split_whitespace().collect::<Vec<_>>();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                return None;
            }
            let port = fields[1].rsplit(':').next()?;
            let port = u32::from_str_radix(port, 16).ok()?;
            let inode = fields[9].parse::<u64>().ok()?;
            Some((port, inode))
        })
        .collect()
}
