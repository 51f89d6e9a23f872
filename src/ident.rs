//! Find the target control port a child opened.

use log::{debug, error};
use nix::unistd::Pid;
use simple_error::bail;
use std::fs;
use std::process::Command;
use std::thread::sleep;
use std::time::Duration;

use crate::config::PortRange;
use crate::result::Result;
use crate::tracer::proc::{parse_tcp_listeners, pid_path, socket_inodes};

const LSOF_ATTEMPTS: usize = 10;
const LSOF_INITIAL_WAIT: Duration = Duration::from_millis(1);

fn lsof_args(pid: Pid) -> Vec<String> {
    vec![
        "-p".to_string(),
        pid.to_string(),
        "-a".to_string(),
        "-i".to_string(),
        "4".to_string(),
        "-F".to_string(),
        "n".to_string(),
    ]
}

fn run_lsof(pid: Pid) -> Option<String> {
    let output = match Command::new("lsof").args(lsof_args(pid)).output() {
        Ok(output) => output,
        Err(e) => {
            debug!("cannot run lsof: {}", e);
            return None;
        }
    };
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run `cmd` up to `attempts` times until it produces output, sleeping
/// `initial`, 2 * `initial`, 4 * `initial`, ... in between.
pub fn retry_with_backoff<F, S>(attempts: usize, initial: Duration, mut cmd: F, mut wait: S) -> Option<String>
where
    F: FnMut() -> Option<String>,
    S: FnMut(Duration),
{
    let mut delay = initial;
    for attempt in 0..attempts {
        if let Some(out) = cmd() {
            if !out.is_empty() {
                return Some(out);
            }
        }
        if attempt + 1 < attempts {
            wait(delay);
            delay *= 2;
        }
    }
    None
}

fn leading_number(s: &str) -> Option<u32> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or_else(|| s.len());
    s[..end].parse::<u32>().ok()
}

/// Parse `lsof -F n` output:
///
/// ```text
/// p<PID>
/// <TEXT>
/// n*:<PORT>
/// ```
///
/// Returns the first listening port within `range`.
pub fn parse_ident_port(output: &str, pid: Pid, range: &PortRange) -> Result<u16> {
    let rest = match output.strip_prefix('p') {
        Some(rest) => rest,
        None => bail!("failed to parse output from lsof:\n{}", output),
    };
    let reported = leading_number(rest);
    if reported != Some(pid.as_raw() as u32) {
        bail!(
            "pid from lsof output ({:?}) doesn't match child PID {}",
            reported,
            pid
        );
    }

    const NET: &str = "n*:";
    let mut pos = 0;
    while let Some(idx) = rest[pos..].find(NET) {
        let start = pos + idx + NET.len();
        if let Some(port) = leading_number(&rest[start..]) {
            if range.contains(port) {
                return Ok(port as u16);
            }
        }
        // continue on to next port
        pos = start;
    }
    bail!(
        "malformed line - expected '{}<port>' within {}-{}:\n{}",
        NET,
        range.first,
        range.last,
        &rest[pos..]
    );
}

/// Look for a listening TCP socket of `pid` within `range` in procfs.
pub fn proc_listen_port(pid: Pid, range: &PortRange) -> Result<Option<u16>> {
    let inodes = socket_inodes(pid)?;
    for table in &["tcp", "tcp6"] {
        let path = pid_path(pid).join("net").join(table);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            // no ipv6 support
            Err(e) if *table == "tcp6" => {
                debug!("cannot read {}: {}", path.display(), e);
                continue;
            }
            Err(e) => bail!("cannot read {}: {}", path.display(), e),
        };
        let port = parse_tcp_listeners(&contents)
            .into_iter()
            .find(|(port, inode)| range.contains(*port) && inodes.contains(inode))
            .map(|(port, _)| port as u16);
        if port.is_some() {
            return Ok(port);
        }
    }
    Ok(None)
}

/// Like [`get_ident_port_in`], with `lsof` replaced by `cmd`.
pub fn get_ident_port_with<F, S>(pid: Pid, range: &PortRange, cmd: F, wait: S) -> u16
where
    F: FnMut() -> Option<String>,
    S: FnMut(Duration),
{
    let output = match retry_with_backoff(LSOF_ATTEMPTS, LSOF_INITIAL_WAIT, cmd, wait) {
        Some(output) => output,
        None => {
            error!(
                "No output from lsof command: 'lsof {}'",
                lsof_args(pid).join(" ")
            );
            return 0;
        }
    };

    match parse_ident_port(&output, pid, range) {
        Ok(port) => port,
        Err(e) => {
            error!("{}", e);
            0
        }
    }
}

/// The target control port of `pid` in `range`, or 0.
pub fn get_ident_port_in(pid: Pid, range: &PortRange) -> u16 {
    get_ident_port_with(pid, range, || run_lsof(pid), sleep)
}

pub fn get_ident_port(pid: Pid) -> u16 {
    get_ident_port_in(pid, &PortRange::default())
}
