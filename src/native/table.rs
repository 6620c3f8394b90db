//! # Process table snapshot and descendant walk.
//!
//! [`ProcessTable::capture`] enumerates the live processes once and records each
//! one's parent id:
//!
//! - **Linux**: scans `/proc/<pid>/stat`
//! - **other Unix** (macOS, BSD): parses `ps -A -o pid=,ppid=`
//! - **Windows**: walks a toolhelp snapshot
//!
//! Enumeration is best-effort: a process that disappears mid-scan is skipped.
//!
//! ## Descendant order
//! ```text
//!        10                descendants(10) = [12, 13, 11, 14]
//!       /  \
//!     11    14             every child appears before its parent,
//!    /  \                  so killing in this order never orphans
//!  12    13                a live grandchild behind a dead parent
//! ```

use std::collections::{HashMap, HashSet};
use std::io;

/// Point-in-time map of live pid → parent pid.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    parent_of: HashMap<u32, u32>,
}

impl ProcessTable {
    /// Enumerates the live processes of this machine.
    pub fn capture() -> io::Result<Self> {
        list_processes().map(Self::from_pairs)
    }

    /// Builds a table from `(pid, parent_pid)` pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        Self {
            parent_of: pairs
                .into_iter()
                .filter(|(pid, ppid)| pid != ppid)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parent_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent_of.is_empty()
    }

    /// Every pid in the table, sorted.
    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.parent_of.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.parent_of.contains_key(&pid)
    }

    pub fn parent_of(&self, pid: u32) -> Option<u32> {
        self.parent_of.get(&pid).copied()
    }

    /// Direct children of `pid`, sorted.
    pub fn children_of(&self, pid: u32) -> Vec<u32> {
        let mut children: Vec<u32> = self
            .parent_of
            .iter()
            .filter(|&(_, &ppid)| ppid == pid)
            .map(|(&child, _)| child)
            .collect();
        children.sort_unstable();
        children
    }

    /// All transitive descendants of `root` (excluding `root`), children before parents.
    pub fn descendants(&self, root: u32) -> Vec<u32> {
        if root == 0 {
            return Vec::new();
        }
        let mut index: HashMap<u32, Vec<u32>> = HashMap::new();
        for (&pid, &ppid) in &self.parent_of {
            index.entry(ppid).or_default().push(pid);
        }
        for children in index.values_mut() {
            children.sort_unstable();
        }

        let mut visited = HashSet::from([root]);
        let mut out = Vec::new();
        collect_post_order(&index, root, &mut visited, &mut out);
        out
    }
}

fn collect_post_order(
    index: &HashMap<u32, Vec<u32>>,
    pid: u32,
    visited: &mut HashSet<u32>,
    out: &mut Vec<u32>,
) {
    let Some(children) = index.get(&pid) else {
        return;
    };
    for &child in children {
        // pid reuse can fabricate cycles
        if visited.insert(child) {
            collect_post_order(index, child, visited, out);
            out.push(child);
        }
    }
}

// =============================================================================
// Linux: /proc filesystem
// =============================================================================

#[cfg(target_os = "linux")]
fn list_processes() -> io::Result<Vec<(u32, u32)>> {
    let mut pairs = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let Ok(entry) = entry else { continue };
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // The process may exit between read_dir and read.
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            continue;
        };
        if let Some(ppid) = parse_stat_ppid(&stat) {
            pairs.push((pid, ppid));
        }
    }
    Ok(pairs)
}

/// Parses the parent pid out of `/proc/<pid>/stat`: "pid (comm) state ppid ...".
#[cfg(any(target_os = "linux", test))]
fn parse_stat_ppid(stat: &str) -> Option<u32> {
    // comm may contain spaces and parentheses; the last ')' closes it.
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

#[cfg(target_os = "linux")]
fn read_resident_bytes(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    parse_vm_rss_kb(&status).map(|kb| kb * 1024)
}

#[cfg(any(target_os = "linux", test))]
fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

// =============================================================================
// Other Unix: ps
// =============================================================================

#[cfg(all(unix, not(target_os = "linux")))]
fn list_processes() -> io::Result<Vec<(u32, u32)>> {
    let output = std::process::Command::new("ps")
        .args(["-A", "-o", "pid=,ppid="])
        .output()?;
    if !output.status.success() {
        return Err(io::Error::other(format!(
            "ps returned non-zero: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(parse_ps_pairs(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(any(all(unix, not(target_os = "linux")), test))]
fn parse_ps_pairs(stdout: &str) -> Vec<(u32, u32)> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            Some((pid, ppid))
        })
        .collect()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn read_resident_bytes(pid: u32) -> Option<u64> {
    let output = std::process::Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let kb: u64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
    Some(kb * 1024)
}

// =============================================================================
// Windows: toolhelp snapshot
// =============================================================================

#[cfg(windows)]
fn list_processes() -> io::Result<Vec<(u32, u32)>> {
    super::windows::list_processes()
}

#[cfg(windows)]
fn read_resident_bytes(pid: u32) -> Option<u64> {
    super::windows::resident_bytes(pid)
}

#[cfg(not(any(unix, windows)))]
fn list_processes() -> io::Result<Vec<(u32, u32)>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process enumeration not supported on this platform",
    ))
}

#[cfg(not(any(unix, windows)))]
fn read_resident_bytes(_pid: u32) -> Option<u64> {
    None
}

/// Resident memory of `pid` in bytes, if the process exists and the platform reports it.
pub fn resident_bytes(pid: u32) -> Option<u64> {
    read_resident_bytes(pid)
}
