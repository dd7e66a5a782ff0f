/// Process-tree termination by root PID and leftover-process hunting by name.
///
/// Supervised binaries spawn long-running challenge processes that do not die
/// with a signal to the parent alone, so every kill here walks `/proc` and
/// takes the whole descendant set down. Exploited binaries additionally leave
/// orphans that have been reparented away from our tree; those are hunted by
/// their `comm` name across the full process table.
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// `comm` is capped by the kernel; names longer than this are compared
/// against their truncation.
const TASK_COMM_LEN: usize = 15;

/// Snapshot of the process table as parent -> children edges.
fn children_map() -> HashMap<i32, Vec<i32>> {
    let mut map: HashMap<i32, Vec<i32>> = HashMap::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return map;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        if let Some(ppid) = parent_of(pid) {
            map.entry(ppid).or_default().push(pid);
        }
    }
    map
}

/// Parse the ppid out of `/proc/<pid>/stat`. The comm field may contain
/// spaces and parentheses, so scanning starts after the last `)`.
fn parent_of(pid: i32) -> Option<i32> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}

/// Collect every live descendant of `root`, depth-first.
pub fn descendants(root: u32) -> Vec<i32> {
    let map = children_map();
    let mut found = Vec::new();
    let mut stack = vec![root as i32];
    while let Some(pid) = stack.pop() {
        if let Some(children) = map.get(&pid) {
            for &child in children {
                found.push(child);
                stack.push(child);
            }
        }
    }
    found
}

fn send_kill(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(e) => {
            warn!("SIGKILL to {pid} failed: {e}");
            false
        }
    }
}

/// Kill `root` and every descendant. Descendants are collected again after
/// each pass because a dying shell can still fork between snapshot and kill;
/// the walk stops once a pass finds nothing alive.
pub fn kill_tree(root: u32) -> Vec<i32> {
    let mut killed = Vec::new();
    for _ in 0..3 {
        let targets = descendants(root);
        if targets.is_empty() {
            break;
        }
        // Children first so nothing re-parents a still-spawning grandchild.
        for &pid in targets.iter().rev() {
            if send_kill(pid) {
                killed.push(pid);
            }
        }
    }
    if send_kill(root as i32) {
        killed.push(root as i32);
    }
    debug!("killed process tree rooted at {root}: {killed:?}");
    killed
}

fn comm_of(pid: i32) -> Option<String> {
    fs::read_to_string(format!("/proc/{pid}/comm"))
        .ok()
        .map(|s| s.trim_end().to_string())
}

/// Hunt processes by executable name across the whole process table and kill
/// them, together with any explicitly harvested pids. Returns what was
/// actually killed.
pub fn kill_by_name(name: &str, extra_pids: &[i32]) -> Vec<i32> {
    let truncated: String = name.chars().take(TASK_COMM_LEN).collect();
    let mut killed = Vec::new();

    if let Ok(entries) = fs::read_dir("/proc") {
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(pid) = file_name.to_str().and_then(|s| s.parse::<i32>().ok()) else {
                continue;
            };
            let Some(comm) = comm_of(pid) else { continue };
            if comm == name || comm == truncated {
                if send_kill(pid) {
                    killed.push(pid);
                }
            }
        }
    }

    for &pid in extra_pids {
        if pid > 0 && Path::new(&format!("/proc/{pid}")).exists() && send_kill(pid) {
            killed.push(pid);
        }
    }

    killed
}
