//! Process-tree discovery from `/proc`.

use walkdir::WalkDir;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

/// Parses `(pid, ppid, state)` out of a `/proc/<pid>/stat` line. The command name may contain
/// spaces and parentheses, so fields are read after the last `)`.
fn parse_stat(stat: &str) -> Option<(u32, u32, char)> {
    let pid = stat.split_whitespace().next()?.parse().ok()?;
    let close = stat.rfind(')')?;
    let mut rest = stat[close + 1..].split_whitespace();
    let state = rest.next()?.chars().next()?;
    let ppid = rest.next()?.parse().ok()?;
    Some((pid, ppid, state))
}

fn read_stat(proc_root: &Path, pid: u32) -> Option<(u32, u32, char)> {
    let stat = std::fs::read_to_string(proc_root.join(pid.to_string()).join("stat")).ok()?;
    parse_stat(&stat)
}

/// True while the process exists and is not a zombie.
pub fn pid_alive(pid: u32) -> bool {
    matches!(read_stat(Path::new("/proc"), pid), Some((_, _, state)) if state != 'Z')
}

/// `root` followed by all of its live descendants; empty when `root` is gone.
pub fn process_tree(root: u32) -> Vec<u32> {
    process_tree_in(Path::new("/proc"), root)
}

pub(crate) fn process_tree_in(proc_root: &Path, root: u32) -> Vec<u32> {
    if !matches!(read_stat(proc_root, root), Some((_, _, state)) if state != 'Z') {
        return Vec::new();
    }

    let mut children: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for entry in WalkDir::new(proc_root).min_depth(1).max_depth(1).into_iter().flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Processes can exit between the directory listing and the read.
        if let Some((_, ppid, state)) = read_stat(proc_root, pid) {
            if state != 'Z' {
                children.entry(ppid).or_default().push(pid);
            }
        }
    }

    let mut seen = BTreeSet::from([root]);
    let mut out = vec![root];
    let mut queue = VecDeque::from([root]);
    while let Some(parent) = queue.pop_front() {
        for &child in children.get(&parent).into_iter().flatten() {
            if seen.insert(child) {
                out.push(child);
                queue.push_back(child);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_proc(entries: &[(u32, u32, char)]) -> std::path::PathBuf {
        let root = std::env::temp_dir().join(format!("crashrepro-proc-{}", uuid::Uuid::new_v4()));
        for &(pid, ppid, state) in entries {
            let dir = root.join(pid.to_string());
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(
                dir.join("stat"),
                format!("{pid} (a (weird) name) {state} {ppid} {pid} {pid} 0 -1 4194560"),
            )
            .unwrap();
        }
        std::fs::create_dir_all(root.join("self")).unwrap();
        root
    }

    #[test]
    fn parses_stat_with_parenthesised_name() {
        assert_eq!(parse_stat("12 (chrome (renderer)) S 7 12 12 0"), Some((12, 7, 'S')));
        assert_eq!(parse_stat("garbage"), None);
    }

    #[test]
    fn collects_descendants_breadth_first() {
        let root = fake_proc(&[
            (1, 0, 'S'),
            (10, 1, 'S'),
            (11, 10, 'S'),
            (12, 10, 'Z'),
            (13, 11, 'R'),
            (20, 1, 'S'),
        ]);
        assert_eq!(process_tree_in(&root, 10), vec![10, 11, 13]);
        assert!(process_tree_in(&root, 99).is_empty());
        assert!(process_tree_in(&root, 12).is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn own_process_is_alive_and_in_its_tree() {
        let me = std::process::id();
        assert!(pid_alive(me));
        assert_eq!(process_tree(me).first(), Some(&me));
    }
}
