//! Zombie process audit.

use super::{Routine, RoutineEnv, RoutineReport};
use crate::process_guard::parse_stat_state;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// The fields of `/proc/<pid>/stat` the audit needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
}

/// Parse one stat line. `comm` may contain spaces and parentheses.
pub fn parse_stat(stat: &str) -> Option<ProcStat> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let pid = stat[..open].trim().parse().ok()?;
    let comm = stat.get(open + 1..close)?.to_string();
    let state = parse_stat_state(stat)?;
    let ppid = stat[close + 1..].split_whitespace().nth(1)?.parse().ok()?;
    Some(ProcStat { pid, comm, state, ppid })
}

/// Processes in state `Z` under `proc_root`, by PID
pub fn scan_zombies(proc_root: &Path) -> Result<Vec<ProcStat>> {
    let entries = fs::read_dir(proc_root).with_context(|| format!("Failed to list {}", proc_root.display()))?;
    let mut zombies: Vec<ProcStat> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()))
        // Processes may exit between listing and reading
        .filter_map(|entry| fs::read_to_string(entry.path().join("stat")).ok())
        .filter_map(|stat| parse_stat(&stat))
        .filter(|p| p.state == 'Z')
        .collect();
    zombies.sort_by_key(|p| p.pid);
    Ok(zombies)
}

fn command_name(proc_root: &Path, pid: u32) -> String {
    fs::read_to_string(proc_root.join(pid.to_string()).join("stat"))
        .ok()
        .and_then(|stat| parse_stat(&stat))
        .map(|p| p.comm)
        .unwrap_or_else(|| "?".to_string())
}

/// Report zombies under `proc_root` and the parents that should reap them
pub fn audit(proc_root: &Path) -> Result<RoutineReport> {
    let mut report = RoutineReport::new(Routine::Processes);
    let zombies = scan_zombies(proc_root)?;
    if zombies.is_empty() {
        report.note("no zombie processes");
    }
    for zombie in zombies {
        report.problem(format!(
            "zombie {} ({}) waiting on parent {} ({})",
            zombie.pid,
            zombie.comm,
            zombie.ppid,
            command_name(proc_root, zombie.ppid)
        ));
    }
    Ok(report)
}

pub fn run(env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    let report = audit(Path::new("/proc"))?;
    env.engine
        .audit()
        .record(&format!("process audit: {} zombie(s)", report.problems.len()));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_proc(entries: &[(u32, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (pid, stat) in entries {
            let pdir = dir.path().join(pid.to_string());
            fs::create_dir(&pdir).unwrap();
            fs::write(pdir.join("stat"), stat).unwrap();
        }
        fs::create_dir(dir.path().join("self")).unwrap();
        dir
    }

    #[test]
    fn test_parse_stat_with_odd_comm() {
        let stat = parse_stat("4242 (my (odd) proc) Z 17 4242 4242 0 -1 4194564").unwrap();
        assert_eq!(stat.pid, 4242);
        assert_eq!(stat.comm, "my (odd) proc");
        assert_eq!(stat.state, 'Z');
        assert_eq!(stat.ppid, 17);
        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn test_audit_reports_zombie_and_parent() {
        let proc_root = fake_proc(&[
            (1, "1 (systemd) S 0 1 1 0 -1"),
            (17, "17 (buggy-daemon) S 1 17 17 0 -1"),
            (4242, "4242 (worker) Z 17 17 17 0 -1"),
        ]);
        let report = audit(proc_root.path()).unwrap();
        assert_eq!(report.problems.len(), 1);
        assert!(report.problems[0].contains("zombie 4242 (worker)"));
        assert!(report.problems[0].contains("parent 17 (buggy-daemon)"));
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_audit_clean() {
        let proc_root = fake_proc(&[(1, "1 (systemd) S 0 1 1 0 -1")]);
        let report = audit(proc_root.path()).unwrap();
        assert!(report.problems.is_empty());
        assert_eq!(report.exit_code(), 0);
    }
}
