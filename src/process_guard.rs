//! Process lifecycle management for external commands
//!
//! Every external binary (`systemctl`, `sshd`, `aide`, ...) is spawned in its
//! own process group with a parent-death signal, so a Ctrl+C at the terminal
//! does not interrupt a half-finished `systemctl restart`, and children never
//! outlive the tool.
//!
//! # Mutation critical sections
//!
//! Once a mutation has written its backup, the sequence must run to a
//! terminal state. [`CriticalSection`] marks that window: the signal watcher
//! started by [`init_signal_handlers`] first closes the door on new sections,
//! then waits for every open one to close before terminating children and
//! exiting.

use crate::error::{HardenError, Result as HardenResult};
use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::sys::termios::{SetArg, Termios, tcsetattr};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Global registry of child process IDs
static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Number of mutation critical sections currently open
static CRITICAL_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Set once a termination signal arrived; no new section may open after it
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Terminal settings to put back if we exit while they are changed
static SAVED_TERMINAL: Mutex<Option<(OwnedFd, Termios)>> = Mutex::new(None);

/// Registry tracking spawned external commands
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!("Registered child process PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!("Unregistered child process PID {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Signal every tracked process group: SIGTERM, then SIGKILL after `grace_period`
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated || self.pids.is_empty() {
            return;
        }
        self.cleanup_initiated = true;

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        info!("Terminating {} child process group(s)", pids.len());
        for &pid in &pids {
            if let Err(e) = signal_group(pid, Signal::SIGTERM) {
                warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in pids.iter().filter(|&&pid| is_process_alive(pid)) {
            warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
            let _ = signal_group(pid, Signal::SIGKILL);
        }
        self.pids.clear();
    }
}

/// Signal an entire process group (negative PID)
fn signal_group(pgid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

/// Parse the state field out of a `/proc/<pid>/stat` line.
///
/// The command name is wrapped in parentheses and may itself contain spaces
/// or parentheses, so the state is the first field after the LAST `)`.
pub fn parse_stat_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().next()?.chars().next()
}

/// True if the process exists and is neither a zombie nor dead
pub fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => !matches!(parse_stat_state(&stat), Some('Z') | Some('X')),
        // Can't read /proc: assume alive
        Err(_) => true,
    }
}

/// RAII marker for the window in which a mutation must not be interrupted.
///
/// Sections nest; signals are honoured once the outermost one is dropped.
#[derive(Debug)]
pub struct CriticalSection {
    _private: (),
}

impl CriticalSection {
    /// Open a section, unless a shutdown is already under way
    pub fn enter() -> HardenResult<Self> {
        // Count first, then check: the watcher sets the flag before it reads
        // the depth, so one of the two always sees the other
        CRITICAL_DEPTH.fetch_add(1, Ordering::SeqCst);
        let section = Self { _private: () };
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            drop(section);
            return Err(HardenError::precondition(
                "shutdown requested, not starting a new change",
            ));
        }
        Ok(section)
    }

    /// True while any section is open
    pub fn is_active() -> bool {
        CRITICAL_DEPTH.load(Ordering::SeqCst) > 0
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        CRITICAL_DEPTH.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Refuse new critical sections from now on
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Remember how a terminal was set up before we changed it
pub fn save_terminal(fd: OwnedFd, settings: Termios) {
    if let Ok(mut saved) = SAVED_TERMINAL.lock() {
        *saved = Some((fd, settings));
    }
}

/// Put back saved terminal settings, if any
pub fn restore_terminal() {
    let saved = SAVED_TERMINAL.lock().ok().and_then(|mut saved| saved.take());
    if let Some((fd, settings)) = saved {
        if let Err(e) = tcsetattr(&fd, SetArg::TCSANOW, &settings) {
            warn!("Failed to restore terminal settings: {}", e);
        }
    }
}

/// Install the SIGINT/SIGTERM/SIGHUP watcher. Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            request_shutdown();
            if CriticalSection::is_active() {
                warn!(
                    "Received signal {} during a config mutation; finishing the current step before exiting",
                    sig
                );
                while CriticalSection::is_active() {
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
            info!("Received signal {}, cleaning up", sig);
            restore_terminal();
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command in its own process group and kill it if we die
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls (setpgid, prctl) run between fork and exec
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();
        registry.register(1234);
        registry.register(5678);
        assert_eq!(registry.count(), 2);
        registry.unregister(1234);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_parse_stat_state_plain() {
        assert_eq!(parse_stat_state("42 (bash) S 1 42 42 0"), Some('S'));
        assert_eq!(parse_stat_state("43 (defunct) Z 42 43 43 0"), Some('Z'));
    }

    #[test]
    fn test_parse_stat_state_with_parens_in_name() {
        assert_eq!(parse_stat_state("77 (weird) name)) R 1 77"), Some('R'));
        assert_eq!(parse_stat_state("garbage"), None);
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(999_999));
    }

    #[test]
    fn test_critical_section_nests() {
        let outer = CriticalSection::enter().unwrap();
        assert!(CriticalSection::is_active());
        {
            let _inner = CriticalSection::enter().unwrap();
            assert!(CriticalSection::is_active());
        }
        assert!(CriticalSection::is_active());
        drop(outer);
    }

    #[test]
    fn test_restore_terminal_puts_echo_back() {
        use nix::sys::termios::{LocalFlags, tcgetattr};

        let pty = nix::pty::openpty(None, None).unwrap();
        let original = tcgetattr(&pty.slave).unwrap();
        assert!(original.local_flags.contains(LocalFlags::ECHO));
        let mut silent = original.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        save_terminal(pty.slave.try_clone().unwrap(), original);
        tcsetattr(&pty.slave, SetArg::TCSANOW, &silent).unwrap();
        assert!(!tcgetattr(&pty.slave).unwrap().local_flags.contains(LocalFlags::ECHO));

        restore_terminal();
        assert!(tcgetattr(&pty.slave).unwrap().local_flags.contains(LocalFlags::ECHO));
        // The slot is emptied; a second restore is a no-op
        restore_terminal();
    }

    #[test]
    fn test_terminate_all_kills_real_process() {
        use std::process::Command;

        let mut child = Command::new("sleep")
            .arg("60")
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sleep");
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        registry.terminate_all(Duration::from_millis(500));

        let status = child.wait().expect("wait failed");
        assert!(!status.success());
        assert_eq!(registry.count(), 0);
    }
}
