//! OS process table access and signalling

use std::collections::HashSet;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to exit (SIGTERM).
    Terminate,
    /// Force the process to exit (SIGKILL).
    Kill,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// One row of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub command: String,
}

/// Process inspection and signalling, swappable for tests.
pub trait ProcessControl: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()>;

    /// Signal every member of the process group led by `pgid`.
    fn signal_group(&self, pgid: u32, signal: Signal) -> io::Result<()>;

    fn list_processes(&self) -> io::Result<Vec<ProcessInfo>>;

    fn current_pid(&self) -> u32 {
        std::process::id()
    }
}

/// Parse `ps -o pid=,ppid=,args=` output. Malformed lines are skipped.
pub fn parse_ps_output(output: &str) -> Vec<ProcessInfo> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (pid, rest) = line.split_once(char::is_whitespace)?;
            let rest = rest.trim_start();
            let (ppid, command) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            Some(ProcessInfo {
                pid: pid.parse().ok()?,
                ppid: ppid.parse().ok()?,
                command: command.trim().to_string(),
            })
        })
        .collect()
}

/// Every process below `root` in the parent tree.
pub fn descendants(root: u32, table: &[ProcessInfo]) -> Vec<u32> {
    let mut found = Vec::new();
    let mut seen = HashSet::from([root]);
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for child in table.iter().filter(|p| p.ppid == parent) {
            if seen.insert(child.pid) {
                found.push(child.pid);
                frontier.push(child.pid);
            }
        }
    }
    found
}

/// `pid` and its ancestors. These must never be signalled by a search.
pub fn lineage(pid: u32, table: &[ProcessInfo]) -> HashSet<u32> {
    let mut chain = HashSet::from([pid]);
    let mut current = pid;
    while let Some(parent) = table.iter().find(|p| p.pid == current).map(|p| p.ppid) {
        if parent == 0 || !chain.insert(parent) {
            break;
        }
        current = parent;
    }
    chain
}

/// Signal-based control through `kill(2)`, `killpg(2)` and `ps`.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixProcessControl;

#[cfg(unix)]
impl UnixProcessControl {
    fn nix_signal(signal: Signal) -> nix::sys::signal::Signal {
        match signal {
            Signal::Terminate => nix::sys::signal::Signal::SIGTERM,
            Signal::Kill => nix::sys::signal::Signal::SIGKILL,
        }
    }

    fn to_pid(pid: u32) -> io::Result<nix::unistd::Pid> {
        i32::try_from(pid)
            .ok()
            .filter(|raw| *raw > 0)
            .map(nix::unistd::Pid::from_raw)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("bad pid {}", pid)))
    }
}

#[cfg(unix)]
impl ProcessControl for UnixProcessControl {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(target) = Self::to_pid(pid) else {
            return false;
        };

        // Zombies still answer kill(0) until reaped
        if cfg!(target_os = "linux") {
            if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                let state = stat
                    .rsplit_once(')')
                    .and_then(|(_, rest)| rest.split_whitespace().next());
                return !matches!(state, Some("Z") | Some("X"));
            }
        }

        match nix::sys::signal::kill(target, None::<nix::sys::signal::Signal>) {
            Ok(()) => true,
            Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        nix::sys::signal::kill(Self::to_pid(pid)?, Self::nix_signal(signal))?;
        Ok(())
    }

    fn signal_group(&self, pgid: u32, signal: Signal) -> io::Result<()> {
        nix::sys::signal::killpg(Self::to_pid(pgid)?, Self::nix_signal(signal))?;
        Ok(())
    }

    fn list_processes(&self) -> io::Result<Vec<ProcessInfo>> {
        let output = std::process::Command::new("ps")
            .args(["-A", "-ww", "-o", "pid=,ppid=,args="])
            .stdin(std::process::Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("ps exited with {}", output.status),
            ));
        }
        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }
}
