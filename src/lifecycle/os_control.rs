//! OS-level suspend and resume of the backend process tree
//!
//! The backend typically forks helpers (watchdogs, JVM children), so a
//! suspend must cover the root process and every descendant. Descendants
//! are discovered through the OS process table; signalling is per-process
//! SIGSTOP/SIGCONT on Unix. A process that vanished between discovery and
//! signalling is logged and skipped: partial failures are non-fatal, and
//! a resume always attempts the whole tree.

use sysinfo::{ProcessesToUpdate, System};
use tracing::warn;

/// Enumerate `root` and all of its descendants via parent links.
///
/// The root comes first, so suspension stops the tree top-down before any
/// member can spawn replacements.
pub fn process_tree(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let processes = system.processes();

    let mut tree = vec![root];
    let mut frontier = vec![sysinfo::Pid::from_u32(root)];
    while let Some(parent) = frontier.pop() {
        for (pid, process) in processes {
            if process.parent() == Some(parent) {
                tree.push(pid.as_u32());
                frontier.push(*pid);
            }
        }
    }
    tree
}

/// Stop execution of every process in the tree rooted at `root`.
///
/// Returns how many processes were actually signalled; zero means the
/// tree is gone and the caller should fall back to a graceful stop.
#[cfg(unix)]
pub fn suspend_tree(root: u32) -> usize {
    signal_tree(root, nix::sys::signal::Signal::SIGSTOP)
}

/// Resume execution of every process in the tree rooted at `root`.
///
/// Attempts all members even when some fail: a half-resumed tree stays
/// wedged, a skipped corpse does not.
#[cfg(unix)]
pub fn resume_tree(root: u32) -> usize {
    signal_tree(root, nix::sys::signal::Signal::SIGCONT)
}

#[cfg(unix)]
fn signal_tree(root: u32, signal: nix::sys::signal::Signal) -> usize {
    let tree = process_tree(root);
    tracing::debug!("{signal} for process tree of {root}: {tree:?}");

    let mut signalled = 0;
    for pid in &tree {
        match nix::sys::signal::kill(nix::unistd::Pid::from_raw(*pid as i32), signal) {
            Ok(()) => signalled += 1,
            Err(e) => warn!("{signal} failed for pid {pid} (skipped): {e}"),
        }
    }
    signalled
}

/// Process-tree suspension is not available on this platform; config
/// validation refuses `allow_suspend` here, so these are never reached
/// through a legal configuration.
#[cfg(not(unix))]
pub fn suspend_tree(root: u32) -> usize {
    warn!("process suspension is unsupported on this platform (pid {root})");
    0
}

#[cfg(not(unix))]
pub fn resume_tree(root: u32) -> usize {
    warn!("process resume is unsupported on this platform (pid {root})");
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_contains_root_first() {
        let pid = std::process::id();
        let tree = process_tree(pid);
        assert_eq!(tree[0], pid);
    }

    #[cfg(unix)]
    #[test]
    fn test_tree_of_leaf_process_is_just_the_root() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let tree = process_tree(child.id());
        assert_eq!(tree, vec![child.id()]);

        let _ = child.kill();
        let _ = child.wait();
    }

    #[cfg(unix)]
    #[test]
    fn test_suspend_and_resume_child_process() {
        let child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();

        assert_eq!(suspend_tree(pid), 1);
        assert_eq!(resume_tree(pid), 1);

        // cleanup
        let mut child = child;
        let _ = child.kill();
        let _ = child.wait();
    }

    #[cfg(unix)]
    #[test]
    fn test_signalling_vanished_tree_is_nonfatal() {
        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let pid = child.id();
        let _ = child.wait();

        // the process is gone; both calls must simply report zero
        assert_eq!(suspend_tree(pid), 0);
        assert_eq!(resume_tree(pid), 0);
    }
}
