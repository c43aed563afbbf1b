//! Takeover of older client instances.
//!
//! Only one push-to-talk client should own the hotkey. Rather than a
//! lockfile (a hung predecessor with a stale lock would block new starts
//! forever), startup finds peers by process name and replaces them:
//! SIGTERM, a short grace period, a liveness probe, then SIGKILL for
//! whatever survived. Permission failures are logged and never abort
//! startup.

use std::ffi::OsStr;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Grace period between SIGTERM and the liveness probe.
const TERM_GRACE: Duration = Duration::from_millis(500);

/// Kill any other running instance of `process_name`.
pub async fn takeover_old_instances(process_name: &str) {
    let sys = sysinfo::System::new_all();

    let current = sysinfo::get_current_pid().ok();
    let parent = current
        .and_then(|pid| sys.process(pid))
        .and_then(sysinfo::Process::parent);

    let all: Vec<u32> = sys
        .processes_by_exact_name(OsStr::new(process_name))
        .map(|p| p.pid().as_u32())
        .collect();

    let peers = filter_peers(
        &all,
        current.map(|p| p.as_u32()),
        parent.map(|p| p.as_u32()),
    );
    if peers.is_empty() {
        return;
    }

    tracing::info!(count = peers.len(), "Taking over from older instances");

    for &pid in &peers {
        match signal::kill(raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                tracing::warn!(pid, error = %e, "Could not signal old instance");
            }
        }
    }

    tokio::time::sleep(TERM_GRACE).await;

    for &pid in &peers {
        // Probe with the null signal; success means it survived SIGTERM.
        match signal::kill(raw(pid), None) {
            Ok(()) => {
                tracing::warn!(pid, "Old instance survived SIGTERM, sending SIGKILL");
                match signal::kill(raw(pid), Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(e) => tracing::warn!(pid, error = %e, "SIGKILL failed"),
                }
            }
            Err(Errno::ESRCH) => {
                tracing::debug!(pid, "Old instance exited gracefully");
            }
            Err(e) => {
                tracing::warn!(pid, error = %e, "Liveness probe failed");
            }
        }
    }
}

/// Peers to replace: everything matching the name except ourselves and our
/// parent (which is a launching wrapper, not a competing instance).
#[must_use]
pub fn filter_peers(all: &[u32], current: Option<u32>, parent: Option<u32>) -> Vec<u32> {
    all.iter()
        .copied()
        .filter(|&pid| Some(pid) != current && Some(pid) != parent)
        .collect()
}

#[allow(clippy::cast_possible_wrap)]
fn raw(pid: u32) -> Pid {
    Pid::from_raw(pid as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_peers_means_nothing_to_kill() {
        assert!(filter_peers(&[], Some(100), Some(1)).is_empty());
    }

    #[test]
    fn excludes_the_current_process() {
        assert!(filter_peers(&[100], Some(100), None).is_empty());
    }

    #[test]
    fn excludes_the_parent_wrapper_process() {
        assert!(filter_peers(&[100, 42], Some(100), Some(42)).is_empty());
    }

    #[test]
    fn keeps_genuine_peers() {
        assert_eq!(
            filter_peers(&[100, 42, 7777, 8888], Some(100), Some(42)),
            vec![7777, 8888]
        );
    }

    #[test]
    fn works_without_known_parent() {
        assert_eq!(filter_peers(&[100, 7777], Some(100), None), vec![7777]);
    }
}
