use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

/// Put the child in its own process group so `killpg` reaches its descendants.
pub(crate) fn isolate_process_group(cmd: &mut tokio::process::Command) {
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }
}

/// SIGTERM the groups, wait `grace`, then SIGKILL whatever is left.
pub(crate) async fn terminate_process_groups(pids: &[u32], grace: Duration) {
    if pids.is_empty() {
        return;
    }

    let groups: Vec<Pid> = pids
        .iter()
        .filter_map(|pid| i32::try_from(*pid).ok())
        .map(Pid::from_raw)
        .collect();

    for pgid in &groups {
        let _ = killpg(*pgid, Signal::SIGTERM);
    }

    tokio::time::sleep(grace).await;

    for pgid in &groups {
        let _ = killpg(*pgid, Signal::SIGKILL);
    }
}
