//! Launching, probing and terminating a single process run.

use std::{fs, net::SocketAddr, process::Stdio, time::Duration};

use config::{ProcessConfig, StartupConfig, StdioTarget, StdioTargetType};
use tokio::{
    net::TcpStream,
    process::{Child, Command},
    time::Instant,
};

use crate::SupervisorError;

/// Launches the configured executable in its own process group. The child is killed
/// when its handle is dropped, so no exit path of the supervisor leaks the process.
pub(crate) fn spawn(config: &ProcessConfig) -> Result<Child, SupervisorError> {
    let mut command = Command::new(&config.executable);

    command
        .args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::null())
        .stdout(stdio_target(&config.stdout)?)
        .stderr(stdio_target(&config.stderr)?)
        .kill_on_drop(true);

    if let Some(name) = &config.port_env {
        command.env(name, config.port.to_string());
    }

    if let Some(cwd) = &config.cwd {
        command.current_dir(cwd);
    }

    #[cfg(unix)]
    command.process_group(0);

    command.spawn().map_err(|err| {
        SupervisorError::ProcessStartFailed(format!("failed to launch {}: {err}", config.executable.display()))
    })
}

fn stdio_target(target: &StdioTarget) -> Result<Stdio, SupervisorError> {
    match target {
        StdioTarget::Simple(StdioTargetType::Inherit) => Ok(Stdio::inherit()),
        StdioTarget::Simple(StdioTargetType::Null) => Ok(Stdio::null()),
        StdioTarget::File { file } => {
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .map_err(|err| {
                    SupervisorError::ProcessStartFailed(format!("cannot open {}: {err}", file.display()))
                })?;

            Ok(Stdio::from(file))
        }
    }
}

/// Polls the address until a TCP connection succeeds, doubling the delay between
/// attempts up to `max_backoff`. Fails once `timeout` has elapsed.
pub(crate) async fn wait_until_listening(address: SocketAddr, startup: &StartupConfig) -> Result<(), SupervisorError> {
    let deadline = Instant::now() + startup.timeout;
    let mut delay = startup.initial_backoff;

    loop {
        match tokio::time::timeout_at(deadline, TcpStream::connect(address)).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(err)) => log::trace!("Process not listening on {address} yet: {err}"),
            Err(_) => break,
        }

        let now = Instant::now();

        if now >= deadline {
            break;
        }

        tokio::time::sleep(delay.min(deadline - now)).await;
        delay = delay.saturating_mul(2).min(startup.max_backoff);
    }

    Err(SupervisorError::startup_deadline(address, startup.timeout))
}

/// Sends SIGTERM to the process group, waits up to `grace` for the process to exit,
/// then kills the group and reaps the child. A zero grace kills immediately.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) {
    let pid = child.id();

    #[cfg(unix)]
    if let Some(group) = pid.and_then(process_group)
        && !grace.is_zero()
    {
        use nix::sys::signal::{Signal, killpg};

        log::debug!("Sending SIGTERM to process group {group}");

        if let Err(err) = killpg(group, Signal::SIGTERM) {
            log::warn!("Failed to signal process group {group}: {err}");
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                log::debug!("Process exited after SIGTERM with {status}");

                // Descendants that ignored SIGTERM share the group.
                kill_group(pid);
                return;
            }
            Ok(Err(err)) => log::warn!("Failed to wait for process after SIGTERM: {err}"),
            Err(_) => log::warn!("Process did not exit within {grace:?}, killing it"),
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    kill_group(pid);

    if let Err(err) = child.kill().await {
        log::warn!("Failed to kill process: {err}");
    }
}

/// Kills whatever is left in the process group led by `pid`. Called after the leader
/// exited on its own too, so forked workers never outlive their run.
pub(crate) fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(group) = pid.and_then(process_group) {
        use nix::{
            errno::Errno,
            sys::signal::{Signal, killpg},
        };

        match killpg(group, Signal::SIGKILL) {
            Ok(()) => log::debug!("Killed process group {group}"),
            // The group is already empty.
            Err(Errno::ESRCH) => (),
            Err(err) => log::warn!("Failed to kill process group {group}: {err}"),
        }
    }

    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(unix)]
fn process_group(pid: u32) -> Option<nix::unistd::Pid> {
    i32::try_from(pid).ok().map(nix::unistd::Pid::from_raw)
}
