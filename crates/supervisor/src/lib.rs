//! Supervision of the external MCP server process.
//!
//! A single control task launches the configured executable, waits until it accepts
//! connections, restarts it with exponential backoff when it exits, and terminates it
//! gracefully on shutdown. Everybody else only reads the published [`ProcessStatus`].

mod backoff;
mod control;
mod error;
mod process;
mod status;

use std::{net::SocketAddr, time::Duration};

use config::ProcessConfig;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

pub use error::SupervisorError;
pub use status::{Lifecycle, ProcessStatus};

/// Owner of the supervised process.
///
/// Dropping the supervisor kills the process without a grace period. Use
/// [`Supervisor::stop`] for an orderly shutdown.
pub struct Supervisor {
    handle: SupervisorHandle,
    stop: mpsc::Sender<Duration>,
    task: JoinHandle<()>,
}

impl Supervisor {
    /// Launches the process and resolves once it is confirmed listening. Startup
    /// failures are retried per the restart policy; if the policy gives up before the
    /// first successful start, the fatal error is returned.
    pub async fn start(config: ProcessConfig) -> Result<Self, SupervisorError> {
        let address = config.address();
        let (status_sender, status) = watch::channel(ProcessStatus::default());
        let (stop, stop_receiver) = mpsc::channel(1);

        let task = tokio::spawn(control::Controller::new(config, status_sender, stop_receiver).run());

        let supervisor = Self {
            handle: SupervisorHandle { address, status },
            stop,
            task,
        };

        let status = supervisor
            .handle
            .wait_for(|status| matches!(status.lifecycle, Lifecycle::Running | Lifecycle::Stopped))
            .await;

        match status {
            Some(status) if status.is_running() => Ok(supervisor),
            Some(status) => Err(status.last_error.unwrap_or(SupervisorError::Terminated)),
            None => Err(SupervisorError::Terminated),
        }
    }

    /// A cheap, cloneable reader of the process status.
    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// Resolves when supervision ends without [`Supervisor::stop`] being called,
    /// which happens once the restart policy is exhausted.
    pub async fn wait_for_fatal(&self) -> SupervisorError {
        self.handle
            .wait_for(|status| status.lifecycle == Lifecycle::Stopped)
            .await
            .and_then(|status| status.last_error)
            .unwrap_or(SupervisorError::Terminated)
    }

    /// Sends a graceful termination signal, waits up to `timeout` for the process to
    /// exit, then kills it. Returns once the process has been reaped.
    pub async fn stop(self, timeout: Duration) {
        let Self { handle, stop, task } = self;

        log::info!("Stopping process listening on {}", handle.address());

        // An error means the control task already finished.
        let _ = stop.send(timeout).await;

        if let Err(err) = task.await {
            log::error!("Supervisor task failed: {err}");
        }
    }
}

/// Read access to the state of the supervised process.
#[derive(Clone)]
pub struct SupervisorHandle {
    address: SocketAddr,
    status: watch::Receiver<ProcessStatus>,
}

impl SupervisorHandle {
    /// Address the process listens on.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Current status snapshot.
    pub fn status(&self) -> ProcessStatus {
        self.status.borrow().clone()
    }

    /// Whether the process is confirmed listening. Traffic must not be forwarded
    /// otherwise.
    pub fn ensure_running(&self) -> bool {
        self.status.borrow().is_running()
    }

    /// Generation of the current run, if the process is running.
    pub fn running_generation(&self) -> Option<u64> {
        let status = self.status.borrow();
        status.is_running().then_some(status.generation)
    }

    /// A receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<ProcessStatus> {
        self.status.clone()
    }

    /// Resolves as soon as the run identified by `generation` is no longer running,
    /// either because the process left `Running` or because a newer run replaced it.
    pub async fn left_running(&self, generation: u64) {
        self.wait_for(|status| !status.is_running() || status.generation != generation)
            .await;
    }

    /// Waits until `condition` holds and returns the matching status, or `None` once
    /// the supervisor is gone.
    async fn wait_for(&self, condition: impl FnMut(&ProcessStatus) -> bool) -> Option<ProcessStatus> {
        let mut status = self.status.clone();
        let result = status.wait_for(condition).await;

        result.ok().map(|status| status.clone())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{
        net::{Ipv4Addr, SocketAddr, TcpListener},
        path::PathBuf,
        time::Duration,
    };

    use config::{ProcessConfig, RestartConfig, StartupConfig};

    use crate::{Lifecycle, Supervisor, SupervisorError};

    fn process(executable: &str, args: &[&str], port: u16) -> ProcessConfig {
        ProcessConfig {
            executable: PathBuf::from(executable),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            host: Ipv4Addr::LOCALHOST.into(),
            port,
            port_env: None,
            env: Default::default(),
            cwd: None,
            stdout: Default::default(),
            stderr: Default::default(),
            startup: StartupConfig {
                timeout: Duration::from_secs(5),
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(100),
            },
            restart: RestartConfig {
                enabled: true,
                max_restarts: 3,
                backoff_min: Duration::from_millis(10),
                backoff_max: Duration::from_millis(50),
                reset_after: Duration::from_secs(60),
            },
            shutdown: Default::default(),
        }
    }

    /// A listener standing in for the server the process would bind.
    fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
        let port = listener.local_addr().unwrap().port();

        (listener, port)
    }

    /// A port nobody listens on.
    fn closed_port() -> u16 {
        let (_, port) = listener();
        port
    }

    #[tokio::test]
    async fn start_resolves_when_listening() {
        let (_listener, port) = listener();

        let supervisor = Supervisor::start(process("sleep", &["30"], port)).await.unwrap();
        let handle = supervisor.handle();
        let status = handle.status();

        assert_eq!(status.lifecycle, Lifecycle::Running);
        assert!(status.pid.is_some());
        assert!(status.last_start.is_some());
        assert_eq!(status.generation, 1);
        assert_eq!(handle.running_generation(), Some(1));
        assert!(handle.ensure_running());

        supervisor.stop(Duration::from_secs(5)).await;

        assert_eq!(handle.status().lifecycle, Lifecycle::Stopped);
        assert!(!handle.ensure_running());
        assert!(handle.status().pid.is_none());
    }

    #[tokio::test]
    async fn stop_terminates_gracefully() {
        let (_listener, port) = listener();

        let supervisor = Supervisor::start(process("sleep", &["30"], port)).await.unwrap();

        let started = std::time::Instant::now();
        supervisor.stop(Duration::from_secs(10)).await;

        // sleep exits on SIGTERM, so the grace period is never used up.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn crashed_process_is_restarted() {
        let (_listener, port) = listener();

        let supervisor = Supervisor::start(process("sh", &["-c", "sleep 0.3; exit 1"], port))
            .await
            .unwrap();

        let handle = supervisor.handle();
        let mut status = handle.subscribe();

        let restarted = tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|status| status.is_running() && status.generation >= 2),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();

        assert!(restarted.restart_count >= 1);
        assert!(matches!(restarted.last_error, Some(SupervisorError::ProcessCrashed(_))));

        supervisor.stop(Duration::from_secs(1)).await;
    }

    /// Whether `pid` names a live process. Zombies waiting for a reaper count as dead.
    #[cfg(target_os = "linux")]
    fn is_alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat.contains(") Z "),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn descendants_of_crashed_runs_are_killed() {
        let (_listener, port) = listener();

        let pids = std::env::temp_dir().join(format!("gatehouse-descendants-{port}"));
        let _ = std::fs::remove_file(&pids);

        let script = format!("sleep 1001 & echo $! >> {}; sleep 0.3; exit 1", pids.display());
        let supervisor = Supervisor::start(process("sh", &["-c", &script], port))
            .await
            .unwrap();

        let mut status = supervisor.handle().subscribe();

        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|status| status.is_running() && status.generation >= 2),
        )
        .await
        .unwrap()
        .unwrap();

        supervisor.stop(Duration::from_secs(1)).await;

        let pids: Vec<u32> = std::fs::read_to_string(&pids)
            .unwrap()
            .lines()
            .map(|line| line.trim().parse().unwrap())
            .collect();

        // The first run crashed after forking, later runs may have been stopped before.
        assert!(!pids.is_empty());

        let mut survivors = pids.clone();

        for _ in 0..50 {
            survivors.retain(|pid| is_alive(*pid));

            if survivors.is_empty() {
                break;
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(survivors.is_empty(), "forked processes outlived their run: {survivors:?}");
    }

    #[tokio::test]
    async fn left_running_resolves_on_crash() {
        let (_listener, port) = listener();

        let supervisor = Supervisor::start(process("sh", &["-c", "sleep 0.3; exit 1"], port))
            .await
            .unwrap();

        let handle = supervisor.handle();
        let generation = handle.running_generation().unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle.left_running(generation))
            .await
            .unwrap();

        supervisor.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn exhausted_restarts_fail_start() {
        let port = closed_port();

        let result = Supervisor::start(process("sh", &["-c", "exit 3"], port)).await;

        let Err(SupervisorError::RestartsExhausted { restarts, last_error }) = result else {
            unreachable!("expected exhausted restarts");
        };

        assert_eq!(restarts, 3);
        assert!(matches!(*last_error, SupervisorError::ProcessStartFailed(_)));
    }

    #[tokio::test]
    async fn startup_deadline_without_restarts() {
        let port = closed_port();

        let mut config = process("sleep", &["30"], port);
        config.startup.timeout = Duration::from_millis(200);
        config.restart.enabled = false;

        let Err(SupervisorError::RestartsExhausted { restarts, last_error }) = Supervisor::start(config).await else {
            unreachable!("expected a startup failure");
        };

        assert_eq!(restarts, 0);
        assert!(last_error.to_string().contains("did not accept connections"));
    }

    #[tokio::test]
    async fn missing_executable_fails_start() {
        let mut config = process("/definitely/not/a/binary", &[], closed_port());
        config.restart.enabled = false;

        let Err(SupervisorError::RestartsExhausted { last_error, .. }) = Supervisor::start(config).await else {
            unreachable!("expected a launch failure");
        };

        assert!(last_error.to_string().contains("failed to launch"));
    }

    #[tokio::test]
    async fn port_is_exported_to_the_process() {
        let (_listener, port) = listener();

        let script = format!("test \"$PORT\" = \"{port}\" && exec sleep 30");
        let mut config = process("sh", &["-c", &script], port);
        config.port_env = Some("PORT".to_string());
        config.restart.enabled = false;

        // Without the variable the script exits immediately and start fails.
        let supervisor = Supervisor::start(config).await.unwrap();
        supervisor.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn wait_for_fatal_reports_exhaustion() {
        let (_listener, port) = listener();

        let mut config = process("sh", &["-c", "sleep 0.2; exit 1"], port);
        config.restart.max_restarts = 1;

        let supervisor = Supervisor::start(config).await.unwrap();

        let error = tokio::time::timeout(Duration::from_secs(5), supervisor.wait_for_fatal())
            .await
            .unwrap();

        assert!(matches!(error, SupervisorError::RestartsExhausted { restarts: 1, .. }));
        assert_eq!(supervisor.handle().status().lifecycle, Lifecycle::Stopped);
    }
}
