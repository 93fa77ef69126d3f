//! The control task. It is the only owner of the child process and the only writer
//! of the published status.

use std::{process::ExitStatus, time::Duration};

use config::ProcessConfig;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};

use crate::{
    Lifecycle, ProcessStatus, SupervisorError, backoff,
    process::{self, kill_group, terminate},
};

pub(crate) struct Controller {
    config: ProcessConfig,
    status: watch::Sender<ProcessStatus>,
    stop: mpsc::Receiver<Duration>,
}

enum RunOutcome {
    /// Shutdown was requested and the process is gone.
    Stopped,
    /// The run ended on its own.
    Failed { error: SupervisorError, uptime: Duration },
}

enum StartupEvent {
    Stop(Duration),
    Exited(std::io::Result<ExitStatus>),
    Ready(Result<(), SupervisorError>),
}

enum RunningEvent {
    Stop(Duration),
    Exited(std::io::Result<ExitStatus>),
}

impl Controller {
    pub(crate) fn new(config: ProcessConfig, status: watch::Sender<ProcessStatus>, stop: mpsc::Receiver<Duration>) -> Self {
        Self { config, status, stop }
    }

    pub(crate) async fn run(mut self) {
        let mut consecutive_failures = 0u32;

        loop {
            let (error, uptime) = match self.run_once().await {
                RunOutcome::Stopped => {
                    self.publish(|status| {
                        status.lifecycle = Lifecycle::Stopped;
                        status.pid = None;
                    });

                    log::info!("Process stopped");
                    return;
                }
                RunOutcome::Failed { error, uptime } => (error, uptime),
            };

            let restart = &self.config.restart;

            if uptime >= restart.reset_after {
                consecutive_failures = 0;
            }

            consecutive_failures += 1;

            log::error!("{error}");

            self.publish(|status| {
                status.lifecycle = Lifecycle::Crashed;
                status.pid = None;
                status.last_error = Some(error.clone());
            });

            if !restart.enabled || consecutive_failures > restart.max_restarts {
                let restarts = self.status.borrow().restart_count;

                let fatal = SupervisorError::RestartsExhausted {
                    restarts,
                    last_error: Box::new(error),
                };

                log::error!("{fatal}");

                self.publish(|status| {
                    status.lifecycle = Lifecycle::Stopped;
                    status.last_error = Some(fatal);
                });

                return;
            }

            let delay = backoff::restart_delay(restart, consecutive_failures);
            log::info!("Restarting process in {delay:?} (attempt {consecutive_failures})");

            let stopped = tokio::select! {
                _ = self.stop.recv() => true,
                _ = tokio::time::sleep(delay) => false,
            };

            if stopped {
                self.publish(|status| status.lifecycle = Lifecycle::Stopped);
                log::info!("Process stopped");
                return;
            }

            self.publish(|status| status.restart_count += 1);
        }
    }

    async fn run_once(&mut self) -> RunOutcome {
        let address = self.config.address();

        self.publish(|status| {
            status.lifecycle = Lifecycle::Starting;
            status.last_start = Some(jiff::Timestamp::now());
        });

        let mut child = match process::spawn(&self.config) {
            Ok(child) => child,
            Err(error) => {
                return RunOutcome::Failed {
                    error,
                    uptime: Duration::ZERO,
                };
            }
        };

        let started = Instant::now();
        let pid = child.id();

        log::info!(
            "Launched {} with pid {}",
            self.config.executable.display(),
            pid.map(|pid| pid.to_string()).unwrap_or_default()
        );

        self.publish(|status| status.pid = pid);

        let event = tokio::select! {
            grace = self.stop.recv() => StartupEvent::Stop(grace.unwrap_or_default()),
            exit = child.wait() => StartupEvent::Exited(exit),
            ready = process::wait_until_listening(address, &self.config.startup) => StartupEvent::Ready(ready),
        };

        match event {
            StartupEvent::Stop(grace) => {
                terminate(&mut child, grace).await;
                return RunOutcome::Stopped;
            }
            StartupEvent::Exited(exit) => {
                kill_group(pid);

                return RunOutcome::Failed {
                    error: SupervisorError::ProcessStartFailed(format!(
                        "process exited before listening on {address}: {}",
                        describe_exit(exit)
                    )),
                    uptime: started.elapsed(),
                };
            }
            StartupEvent::Ready(Err(error)) => {
                terminate(&mut child, Duration::ZERO).await;

                return RunOutcome::Failed {
                    error,
                    uptime: started.elapsed(),
                };
            }
            StartupEvent::Ready(Ok(())) => (),
        }

        self.publish(|status| {
            status.lifecycle = Lifecycle::Running;
            status.generation += 1;
        });

        log::info!("Process is listening on {address}");

        let event = tokio::select! {
            grace = self.stop.recv() => RunningEvent::Stop(grace.unwrap_or_default()),
            exit = child.wait() => RunningEvent::Exited(exit),
        };

        match event {
            RunningEvent::Stop(grace) => {
                terminate(&mut child, grace).await;
                RunOutcome::Stopped
            }
            RunningEvent::Exited(exit) => {
                kill_group(pid);

                RunOutcome::Failed {
                    error: SupervisorError::ProcessCrashed(describe_exit(exit)),
                    uptime: started.elapsed(),
                }
            }
        }
    }

    fn publish(&self, modify: impl FnOnce(&mut ProcessStatus)) {
        self.status.send_modify(modify);
    }
}

fn describe_exit(exit: std::io::Result<ExitStatus>) -> String {
    match exit {
        Ok(status) => status.to_string(),
        Err(err) => format!("failed to wait for process: {err}"),
    }
}
