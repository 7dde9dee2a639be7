use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use super::{
    launcher::{WorkerHandle, WorkerLauncher, WorkerSpec},
    restart::{RestartDecision, RestartPolicy, RestartTracker},
    table::PortTable,
};
use crate::infra::shutdown::ShutdownHandle;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("worker pool must contain at least one worker")]
    EmptyPool,
    #[error("base port {base_port} cannot fit {workers} worker ports")]
    PortOverflow { base_port: u16, workers: usize },
}

/// Keeps one worker process running per slot of a [`PortTable`].
#[derive(Debug)]
pub struct Supervisor {
    table: Arc<PortTable>,
    launcher: Arc<dyn WorkerLauncher>,
    policy: RestartPolicy,
}

impl Supervisor {
    pub fn new(
        table: Arc<PortTable>,
        launcher: Arc<dyn WorkerLauncher>,
        policy: RestartPolicy,
    ) -> Result<Self, SupervisorError> {
        if table.is_empty() {
            return Err(SupervisorError::EmptyPool);
        }
        Ok(Self {
            table,
            launcher,
            policy,
        })
    }

    /// Builds the table for `workers` slots above `base_port`.
    pub fn for_base_port(
        base_port: u16,
        workers: usize,
        launcher: Arc<dyn WorkerLauncher>,
        policy: RestartPolicy,
    ) -> Result<Self, SupervisorError> {
        let table = PortTable::new(base_port, workers)
            .ok_or(SupervisorError::PortOverflow { base_port, workers })?;
        Self::new(Arc::new(table), launcher, policy)
    }

    pub fn table(&self) -> &Arc<PortTable> {
        &self.table
    }

    /// Spawns one supervision task per slot. Workers stop when `shutdown`
    /// triggers or [`SupervisorHandle::shutdown`] is called.
    pub fn start(self, shutdown: ShutdownHandle) -> SupervisorHandle {
        let tasks = (0..self.table.len())
            .map(|index| {
                let slot = SlotSupervisor {
                    index,
                    table: Arc::clone(&self.table),
                    launcher: Arc::clone(&self.launcher),
                    tracker: RestartTracker::new(self.policy.clone()),
                    shutdown_rx: shutdown.subscribe(),
                };
                tokio::spawn(slot.run())
            })
            .collect();

        info!(workers = self.table.len(), ports = ?self.table.ports(), "worker pool started");

        SupervisorHandle {
            table: self.table,
            shutdown,
            tasks,
        }
    }
}

#[derive(Debug)]
pub struct SupervisorHandle {
    table: Arc<PortTable>,
    shutdown: ShutdownHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl SupervisorHandle {
    pub fn table(&self) -> &Arc<PortTable> {
        &self.table
    }

    /// Waits until every slot reports alive, or the timeout elapses.
    pub async fn wait_until_full(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.table.alive_count() == self.table.len() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Kills every worker and waits for the slot tasks to finish.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "supervisor task failed");
            }
        }
        info!("worker pool stopped");
    }
}

struct SlotSupervisor {
    index: usize,
    table: Arc<PortTable>,
    launcher: Arc<dyn WorkerLauncher>,
    tracker: RestartTracker,
    shutdown_rx: watch::Receiver<bool>,
}

enum SlotRun {
    Exited(Duration),
    Shutdown,
}

impl SlotSupervisor {
    async fn run(mut self) {
        let Some(port) = self.table.port(self.index) else {
            return;
        };
        let spec = WorkerSpec {
            index: self.index,
            port,
        };

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            self.tracker.begin_attempt();
            self.publish_restart_state();

            let launched = self.launcher.launch(spec).await;
            let uptime = match launched {
                Ok(handle) => match self.watch_worker(spec, handle).await {
                    SlotRun::Exited(uptime) => uptime,
                    SlotRun::Shutdown => break,
                },
                Err(err) => {
                    error!(
                        worker.index = spec.index,
                        worker.port = spec.port,
                        error = %err,
                        "failed to spawn worker"
                    );
                    Duration::ZERO
                }
            };

            let decision = self.tracker.record_exit(uptime);
            self.publish_restart_state();

            let delay = decision.delay();
            match decision {
                RestartDecision::CircuitOpen(cooldown) => warn!(
                    worker.index = spec.index,
                    failures = self.tracker.consecutive_failures(),
                    ?cooldown,
                    "worker keeps crashing; restart circuit open"
                ),
                RestartDecision::Respawn(delay) if !delay.is_zero() => debug!(
                    worker.index = spec.index,
                    ?delay,
                    "backing off before respawn"
                ),
                RestartDecision::Respawn(_) => {}
            }

            if !delay.is_zero() {
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = self.shutdown_rx.changed() => break,
                }
            }
        }

        debug!(worker.index = self.index, "slot supervisor stopped");
    }

    async fn watch_worker(
        &mut self,
        spec: WorkerSpec,
        mut handle: Box<dyn WorkerHandle>,
    ) -> SlotRun {
        let started = Instant::now();
        let pid = handle.pid();
        self.table.mark_spawned(spec.index, pid);
        info!(
            worker.index = spec.index,
            worker.port = spec.port,
            pid = ?pid,
            "worker spawned"
        );

        let stable_timer = sleep(self.tracker.policy().stable_after);
        tokio::pin!(stable_timer);
        let mut stable = false;

        let exit = loop {
            tokio::select! {
                result = handle.wait() => break Some(result),
                _ = &mut stable_timer, if !stable => {
                    stable = true;
                    self.tracker.mark_stable();
                    self.publish_restart_state();
                }
                _ = self.shutdown_rx.changed() => break None,
            }
        };

        self.table.mark_exited(spec.index);

        match exit {
            Some(Ok(status)) => {
                warn!(
                    worker.index = spec.index,
                    worker.port = spec.port,
                    pid = ?pid,
                    status = %status,
                    "worker exited; respawning"
                );
                SlotRun::Exited(started.elapsed())
            }
            Some(Err(err)) => {
                error!(
                    worker.index = spec.index,
                    pid = ?pid,
                    error = %err,
                    "failed to wait on worker; respawning"
                );
                SlotRun::Exited(started.elapsed())
            }
            None => {
                if let Err(err) = handle.kill().await {
                    warn!(worker.index = spec.index, pid = ?pid, error = %err, "failed to kill worker");
                } else {
                    debug!(worker.index = spec.index, pid = ?pid, "worker stopped");
                }
                SlotRun::Shutdown
            }
        }
    }

    fn publish_restart_state(&self) {
        self.table.record_restart_state(
            self.index,
            self.tracker.consecutive_failures(),
            self.tracker.circuit(),
        );
    }
}
