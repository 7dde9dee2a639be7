use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use forkpool_config::default_pool_size;
use forkpool_server::{
    infra::shutdown::ShutdownHandle,
    pool::{
        CircuitState, PortTable, RestartPolicy, Supervisor, WorkerExit,
        WorkerHandle, WorkerLauncher, WorkerSpec,
    },
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Launcher whose workers run until the test crashes them.
#[derive(Debug, Default)]
struct FakeLauncher {
    launches: Mutex<Vec<WorkerSpec>>,
    running: Mutex<HashMap<usize, oneshot::Sender<WorkerExit>>>,
    failures_left: AtomicUsize,
    next_pid: AtomicU32,
    killed: Arc<AtomicUsize>,
}

impl FakeLauncher {
    fn failing(times: usize) -> Self {
        let launcher = Self::default();
        launcher.failures_left.store(times, Ordering::SeqCst);
        launcher
    }

    fn crash(&self, index: usize) -> bool {
        let Some(tx) = self.running.lock().remove(&index) else {
            return false;
        };
        tx.send(WorkerExit {
            code: Some(1),
            description: "exit status: 1".into(),
        })
        .is_ok()
    }

    fn launches_for(&self, index: usize) -> usize {
        self.launches
            .lock()
            .iter()
            .filter(|spec| spec.index == index)
            .count()
    }

    fn total_launches(&self) -> usize {
        self.launches.lock().len()
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(
        &self,
        spec: WorkerSpec,
    ) -> io::Result<Box<dyn WorkerHandle>> {
        self.launches.lock().push(spec);

        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if should_fail {
            return Err(io::Error::other("spawn refused"));
        }

        let (tx, rx) = oneshot::channel();
        self.running.lock().insert(spec.index, tx);
        Ok(Box::new(FakeHandle {
            pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            exit: rx,
            killed: Arc::clone(&self.killed),
        }))
    }
}

#[derive(Debug)]
struct FakeHandle {
    pid: u32,
    exit: oneshot::Receiver<WorkerExit>,
    killed: Arc<AtomicUsize>,
}

#[async_trait]
impl WorkerHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> io::Result<WorkerExit> {
        match (&mut self.exit).await {
            Ok(exit) => Ok(exit),
            Err(_) => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.killed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn fast_policy() -> RestartPolicy {
    RestartPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        multiplier: 2.0,
        failure_threshold: 5,
        stable_after: Duration::from_secs(10),
        cooldown: Duration::from_millis(100),
    }
}

async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

#[tokio::test]
async fn pool_reaches_full_strength_on_fixed_ports() {
    let launcher = Arc::new(FakeLauncher::default());
    let supervisor = Supervisor::for_base_port(
        4000,
        3,
        launcher.clone(),
        fast_policy(),
    )
    .unwrap();
    let handle = supervisor.start(ShutdownHandle::new());

    assert!(handle.wait_until_full(Duration::from_secs(2)).await);
    let table = Arc::clone(handle.table());
    assert_eq!(table.ports(), vec![4001, 4002, 4003]);
    assert_eq!(table.alive_count(), 3);
    assert_eq!(launcher.total_launches(), 3);

    handle.shutdown().await;
}

#[tokio::test]
async fn pool_size_follows_core_count() {
    let workers = default_pool_size(forkpool_config::host_core_count());
    let launcher = Arc::new(FakeLauncher::default());
    let supervisor =
        Supervisor::for_base_port(20_000, workers, launcher, fast_policy())
            .unwrap();
    let handle = supervisor.start(ShutdownHandle::new());

    assert!(handle.wait_until_full(Duration::from_secs(2)).await);
    assert_eq!(handle.table().alive_count(), workers.max(1));

    let ports = handle.table().ports();
    let unique: HashSet<u16> = ports.iter().copied().collect();
    assert_eq!(unique.len(), ports.len());
    for (index, port) in ports.iter().enumerate() {
        assert_eq!(usize::from(*port), 20_000 + 1 + index);
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn crashed_worker_is_replaced_on_same_port() {
    let launcher = Arc::new(FakeLauncher::default());
    let supervisor =
        Supervisor::for_base_port(4000, 2, launcher.clone(), fast_policy())
            .unwrap();
    let handle = supervisor.start(ShutdownHandle::new());
    assert!(handle.wait_until_full(Duration::from_secs(2)).await);

    let table = Arc::clone(handle.table());
    let old_pid = table.slot(1).unwrap().pid();
    assert!(launcher.crash(1));

    assert!(
        eventually(Duration::from_secs(2), || {
            launcher.launches_for(1) == 2 && table.is_alive(1)
        })
        .await,
        "worker 1 was not respawned"
    );

    let slot = table.slot(1).unwrap();
    assert_eq!(slot.port(), 4002);
    assert_eq!(slot.spawns(), 2);
    assert_ne!(slot.pid(), old_pid);
    assert_eq!(launcher.launches_for(0), 1);
    assert_eq!(table.alive_count(), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn spawn_failures_back_off_and_recover() {
    let launcher = Arc::new(FakeLauncher::failing(2));
    let supervisor =
        Supervisor::for_base_port(4000, 1, launcher.clone(), fast_policy())
            .unwrap();
    let handle = supervisor.start(ShutdownHandle::new());

    assert!(handle.wait_until_full(Duration::from_secs(2)).await);
    assert_eq!(launcher.launches_for(0), 3);

    let snapshot = handle.table().snapshot();
    assert_eq!(snapshot.workers[0].consecutive_failures, 2);
    assert_eq!(snapshot.workers[0].circuit, CircuitState::Closed);

    handle.shutdown().await;
}

#[tokio::test]
async fn repeated_crashes_open_the_circuit_then_recover() {
    let launcher = Arc::new(FakeLauncher::failing(2));
    let policy = RestartPolicy {
        failure_threshold: 2,
        cooldown: Duration::from_millis(300),
        stable_after: Duration::from_millis(50),
        ..fast_policy()
    };
    let supervisor =
        Supervisor::for_base_port(4000, 1, launcher.clone(), policy).unwrap();
    let handle = supervisor.start(ShutdownHandle::new());
    let table = Arc::clone(handle.table());

    assert!(
        eventually(Duration::from_secs(1), || {
            table.snapshot().workers[0].circuit == CircuitState::Open
        })
        .await
    );
    assert!(!table.is_alive(0));

    assert!(handle.wait_until_full(Duration::from_secs(2)).await);
    assert!(
        eventually(Duration::from_secs(1), || {
            let slot = &table.snapshot().workers[0];
            slot.circuit == CircuitState::Closed && slot.consecutive_failures == 0
        })
        .await,
        "stable worker should close the circuit"
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_kills_every_worker() {
    let launcher = Arc::new(FakeLauncher::default());
    let supervisor =
        Supervisor::for_base_port(4000, 3, launcher.clone(), fast_policy())
            .unwrap();
    let handle = supervisor.start(ShutdownHandle::new());
    assert!(handle.wait_until_full(Duration::from_secs(2)).await);

    let table = Arc::clone(handle.table());
    handle.shutdown().await;

    assert_eq!(launcher.killed.load(Ordering::SeqCst), 3);
    assert_eq!(table.alive_count(), 0);
    assert_eq!(launcher.total_launches(), 3);
}

#[tokio::test]
async fn external_shutdown_signal_stops_the_pool() {
    let launcher = Arc::new(FakeLauncher::default());
    let shutdown = ShutdownHandle::new();
    let supervisor =
        Supervisor::for_base_port(4000, 2, launcher.clone(), fast_policy())
            .unwrap();
    let handle = supervisor.start(shutdown.clone());
    assert!(handle.wait_until_full(Duration::from_secs(2)).await);

    shutdown.trigger();
    let table = Arc::clone(handle.table());
    assert!(
        eventually(Duration::from_secs(2), || table.alive_count() == 0).await
    );
    assert_eq!(launcher.killed.load(Ordering::SeqCst), 2);
    handle.shutdown().await;
}

#[test]
fn empty_or_overflowing_pools_are_rejected() {
    let launcher: Arc<dyn WorkerLauncher> = Arc::new(FakeLauncher::default());
    assert!(
        Supervisor::new(
            Arc::new(PortTable::from_ports(Vec::<u16>::new())),
            launcher.clone(),
            fast_policy()
        )
        .is_err()
    );
    assert!(
        Supervisor::for_base_port(u16::MAX, 1, launcher, fast_policy()).is_err()
    );
}

#[cfg(unix)]
#[tokio::test]
async fn killed_process_is_respawned_with_same_port() {
    use forkpool_server::pool::ProcessLauncher;

    let launcher = ProcessLauncher::new("/bin/sh").args(["-c", "sleep 30"]);
    let supervisor =
        Supervisor::for_base_port(4000, 2, Arc::new(launcher), fast_policy())
            .unwrap();
    let handle = supervisor.start(ShutdownHandle::new());
    assert!(handle.wait_until_full(Duration::from_secs(5)).await);

    let table = Arc::clone(handle.table());
    let victim = table.slot(0).unwrap().pid().expect("worker has a pid");
    let status = std::process::Command::new("kill")
        .args(["-9", &victim.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    assert!(
        eventually(Duration::from_secs(5), || {
            let slot = table.slot(0).unwrap();
            slot.spawns() == 2 && slot.is_alive()
        })
        .await,
        "killed worker was not replaced"
    );
    let slot = table.slot(0).unwrap();
    assert_eq!(slot.port(), 4001);
    assert_ne!(slot.pid(), Some(victim));
    assert_eq!(table.alive_count(), 2);

    handle.shutdown().await;
    assert_eq!(table.alive_count(), 0);
}
