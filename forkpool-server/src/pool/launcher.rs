use async_trait::async_trait;
use std::{
    ffi::OsString,
    fmt, io,
    path::PathBuf,
    process::{ExitStatus, Stdio},
};
use tokio::process::{Child, Command};

use crate::worker::{WORKER_INDEX_ENV, WORKER_PORT_ENV};

/// What a launcher needs to start the worker for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSpec {
    pub index: usize,
    pub port: u16,
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub description: String,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            description: status.to_string(),
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// A running worker owned by the supervisor.
///
/// `wait` must be cancel safe: the supervisor races it against shutdown and
/// its stability timer.
#[async_trait]
pub trait WorkerHandle: Send + fmt::Debug {
    fn pid(&self) -> Option<u32>;

    async fn wait(&mut self) -> io::Result<WorkerExit>;

    /// Stops the worker and reaps it. A worker that already exited is fine.
    async fn kill(&mut self) -> io::Result<()>;
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync + fmt::Debug {
    async fn launch(&self, spec: WorkerSpec)
    -> io::Result<Box<dyn WorkerHandle>>;
}

/// Starts workers as child processes of a given program, usually the
/// current executable re-run in worker mode.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Re-executes this binary with the arguments it was started with.
    pub fn current_exe() -> io::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program).args(std::env::args_os().skip(1)))
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self, spec: WorkerSpec) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(WORKER_PORT_ENV, spec.port.to_string())
            .env(WORKER_INDEX_ENV, spec.index.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        spec: WorkerSpec,
    ) -> io::Result<Box<dyn WorkerHandle>> {
        let child = self.command(spec).spawn()?;
        Ok(Box::new(ChildHandle { child }))
    }
}

#[derive(Debug)]
struct ChildHandle {
    child: Child,
}

#[async_trait]
impl WorkerHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<WorkerExit> {
        self.child.wait().await.map(WorkerExit::from)
    }

    async fn kill(&mut self) -> io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn launched_process_sees_worker_env() {
        let launcher = ProcessLauncher::new("/bin/sh").args([
            "-c",
            r#"test "$WORKER_PORT" = 4002 && test "$WORKER_INDEX" = 1"#,
        ]);

        let mut handle = launcher
            .launch(WorkerSpec { index: 1, port: 4002 })
            .await
            .unwrap();
        assert!(handle.pid().is_some());

        let exit = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(exit.success(), "unexpected exit: {exit}");
    }

    #[tokio::test]
    async fn kill_stops_a_running_worker() {
        let launcher = ProcessLauncher::new("/bin/sh").args(["-c", "sleep 30"]);
        let mut handle = launcher
            .launch(WorkerSpec { index: 0, port: 4001 })
            .await
            .unwrap();

        handle.kill().await.unwrap();
        // already reaped: a second kill is a no-op
        handle.kill().await.unwrap();
    }

    /// Covers a primary that unwinds without reaching its explicit kill.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropping_the_handle_kills_the_worker() {
        let launcher =
            ProcessLauncher::new("/bin/sh").args(["-c", "exec sleep 30"]);
        let handle = launcher
            .launch(WorkerSpec { index: 0, port: 4001 })
            .await
            .unwrap();
        let pid = handle.pid().unwrap();
        drop(handle);

        let stat = format!("/proc/{pid}/stat");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let running = match std::fs::read_to_string(&stat) {
                // state is the field after the parenthesised command name
                Ok(raw) => raw
                    .rsplit_once(')')
                    .is_some_and(|(_, rest)| !rest.trim_start().starts_with('Z')),
                Err(_) => false,
            };
            if !running {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "worker {pid} outlived its handle"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn missing_program_fails_to_launch() {
        let launcher = ProcessLauncher::new("/definitely/not/a/binary");
        let result = launcher.launch(WorkerSpec { index: 0, port: 4001 }).await;
        assert!(result.is_err());
    }
}
