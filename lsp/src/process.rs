//! Process supervisor: spawns the language server and owns its lifecycle.
//!
//! State machine: `NotStarted → Running → Stopping → Stopped`.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::{BoxedWriter, Connection};
use crate::diagnostics::NotificationDispatcher;
use crate::error::LspError;
use crate::types::ServerConfig;

const STDERR_CHUNK_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

pub(crate) struct ServerProcess {
    state: ProcessState,
    cancel: CancellationToken,
    /// Fired only after the child is reaped, so stderr drains through the grace period.
    stderr_cancel: CancellationToken,
    grace_period: Duration,
    connection: Option<Arc<Connection>>,
    /// `None` for in-memory connections.
    child: Option<Child>,
    reader_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
    exit_status: Option<ExitStatus>,
}

impl ServerProcess {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            state: ProcessState::NotStarted,
            cancel: CancellationToken::new(),
            stderr_cancel: CancellationToken::new(),
            grace_period,
            connection: None,
            child: None,
            reader_task: None,
            stderr_task: None,
            exit_status: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// OS process id while the child is running.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Spawn `config.command` in `working_dir` and launch the reader and
    /// stderr-drain tasks.
    pub fn start(
        &mut self,
        config: &ServerConfig,
        working_dir: &Path,
        dispatcher: NotificationDispatcher,
    ) -> Result<Arc<Connection>, LspError> {
        self.ensure_not_started()?;

        let working_dir = std::path::absolute(working_dir).map_err(|e| {
            LspError::start(
                format!("resolving working directory {}", working_dir.display()),
                e,
            )
        })?;
        let resolved_cmd = which::which(&config.command).map_err(|e| {
            LspError::start(
                format!("{} not found in PATH", config.command),
                std::io::Error::new(std::io::ErrorKind::NotFound, e),
            )
        })?;

        let mut cmd = Command::new(&resolved_cmd);
        cmd.args(&config.args)
            .current_dir(&working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| LspError::start(format!("spawning {}", config.command), e))?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        tracing::info!(
            command = %config.command,
            pid = child.id(),
            cwd = %working_dir.display(),
            "Language server started"
        );

        let connection = Connection::new(Box::new(stdin), self.cancel.clone());
        self.reader_task = Some(connection.spawn_reader(stdout, dispatcher));
        self.stderr_task = Some(spawn_stderr_drain(stderr, self.stderr_cancel.clone()));
        self.child = Some(child);
        self.connection = Some(Arc::clone(&connection));
        self.state = ProcessState::Running;
        Ok(connection)
    }

    /// Run the protocol over caller-supplied streams instead of a child process.
    pub fn attach<R>(
        &mut self,
        reader: R,
        writer: BoxedWriter,
        dispatcher: NotificationDispatcher,
    ) -> Result<Arc<Connection>, LspError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.ensure_not_started()?;
        let connection = Connection::new(writer, self.cancel.clone());
        self.reader_task = Some(connection.spawn_reader(reader, dispatcher));
        self.connection = Some(Arc::clone(&connection));
        self.state = ProcessState::Running;
        Ok(connection)
    }

    fn ensure_not_started(&self) -> Result<(), LspError> {
        if self.state == ProcessState::NotStarted {
            return Ok(());
        }
        Err(LspError::start(
            "language server already started",
            std::io::Error::from(std::io::ErrorKind::AlreadyExists),
        ))
    }

    /// Process-level stop. Safe to call repeatedly.
    ///
    /// Fires cancellation, closes stdin, interrupts the child, and kills it
    /// if it has not exited within the grace period. Returns only after both
    /// background tasks have finished. Stderr keeps draining until the child
    /// has been reaped.
    pub async fn stop(&mut self) -> Option<ExitStatus> {
        match self.state {
            ProcessState::NotStarted => {
                self.state = ProcessState::Stopped;
                return None;
            }
            ProcessState::Stopping | ProcessState::Stopped => return self.exit_status,
            ProcessState::Running => {}
        }
        self.state = ProcessState::Stopping;

        self.cancel.cancel();
        if let Some(connection) = &self.connection {
            connection.close_input().await;
        }
        if let Some(child) = self.child.as_mut() {
            self.exit_status = terminate_child(child, self.grace_period).await;
        }
        self.stderr_cancel.cancel();

        for task in [self.reader_task.take(), self.stderr_task.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = task.await {
                tracing::warn!("LSP background task failed: {e}");
            }
        }

        self.state = ProcessState::Stopped;
        tracing::info!(status = ?self.exit_status, "Language server stopped");
        self.exit_status
    }
}

fn missing_pipe(name: &str) -> LspError {
    LspError::start(
        format!("no {name} from child"),
        std::io::Error::from(std::io::ErrorKind::BrokenPipe),
    )
}

/// Interrupt, wait up to `grace_period`, then kill.
async fn terminate_child(child: &mut Child, grace_period: Duration) -> Option<ExitStatus> {
    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!(?status, "Language server already exited");
            return Some(status);
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Failed to check language server status: {e}"),
    }

    send_interrupt(child);

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::warn!("Failed to wait for language server: {e}");
            None
        }
        Err(_) => {
            tracing::debug!("Language server didn't exit in time, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill language server: {e}");
            }
            child.wait().await.ok()
        }
    }
}

#[cfg(unix)]
fn send_interrupt(child: &Child) {
    let Some(pid) = child.id() else { return };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: `pid` belongs to a child we have not reaped yet.
    if unsafe { libc::kill(pid, libc::SIGINT) } == -1 {
        tracing::debug!(
            "Failed to interrupt language server: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn send_interrupt(_child: &Child) {
    // No console interrupt for detached children; the grace period decides.
}

/// Drain stderr so the server never blocks on a full pipe.
fn spawn_stderr_drain<R>(mut stderr: R, cancel: CancellationToken) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; STDERR_CHUNK_BYTES];
        loop {
            let read = tokio::select! {
                () = cancel.cancelled() => break,
                read = stderr.read(&mut buf) => read,
            };
            match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tracing::trace!(
                        "language server stderr: {}",
                        String::from_utf8_lossy(&buf[..n]).trim_end()
                    );
                }
            }
        }
    })
}
