//! Backend server process management
//!
//! Spawns and supervises the per-root analysis server subprocess and runs
//! single-shot command invocations against it. Commands communicate server
//! health through their exit codes; the supervisor folds those into the
//! status channel and reacts to `NotRunning` by starting the server.
//!
//! There is deliberately no timeout on invocations: the backend is trusted
//! to exit. Hosts that cannot afford that trust must wrap calls themselves.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::config::SupervisorConfig;
use crate::status::{ServerStatus, StatusChannel, StatusEvent, StatusSubscription};
use crate::supervisor::{exit_codes, retry};
use crate::{Error, Result};

/// Options for a single command invocation
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Content piped to the backend's stdin (e.g. unsaved buffer contents
    /// for check-contents style commands)
    pub stdin: Option<String>,
}

/// Output of a completed backend command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Decode the backend's JSON answer from stdout
    pub fn parse_stdout<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.stdout).map_err(Error::from)
    }
}

/// Handle to the currently owned server subprocess
struct ServerHandle {
    pid: Option<u32>,
    /// Tells the monitor task to kill the child; consumed by the one kill
    kill_tx: oneshot::Sender<()>,
    generation: u64,
}

#[derive(Default)]
struct ServerSlot {
    handle: Option<ServerHandle>,
    /// Set while a start is in flight so overlapping not-running
    /// observations cannot spawn a second server
    starting: bool,
    generation: u64,
}

/// Supervises the analysis server for one project root.
///
/// Cheap to clone; all clones share the same supervisor state.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

pub(crate) struct SupervisorInner {
    root: PathBuf,
    pub(crate) config: SupervisorConfig,
    status: StatusChannel,
    server: Mutex<ServerSlot>,
    disposed: AtomicBool,
    /// Restart-on-not-running subscription; dropped on dispose
    restart_sub: Mutex<Option<StatusSubscription>>,
}

impl ProcessSupervisor {
    /// Create a supervisor for the given project root.
    ///
    /// No process is spawned yet; the server starts on the first command
    /// that reports `NotRunning`.
    pub fn new(root: impl Into<PathBuf>, config: SupervisorConfig) -> Self {
        let inner = Arc::new(SupervisorInner {
            root: root.into(),
            config,
            status: StatusChannel::new(),
            server: Mutex::new(ServerSlot::default()),
            disposed: AtomicBool::new(false),
            restart_sub: Mutex::new(None),
        });

        // Every transition into NotRunning re-arms a server start. The
        // callback holds a weak reference so the subscription does not keep
        // the supervisor alive.
        let weak = Arc::downgrade(&inner);
        let subscription = inner.status.subscribe(move |event| {
            if let StatusEvent::Changed(ServerStatus::NotRunning) = event {
                if let Some(inner) = weak.upgrade() {
                    SupervisorInner::spawn_server_if_idle(inner);
                }
            }
        });
        *inner.restart_sub.lock() = Some(subscription);

        Self { inner }
    }

    /// The project root this supervisor serves
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// The current server status
    pub fn status(&self) -> ServerStatus {
        self.inner.status.current()
    }

    /// Subscribe to status updates; the current value is replayed
    /// immediately and the handler is dropped with the returned guard
    pub fn subscribe_status<F>(&self, handler: F) -> StatusSubscription
    where
        F: Fn(StatusEvent) + Send + Sync + 'static,
    {
        self.inner.status.subscribe(handler)
    }

    /// Whether `dispose` has been called
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Pid of the currently owned server subprocess, if one is running
    pub fn server_pid(&self) -> Option<u32> {
        self.inner.server.lock().handle.as_ref().and_then(|h| h.pid)
    }

    /// Run a backend command against this root, retrying while the server
    /// looks not-ready-yet.
    ///
    /// Returns `Ok(None)` without touching the process when the backend is
    /// not installed or the supervisor is failed/disposed; callers treat
    /// `None` as "feature unavailable". `file` is appended to the argument
    /// list as the target of the command.
    pub async fn execute_command(
        &self,
        args: &[String],
        file: Option<&Path>,
        options: &ExecOptions,
        log_errors: bool,
    ) -> Result<Option<CommandOutput>> {
        self.inner.execute_command(args, file, options, log_errors).await
    }

    /// Tear the supervisor down: stop reacting to status changes, complete
    /// the status channel, and hard-kill the owned server. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Disposing supervisor for {:?}", self.inner.root);
        self.inner.restart_sub.lock().take();
        self.inner.status.complete();
        self.inner.kill_server();
    }
}

impl SupervisorInner {
    pub(crate) async fn execute_command(
        &self,
        args: &[String],
        file: Option<&Path>,
        options: &ExecOptions,
        log_errors: bool,
    ) -> Result<Option<CommandOutput>> {
        // Fatal fast-path: a crashed or disposed supervisor never spawns
        // another process for this root.
        if self.disposed.load(Ordering::SeqCst) || self.status.current() == ServerStatus::Failed {
            tracing::debug!(
                "Supervisor for {:?} is failed or disposed; skipping command {:?}",
                self.root,
                args.first()
            );
            return Ok(None);
        }

        let mut full_args: Vec<String> = args.to_vec();
        if let Some(file) = file {
            full_args.push(file.display().to_string());
        }

        retry::exec_with_retries(self, &full_args, options, log_errors).await
    }

    /// Run one non-retrying backend invocation and fold its exit code into
    /// the status channel.
    ///
    /// `Ok(None)` means the backend executable is not installed. Failures
    /// carry the status derived from this invocation's own exit code, so the
    /// retry decision never reads a value a concurrent call may have
    /// overwritten.
    pub(crate) async fn raw_exec(
        &self,
        args: &[String],
        options: &ExecOptions,
    ) -> Result<Option<CommandOutput>> {
        let Some(program) = self.config.resolve_program() else {
            tracing::warn!(
                "Backend {:?} is not installed; command unavailable for {:?}",
                self.config.program,
                self.root
            );
            self.status.set_status(ServerStatus::NotInstalled);
            return Ok(None);
        };

        let mut command = Command::new(&program);
        command
            .args(args)
            // A one-shot invocation must never bring up its own server
            // behind the supervisor's back.
            .arg("--no-auto-start")
            .arg(format!("--from={}", self.config.client_name))
            .current_dir(&self.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.stdin(if options.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to invoke backend {:?}: {}", program, e);
                self.status.set_status(ServerStatus::Unknown);
                return Err(e.into());
            }
        };

        if let Some(input) = &options.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // A fast-exiting backend may close stdin before reading it;
                // the exit code still tells us everything we need.
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!("Backend did not consume stdin: {}", e);
                }
                let _ = stdin.shutdown().await;
            }
        }

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Failed to wait for backend {:?}: {}", program, e);
                self.status.set_status(ServerStatus::Unknown);
                return Err(e.into());
            }
        };

        let code = output.status.code();
        if code == Some(exit_codes::BUILD_ID_MISMATCH) {
            // The server shut itself down over a version skew; the
            // not-running status below gets a fresh one started.
            tracing::info!(
                "Analysis server for {:?} is from a different build and has exited",
                self.root
            );
        }
        let status = exit_codes::classify(code);
        if status == ServerStatus::Unknown {
            tracing::error!(
                "Backend command for {:?} exited with unexpected code {:?}",
                self.root,
                code
            );
        }
        self.status.set_status(status);

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if status == ServerStatus::Ready {
            Ok(Some(CommandOutput {
                exit_code: code.unwrap_or(exit_codes::OK),
                stdout,
                stderr,
            }))
        } else {
            Err(Error::CommandFailed {
                code,
                status,
                stderr,
            })
        }
    }

    /// Start the server unless one is already owned or starting
    fn spawn_server_if_idle(inner: Arc<SupervisorInner>) {
        if inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut slot = inner.server.lock();
            if slot.starting || slot.handle.is_some() {
                return;
            }
            slot.starting = true;
        }
        tokio::spawn(async move {
            if let Err(e) = SupervisorInner::spawn_server(&inner).await {
                tracing::error!(
                    "Failed to start analysis server for {:?}: {}",
                    inner.root,
                    e
                );
            }
            inner.server.lock().starting = false;
        });
    }

    /// Spawn the server process and register its monitor task.
    ///
    /// Callers must hold the `starting` guard.
    async fn spawn_server(inner: &Arc<SupervisorInner>) -> Result<()> {
        let Some(program) = inner.config.resolve_program() else {
            tracing::warn!(
                "Backend {:?} is not installed; cannot start server for {:?}",
                inner.config.program,
                inner.root
            );
            inner.status.set_status(ServerStatus::NotInstalled);
            return Ok(());
        };

        tracing::info!(
            "Starting analysis server for {:?} from {:?}",
            inner.root,
            program
        );

        let mut child = Command::new(&program)
            .arg("server")
            .arg(&inner.root)
            .current_dir(&inner.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Server output goes to the log, best-effort.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout", inner.root.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr", inner.root.clone()));
        }

        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        let generation = {
            let mut slot = inner.server.lock();
            slot.generation += 1;
            slot.handle = Some(ServerHandle {
                pid,
                kill_tx,
                generation: slot.generation,
            });
            slot.generation
        };

        tokio::spawn(SupervisorInner::monitor_server(
            inner.clone(),
            child,
            kill_rx,
            generation,
        ));

        // Disposal may have raced the spawn; never leave an orphan behind.
        if inner.disposed.load(Ordering::SeqCst) {
            inner.kill_server();
        }

        Ok(())
    }

    /// Wait for the server to exit, or kill it when told to
    async fn monitor_server(
        inner: Arc<SupervisorInner>,
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        generation: u64,
    ) {
        tokio::select! {
            // Fires on an explicit kill and also if the handle is dropped;
            // either way the child must not outlive the supervisor.
            _ = kill_rx => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(
                        "Failed to kill analysis server for {:?}: {}",
                        inner.root,
                        e
                    );
                }
            }
            result = child.wait() => {
                {
                    let mut slot = inner.server.lock();
                    let current = slot.handle.as_ref().map(|h| h.generation);
                    if current == Some(generation) {
                        slot.handle = None;
                    }
                }
                match result {
                    Ok(exit) => inner.handle_server_exit(exit),
                    Err(e) => tracing::warn!(
                        "Failed to wait on analysis server for {:?}: {}",
                        inner.root,
                        e
                    ),
                }
            }
        }
    }

    /// Classify a server exit: operator-initiated kills and clean exits are
    /// benign; a nonzero exit with no signal is a crash and permanently
    /// fails the root.
    fn handle_server_exit(&self, exit: std::process::ExitStatus) {
        match exit.code() {
            Some(0) | None => {
                // The next command will report not-running and drive a
                // fresh start through the status channel.
                tracing::info!("Analysis server for {:?} exited ({})", self.root, exit);
            }
            Some(code) => {
                tracing::error!(
                    "Analysis server for {:?} crashed with exit code {}",
                    self.root,
                    code
                );
                self.status.set_status(ServerStatus::Failed);
                self.status.complete();
            }
        }
    }

    /// Hard-kill the owned server, at most once.
    ///
    /// The backend does not reliably honor polite termination, so this is
    /// always a forced kill.
    fn kill_server(&self) {
        let handle = self.server.lock().handle.take();
        if let Some(handle) = handle {
            tracing::info!(
                "Killing analysis server for {:?} (pid {:?})",
                self.root,
                handle.pid
            );
            let _ = handle.kill_tx.send(());
        }
    }
}

async fn forward_output<R>(reader: R, stream: &'static str, root: PathBuf)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!("[server {:?} {}] {}", root, stream, line);
    }
}
