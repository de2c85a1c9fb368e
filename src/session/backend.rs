//! Agent backend subprocess supervision.
//!
//! Generalized from the teacher's ACP-over-stdio supervision
//! (`acp/runtime.rs`: a dedicated OS thread running a single-threaded tokio
//! runtime, `tokio::select!` over shutdown/child-exit/io-completion, and an
//! idempotent close) to "agent backend over a TCP port it binds itself" —
//! the port is something *we* must allocate and pass in, since there's no
//! stdio pipe to multiplex requests over.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::thread;

use tokio::io::AsyncBufReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use crate::error::{HostError, HostResult};
use crate::session::port::{looks_like_port_busy, PortAttempt};

/// Everything needed to spawn the backend subprocess for one session.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub provider: String,
    pub model: String,
}

enum BackendCommand {
    Shutdown,
}

struct ServerHandleInner {
    shutdown_tx: mpsc::UnboundedSender<BackendCommand>,
    join: Option<thread::JoinHandle<()>>,
}

/// Handle to a running backend subprocess. `close()` is idempotent and
/// `Clone`-safe: every clone shares the same underlying process, and only
/// the first `close()` call does anything.
#[derive(Clone)]
pub struct ServerHandle {
    port: u16,
    inner: Arc<AsyncMutex<Option<ServerHandleInner>>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stops the backend subprocess. Safe to call from any task, any number
    /// of times, and safe to call concurrently with itself.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(inner) = guard.take() {
            let _ = inner.shutdown_tx.send(BackendCommand::Shutdown);
            if let Some(join) = inner.join {
                let _ = tokio::task::spawn_blocking(move || {
                    let _ = join.join();
                })
                .await;
            }
        }
    }
}

/// Attempts to start the backend bound to `port`. Returns `PortAttempt::Busy`
/// if the backend's boot failure looks like a port conflict,
/// `PortAttempt::Fatal` for any other boot failure, and `PortAttempt::Bound`
/// once the backend has signalled it's listening.
pub async fn try_bind(config: &BackendConfig, port: u16) -> PortAttempt<ServerHandle> {
    let config = config.clone();
    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

    let join = thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ready_tx.send(Err(format!("failed to start backend runtime: {err}")));
                return;
            }
        };
        runtime.block_on(run_backend(config, port, shutdown_rx, ready_tx));
    });

    match ready_rx.await {
        Ok(Ok(())) => PortAttempt::Bound(ServerHandle {
            port,
            inner: Arc::new(AsyncMutex::new(Some(ServerHandleInner {
                shutdown_tx,
                join: Some(join),
            }))),
        }),
        Ok(Err(message)) => {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = join.join();
            })
            .await;
            if looks_like_port_busy(&message) {
                PortAttempt::Busy
            } else {
                PortAttempt::Fatal(HostError::SessionStartFailed(message))
            }
        }
        Err(_) => PortAttempt::Fatal(HostError::SessionStartFailed(
            "backend readiness channel closed unexpectedly".to_string(),
        )),
    }
}

async fn run_backend(
    config: BackendConfig,
    port: u16,
    mut shutdown_rx: mpsc::UnboundedReceiver<BackendCommand>,
    ready_tx: oneshot::Sender<Result<(), String>>,
) {
    let mut command = Command::new(&config.command);
    command
        .args(&config.args)
        .arg("--port")
        .arg(port.to_string())
        .arg("--provider")
        .arg(&config.provider)
        .arg("--model")
        .arg(&config.model)
        .current_dir(&config.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("failed to spawn agent backend: {err}")));
            return;
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut ready_tx = Some(ready_tx);
    let mut last_stdout_line: Option<String> = None;

    // Joined (not detached) so the non-ready path below can fold the
    // backend's own boot error into the message sent to `ready_tx`: a
    // real backend reports "address already in use" / "port N" on stderr
    // before exiting, and that's the only place spec 4.E's port-busy
    // detection has anything to inspect.
    let stderr_task = stderr.map(|stderr| tokio::spawn(log_stderr(stderr)));

    let mut stdout_lines = stdout.map(|stdout| tokio::io::BufReader::new(stdout).lines());

    loop {
        tokio::select! {
            cmd = shutdown_rx.recv() => {
                match cmd {
                    Some(BackendCommand::Shutdown) | None => {
                        let _ = child.kill().await;
                        break;
                    }
                }
            }
            line = next_stdout_line(&mut stdout_lines), if stdout_lines.is_some() => {
                match line {
                    Some(Ok(line)) => {
                        if let Some(tx) = ready_tx.take() {
                            if is_ready_line(&line) {
                                let _ = tx.send(Ok(()));
                            } else {
                                last_stdout_line = Some(line);
                                ready_tx = Some(tx);
                            }
                        }
                    }
                    Some(Err(_)) | None => {
                        stdout_lines = None;
                    }
                }
            }
            status = child.wait() => {
                if let Some(tx) = ready_tx.take() {
                    let stderr_tail = match stderr_task {
                        Some(task) => task.await.unwrap_or_default(),
                        None => Vec::new(),
                    };
                    let detail = stderr_tail.last().cloned().or(last_stdout_line);
                    let message = match (status, detail) {
                        (Ok(status), Some(detail)) => {
                            format!("agent backend exited before becoming ready: {status} ({detail})")
                        }
                        (Ok(status), None) => format!("agent backend exited before becoming ready: {status}"),
                        (Err(err), _) => format!("agent backend wait failed: {err}"),
                    };
                    let _ = tx.send(Err(message));
                }
                break;
            }
        }
    }

    let _ = child.kill().await;
}

async fn next_stdout_line(
    lines: &mut Option<tokio::io::Lines<tokio::io::BufReader<tokio::process::ChildStdout>>>,
) -> Option<std::io::Result<String>> {
    match lines {
        Some(lines) => lines.next_line().await.transpose(),
        None => None,
    }
}

fn is_ready_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("listening") || lower.contains("ready")
}

/// Drains the backend's stderr line by line, logging each as it arrives and
/// returning the last [`STDERR_TAIL_LINES`] non-empty lines once the stream
/// closes, so a caller that only learns the process exited after the fact
/// can still see what it printed on its way out.
const STDERR_TAIL_LINES: usize = 20;

async fn log_stderr(stderr: tokio::process::ChildStderr) -> Vec<String> {
    let mut reader = tokio::io::BufReader::new(stderr);
    let mut line = String::new();
    let mut tail = Vec::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim_end();
                if !trimmed.is_empty() {
                    tracing::warn!(target: "agent_backend", "{trimmed}");
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.remove(0);
                    }
                    tail.push(trimmed.to_string());
                }
            }
            Err(_) => break,
        }
    }
    tail
}

/// Convenience used by the orchestrator when a fatal, non-port startup
/// failure should surface uniformly regardless of which probe step hit it.
pub fn fatal(message: impl Into<String>) -> HostError {
    HostError::SessionStartFailed(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_ready_line_matches_common_markers() {
        assert!(is_ready_line("server listening on 127.0.0.1:3420"));
        assert!(is_ready_line("Ready"));
        assert!(!is_ready_line("loading workspace..."));
    }
}
