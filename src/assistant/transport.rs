use crate::assistant::wire::shutdown_message;
use crate::shared::logging::{append_run_log_line, role_stderr_log_path};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const INBOUND_QUEUE_CAPACITY: usize = 1024;
pub const STOP_GRACE: Duration = Duration::from_secs(2);
pub const ASSISTANT_SUBCOMMAND: &str = "app-server";
pub const BINARY_PATH_ENV: &str = "ASSISTANT_BINARY_PATH";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("assistant binary `{binary}` not found on PATH or fallback paths")]
    BinaryNotFound { binary: String },
    #[error("failed to spawn assistant for role `{role}`: {source}")]
    Spawn {
        role: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open stderr log {path}: {source}")]
    StderrLog {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transport closed for role `{role}`")]
    Closed { role: String },
}

#[derive(Debug)]
pub enum NextMessage {
    Message(Value),
    TimedOut,
    Closed,
}

/// Resolve the assistant binary: the `ASSISTANT_BINARY_PATH` override wins,
/// then an explicit path in the configured name, then a PATH walk, then the
/// configured fallback entries (a file, or a directory holding the binary).
pub fn locate_assistant_binary(
    configured: &str,
    fallback_paths: &[PathBuf],
) -> Result<PathBuf, TransportError> {
    if let Ok(value) = std::env::var(BINARY_PATH_ENV) {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value.trim()));
        }
    }
    if configured.contains(std::path::MAIN_SEPARATOR) || configured.contains('/') {
        let candidate = PathBuf::from(configured);
        if candidate.is_file() {
            return Ok(candidate);
        }
        return Err(TransportError::BinaryNotFound {
            binary: configured.to_string(),
        });
    }
    if let Some(path_var) = std::env::var_os("PATH") {
        for entry in std::env::split_paths(&path_var) {
            let candidate = entry.join(configured);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    for entry in fallback_paths {
        if entry.is_file() {
            return Ok(entry.clone());
        }
        let candidate = entry.join(configured);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(TransportError::BinaryNotFound {
        binary: configured.to_string(),
    })
}

/// One assistant subprocess. A reader thread drains its stdout into a bounded
/// queue; the scheduler thread is the only writer to stdin.
pub struct Transport {
    role_name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    receiver: Receiver<Value>,
    reader: Option<JoinHandle<()>>,
    thread_id: Option<String>,
    needs_drain: bool,
}

impl Transport {
    pub fn start(
        role_name: &str,
        binary: &Path,
        workspace_root: &Path,
        env: &BTreeMap<String, String>,
        run_dir: &Path,
    ) -> Result<Self, TransportError> {
        let stderr_path = role_stderr_log_path(run_dir, role_name);
        if let Some(parent) = stderr_path.parent() {
            fs::create_dir_all(parent).map_err(|source| TransportError::StderrLog {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let stderr_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_path)
            .map_err(|source| TransportError::StderrLog {
                path: stderr_path.display().to_string(),
                source,
            })?;

        let mut command = Command::new(binary);
        command
            .arg(ASSISTANT_SUBCOMMAND)
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_file));
        for (key, value) in env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            role: role_name.to_string(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or_else(|| TransportError::Spawn {
            role: role_name.to_string(),
            source: std::io::Error::other("missing stdin pipe"),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Spawn {
            role: role_name.to_string(),
            source: std::io::Error::other("missing stdout pipe"),
        })?;

        let (sender, receiver) = std::sync::mpsc::sync_channel(INBOUND_QUEUE_CAPACITY);
        let reader = spawn_reader(role_name.to_string(), run_dir.to_path_buf(), stdout, sender);

        Ok(Self {
            role_name: role_name.to_string(),
            child,
            stdin: Some(stdin),
            receiver,
            reader: Some(reader),
            thread_id: None,
            needs_drain: false,
        })
    }

    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn set_thread_id(&mut self, thread_id: String) {
        self.thread_id = Some(thread_id);
    }

    pub fn needs_drain(&self) -> bool {
        self.needs_drain
    }

    pub fn set_needs_drain(&mut self, value: bool) {
        self.needs_drain = value;
    }

    pub fn send(&mut self, message: &Value) -> Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| TransportError::Closed {
            role: self.role_name.clone(),
        })?;
        let mut line = serde_json::to_string(message).map_err(|_| TransportError::Closed {
            role: self.role_name.clone(),
        })?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.flush())
            .map_err(|_| TransportError::Closed {
                role: self.role_name.clone(),
            })
    }

    pub fn next(&self, timeout: Duration) -> NextMessage {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => NextMessage::Message(message),
            Err(RecvTimeoutError::Timeout) => NextMessage::TimedOut,
            Err(RecvTimeoutError::Disconnected) => NextMessage::Closed,
        }
    }

    /// Graceful stop: `shutdown` message, close stdin, wait out the grace
    /// period, then kill. The inbound queue is drained so the reader thread
    /// can observe end-of-stream and be joined.
    pub fn stop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.send(&shutdown_message());
        }
        self.stdin = None;

        let deadline = Instant::now() + STOP_GRACE;
        let exited = loop {
            match self.child.try_wait() {
                Ok(Some(_)) => break true,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break false;
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(_) => break false,
            }
        };
        if !exited {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }

        let drain_deadline = Instant::now() + Duration::from_secs(1);
        loop {
            match self.receiver.recv_timeout(Duration::from_millis(50)) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() >= drain_deadline {
                        break;
                    }
                }
            }
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn spawn_reader(
    role_name: String,
    run_dir: PathBuf,
    stdout: std::process::ChildStdout,
    sender: SyncSender<Value>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(message) => {
                    if sender.send(message).is_err() {
                        break;
                    }
                }
                Err(_) => {
                    let _ = append_run_log_line(
                        &run_dir,
                        &format!(
                            "discarded_line role={role_name} bytes={}",
                            trimmed.len()
                        ),
                    );
                }
            }
        }
    })
}
