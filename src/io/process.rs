//! Process management layer
//!
//! Handles backend process lifecycle and stderr draining, completely
//! separate from transport concerns.

use crate::io::transport::StdioTransport;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
// warn! is only used on non-unix targets
#[allow(unused_imports)]
use tracing::{error, info, trace, warn};

// ============================================================================
// Process State Management
// ============================================================================

/// How to stop a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// SIGTERM, letting the backend clean up
    Graceful,
    /// SIGKILL
    Force,
}

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has not been started yet
    NotStarted,
    /// Process is currently running
    Running { pid: u32 },
    /// Process has exited or was stopped
    Stopped,
}

impl ProcessState {
    /// Get the process ID if the process is running
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }

    /// Check if the process is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to spawn backend '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Stdin not available")]
    StdinNotAvailable,

    #[error("Stdout not available")]
    StdoutNotAvailable,

    #[error("Stderr not available")]
    StderrNotAvailable,
}

/// Trait for managing backend process lifecycle
#[async_trait]
pub trait ProcessManager: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start the backend process
    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Stop the backend process
    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error>;

    /// Check if the process is currently running
    fn is_running(&self) -> bool;

    /// Hand out the stdio transport; can only be taken once per start
    fn create_stdio_transport(&mut self) -> Result<StdioTransport, Self::Error>;

    /// Synchronous force kill for Drop implementations
    fn kill_sync(&mut self);
}

type StderrHandler = Box<dyn Fn(String) + Send + Sync>;

/// Manages a backend spawned via Command
pub struct ChildProcessManager {
    /// Command to execute
    command: String,

    /// Command arguments
    args: Vec<String>,

    /// Working directory for the process
    working_directory: Option<PathBuf>,

    /// Thread-safe process state
    state: Arc<Mutex<ProcessState>>,

    /// Stdio transport (created when process starts)
    stdio_transport: Option<StdioTransport>,

    /// Stderr line handler
    stderr_handler: Option<StderrHandler>,

    /// Stderr draining task
    stderr_task: Option<JoinHandle<()>>,

    /// Fired by the wait task once the child has exited
    exited: CancellationToken,
}

impl ChildProcessManager {
    /// Create a new child process manager
    pub fn new(command: String, args: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            args,
            working_directory: working_dir,
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            stdio_transport: None,
            stderr_handler: None,
            stderr_task: None,
            exited: CancellationToken::new(),
        }
    }

    /// Get current process state
    pub fn get_state(&self) -> ProcessState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, state: ProcessState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Install a handler for backend stderr lines
    ///
    /// Must be called before `start`; without a handler lines are drained.
    pub fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.stderr_handler = Some(Box::new(handler));
    }

    /// Wait until the child exits, up to `timeout`
    ///
    /// Returns true if the process exited in time.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.exited.cancelled())
            .await
            .is_ok()
    }

    /// Always drain stderr so the backend never blocks on a full pipe
    fn spawn_stderr_monitor(&mut self, stderr: ChildStderr) {
        let handler = self.stderr_handler.take();

        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        match &handler {
                            Some(handler) => handler(line),
                            None => trace!("ChildProcessManager: stderr drained: {}", line),
                        }
                    }
                    Ok(None) => {
                        trace!("ChildProcessManager: stderr EOF reached");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read from stderr: {}", e);
                        break;
                    }
                }
            }
        });

        self.stderr_task = Some(task);
    }

    /// Watch the child and flip the state once it exits
    fn spawn_wait_task(&self, mut child: Child, pid: u32) {
        let state = Arc::clone(&self.state);
        let exited = self.exited.clone();

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!("Backend PID {} exited with status: {}", pid, status),
                Err(e) => error!("Error waiting for backend PID {}: {}", pid, e),
            }
            *state.lock().unwrap_or_else(PoisonError::into_inner) = ProcessState::Stopped;
            exited.cancel();
        });
    }

    #[cfg(unix)]
    fn signal(pid: u32, mode: StopMode) {
        let signal = match mode {
            StopMode::Graceful => libc::SIGTERM,
            StopMode::Force => libc::SIGKILL,
        };
        // SAFETY: kill(2) with a pid we spawned and a valid signal number
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if rc == 0 {
            info!("Sent {:?} signal to backend {}", mode, pid);
        }
    }

    #[cfg(not(unix))]
    fn signal(pid: u32, _mode: StopMode) {
        warn!("Signal-based termination is unavailable on this platform (pid {})", pid);
    }
}

#[async_trait]
impl ProcessManager for ChildProcessManager {
    type Error = ProcessError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        info!("Starting backend: {} {:?}", self.command, self.args);

        let mut command_builder = Command::new(&self.command);
        command_builder
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(working_dir) = &self.working_directory {
            command_builder.current_dir(working_dir);
        }

        let mut child = command_builder.spawn().map_err(|source| ProcessError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        let pid = child
            .id()
            .ok_or_else(|| ProcessError::Io(io::Error::other("Failed to get process ID")))?;
        info!("Backend started with PID: {}", pid);
        self.set_state(ProcessState::Running { pid });
        self.exited = CancellationToken::new();

        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::StderrNotAvailable)?;

        self.stdio_transport = Some(StdioTransport::from_child(stdin, stdout));
        self.spawn_stderr_monitor(stderr);
        self.spawn_wait_task(child, pid);

        Ok(())
    }

    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error> {
        let pid = self.get_state().pid().ok_or(ProcessError::NotStarted)?;

        info!("Stopping backend PID {} ({:?})", pid, mode);
        self.stdio_transport.take();
        Self::signal(pid, mode);

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        // After SIGTERM the wait task records the exit; the pid stays
        // available for a follow-up kill until then
        if mode == StopMode::Force {
            self.set_state(ProcessState::Stopped);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.get_state().is_running()
    }

    fn create_stdio_transport(&mut self) -> Result<StdioTransport, Self::Error> {
        self.stdio_transport.take().ok_or(ProcessError::NotStarted)
    }

    fn kill_sync(&mut self) {
        let Some(pid) = self.get_state().pid() else {
            return;
        };

        Self::signal(pid, StopMode::Force);
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.set_state(ProcessState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::Transport;

    #[tokio::test]
    async fn test_child_process_manager_lifecycle() {
        let mut manager = ChildProcessManager::new("sleep".to_string(), vec!["5".to_string()], None);

        assert_eq!(manager.get_state(), ProcessState::NotStarted);
        assert!(!manager.is_running());

        manager.start().await.unwrap();
        assert!(matches!(manager.get_state(), ProcessState::Running { .. }));

        manager.stop(StopMode::Force).await.unwrap();
        assert_eq!(manager.get_state(), ProcessState::Stopped);
        assert!(manager.wait_for_exit(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_stderr_monitoring() {
        let mut manager = ChildProcessManager::new(
            "sh".to_string(),
            vec![
                "-c".to_string(),
                "echo 'error message' >&2; sleep 1".to_string(),
            ],
            None,
        );

        let stderr_lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let stderr_lines_clone = Arc::clone(&stderr_lines);
        manager.on_stderr_line(move |line| {
            stderr_lines_clone.lock().unwrap().push(line);
        });

        manager.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        manager.stop(StopMode::Graceful).await.unwrap();

        let lines = stderr_lines.lock().unwrap();
        assert_eq!(lines.first().map(String::as_str), Some("error message"));
    }

    #[tokio::test]
    async fn test_natural_exit_is_observed() {
        let mut manager = ChildProcessManager::new("true".to_string(), vec![], None);
        manager.start().await.unwrap();

        assert!(manager.wait_for_exit(Duration::from_secs(5)).await);
        assert_eq!(manager.get_state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_operations() {
        let mut manager = ChildProcessManager::new("sleep".to_string(), vec!["5".to_string()], None);

        let result = manager.stop(StopMode::Graceful).await;
        assert!(matches!(result, Err(ProcessError::NotStarted)));

        manager.start().await.unwrap();
        let result = manager.start().await;
        assert!(matches!(result, Err(ProcessError::AlreadyStarted)));

        manager.stop(StopMode::Force).await.unwrap();
        let result = manager.stop(StopMode::Graceful).await;
        assert!(matches!(result, Err(ProcessError::NotStarted)));
    }

    #[tokio::test]
    async fn test_spawn_failure_names_command() {
        let mut manager =
            ChildProcessManager::new("definitely-not-a-backend-binary".to_string(), vec![], None);
        match manager.start().await {
            Err(ProcessError::Spawn { command, .. }) => {
                assert_eq!(command, "definitely-not-a-backend-binary")
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_transport_once() {
        let mut manager = ChildProcessManager::new("cat".to_string(), vec![], None);

        assert!(matches!(
            manager.create_stdio_transport(),
            Err(ProcessError::NotStarted)
        ));

        manager.start().await.unwrap();
        let transport = manager.create_stdio_transport().unwrap();
        assert!(transport.is_connected());
        assert!(matches!(
            manager.create_stdio_transport(),
            Err(ProcessError::NotStarted)
        ));

        manager.stop(StopMode::Force).await.unwrap();
    }

    #[test]
    fn test_process_state_methods() {
        assert!(!ProcessState::NotStarted.is_running());
        assert_eq!(ProcessState::Running { pid: 12345 }.pid(), Some(12345));
        assert!(ProcessState::Stopped.pid().is_none());
    }
}
