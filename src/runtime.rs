//! The `NodeRuntime` collaborator contract. The container/process runtime
//! itself is explicitly out of scope (§1); reconcilers only depend on this
//! trait, which lets tests substitute a fake runtime instead of spawning
//! real processes.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::model::Node;
use crate::network::{NetworkModule, PortSet};

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// One line of a running node's combined stdout/stderr stream.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[async_trait]
pub trait NodeRuntime: Send + Sync {
    /// Starts the node's process/container, using `plugin` to build the
    /// chain binary's start command and `ports` (from [`crate::subnet::PortOffset`])
    /// to bind it to the node's own port block instead of the binary's
    /// built-in defaults. Returns the opaque instance id. Implementations
    /// should return [`crate::error::Error::FailedPrecondition`] with a
    /// message recognizable as "already running" when a prior instance is
    /// still alive — the NodeReconciler tie-break (§4.4.2) adopts it instead
    /// of treating it as an error.
    async fn start(&self, node: &Node, plugin: &dyn NetworkModule, ports: &PortSet) -> Result<String>;

    async fn stop(&self, node: &Node, grace_period: Duration) -> Result<()>;

    async fn exec(&self, node: &Node, command: &[String], timeout: Duration) -> Result<ExecResult>;

    /// Returns recent/ongoing log lines. `follow` streams until the node
    /// exits or the caller drops the returned receiver.
    async fn logs(
        &self,
        node: &Node,
        tail: Option<usize>,
        follow: bool,
    ) -> Result<tokio::sync::mpsc::Receiver<LogLine>>;

    /// Cheap liveness check independent of the HealthController's chain-RPC
    /// probe; used by the NodeReconciler's `Starting -> Running` transition.
    async fn is_alive(&self, instance_id: &str) -> Result<bool>;
}

pub fn is_already_running(err: &crate::error::Error) -> bool {
    matches!(err, crate::error::Error::FailedPrecondition(msg) if msg.contains("already running"))
}

/// Translates a node's allocated [`PortSet`] into the cosmos-sdk cli flags
/// that bind each server to it instead of the binary's compiled-in
/// defaults (26657/26656/9090/1317); every module in the registry follows
/// this convention today (§6).
fn port_args(ports: &PortSet) -> Vec<String> {
    let mut args = vec![
        "--rpc.laddr".to_string(),
        format!("tcp://127.0.0.1:{}", ports.rpc),
        "--p2p.laddr".to_string(),
        format!("tcp://127.0.0.1:{}", ports.p2p),
        "--grpc.address".to_string(),
        format!("127.0.0.1:{}", ports.grpc),
        "--api.address".to_string(),
        format!("tcp://127.0.0.1:{}", ports.rest),
    ];
    if let Some(evm) = ports.evm {
        args.push("--json-rpc.address".to_string());
        args.push(format!("127.0.0.1:{evm}"));
    }
    args
}

/// Default [`NodeRuntime`]: spawns the node's own binary as a child process
/// via `tokio::process`, matching the `binary_path`/`home_dir` convention
/// most cosmos-sdk-style chain binaries already follow (`<bin> start --home
/// <dir>`). Logs are captured into a bounded ring buffer plus a broadcast
/// channel so `stream_logs` callers can join mid-stream.
pub struct ProcessRuntime {
    processes: tokio::sync::Mutex<std::collections::HashMap<String, RunningProcess>>,
    log_buffer_lines: usize,
}

struct RunningProcess {
    node_key: String,
    child: tokio::process::Child,
    buffer: std::sync::Arc<parking_lot::Mutex<std::collections::VecDeque<LogLine>>>,
    log_tx: tokio::sync::broadcast::Sender<LogLine>,
}

impl ProcessRuntime {
    pub fn new() -> Self {
        Self { processes: tokio::sync::Mutex::new(std::collections::HashMap::new()), log_buffer_lines: 1000 }
    }

    fn spawn_log_pump<R>(
        reader: R,
        stream: LogStream,
        buffer: std::sync::Arc<parking_lot::Mutex<std::collections::VecDeque<LogLine>>>,
        log_tx: tokio::sync::broadcast::Sender<LogLine>,
        capacity: usize,
    ) where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
    {
        tokio::spawn(async move {
            let mut lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(reader));
            while let Ok(Some(raw)) = lines.next_line().await {
                let line = LogLine { stream, line: raw };
                let mut buf = buffer.lock();
                if buf.len() >= capacity {
                    buf.pop_front();
                }
                buf.push_back(line.clone());
                drop(buf);
                let _ = log_tx.send(line);
            }
        });
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeRuntime for ProcessRuntime {
    async fn start(&self, node: &Node, plugin: &dyn NetworkModule, ports: &PortSet) -> Result<String> {
        let node_key = node.metadata.key().to_string();
        let mut processes = self.processes.lock().await;
        for proc in processes.values_mut() {
            if proc.node_key == node_key {
                if matches!(proc.child.try_wait(), Ok(None)) {
                    return Err(crate::error::Error::FailedPrecondition(format!("node {node_key} already running")));
                }
            }
        }

        // `start_command` includes the plugin's own binary name as its first
        // element (by convention, matching `init_command`/`export_command`);
        // the node always runs its own resolved `binary_path` instead, so
        // only the flags after it are reused.
        let mut flags = plugin.start_command(&node.spec.home_dir);
        if !flags.is_empty() {
            flags.remove(0);
        }
        flags.extend(port_args(ports));

        let mut child = tokio::process::Command::new(&node.spec.binary_path)
            .args(&flags)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| crate::error::Error::Internal(format!("failed to spawn {}: {e}", node.spec.binary_path)))?;

        let (log_tx, _) = tokio::sync::broadcast::channel(256);
        let buffer = std::sync::Arc::new(parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(self.log_buffer_lines)));
        if let Some(stdout) = child.stdout.take() {
            Self::spawn_log_pump(stdout, LogStream::Stdout, buffer.clone(), log_tx.clone(), self.log_buffer_lines);
        }
        if let Some(stderr) = child.stderr.take() {
            Self::spawn_log_pump(stderr, LogStream::Stderr, buffer.clone(), log_tx.clone(), self.log_buffer_lines);
        }

        let instance_id = uuid::Uuid::new_v4().to_string();
        processes.insert(instance_id.clone(), RunningProcess { node_key, child, buffer, log_tx });
        Ok(instance_id)
    }

    async fn stop(&self, node: &Node, grace_period: Duration) -> Result<()> {
        let instance_id = match &node.status.instance_id {
            Some(id) => id.clone(),
            None => return Ok(()),
        };
        let mut processes = self.processes.lock().await;
        let Some(proc) = processes.get_mut(&instance_id) else { return Ok(()) };
        let _ = proc.child.start_kill();
        let _ = tokio::time::timeout(grace_period, proc.child.wait()).await;
        processes.remove(&instance_id);
        Ok(())
    }

    async fn exec(&self, node: &Node, command: &[String], timeout: Duration) -> Result<ExecResult> {
        let Some((program, args)) = command.split_first() else {
            return Err(crate::error::Error::validation("exec command must not be empty"));
        };
        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(program).args(args).current_dir(&node.spec.home_dir).output(),
        )
        .await
        .map_err(|_| crate::error::Error::Internal(format!("exec timed out after {timeout:?}")))?
        .map_err(|e| crate::error::Error::Internal(format!("exec failed: {e}")))?;
        Ok(ExecResult { exit_code: output.status.code().unwrap_or(-1), stdout: output.stdout, stderr: output.stderr })
    }

    async fn logs(&self, node: &Node, tail: Option<usize>, follow: bool) -> Result<tokio::sync::mpsc::Receiver<LogLine>> {
        let instance_id = node
            .status
            .instance_id
            .clone()
            .ok_or_else(|| crate::error::Error::FailedPrecondition(format!("node {} has no running instance", node.metadata.name)))?;
        let processes = self.processes.lock().await;
        let proc = processes
            .get(&instance_id)
            .ok_or_else(|| crate::error::Error::not_found("node process", &node.metadata.namespace, &node.metadata.name))?;

        let backlog: Vec<LogLine> = {
            let buf = proc.buffer.lock();
            let tail = tail.unwrap_or(buf.len());
            buf.iter().rev().take(tail).rev().cloned().collect()
        };
        let mut live = proc.log_tx.subscribe();

        let (tx, rx) = tokio::sync::mpsc::channel(256);
        tokio::spawn(async move {
            for line in backlog {
                if tx.send(line).await.is_err() {
                    return;
                }
            }
            if !follow {
                return;
            }
            while let Ok(line) = live.recv().await {
                if tx.send(line).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn is_alive(&self, instance_id: &str) -> Result<bool> {
        let mut processes = self.processes.lock().await;
        match processes.get_mut(instance_id) {
            Some(proc) => Ok(matches!(proc.child.try_wait(), Ok(None))),
            None => Ok(false),
        }
    }
}
