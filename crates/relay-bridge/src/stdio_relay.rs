//! stdio-relay mode: spawn a child MCP server and relay JSON-RPC between
//! our stdio and the child's, with stream-limit handling and (for
//! `shrimp-task-manager`) the `roots/list` shim.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::warn;

use relay_core::rpc::{BRIDGE_OVERFLOW, INTERNAL_ERROR, RpcResponse};

use crate::bounded_reader::{BoundedLine, DEFAULT_STREAM_LIMIT, clamp_stream_limit, read_bounded_line};
use crate::commands::build_stdio_relay_command;
use crate::inflight::InFlightTracker;
use crate::monitoring::{Direction, MonitoringHandle};
use crate::roots_shim::{build_roots_list_response, is_roots_list_request, workspace_root};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

pub async fn run_stdio_relay(server_name: &str, monitoring: Option<MonitoringHandle>) -> i32 {
    let Some(cmd) = build_stdio_relay_command(server_name) else {
        warn!(server = server_name, "no stdio-relay command for server");
        return 1;
    };

    let stream_limit = std::env::var("MCP_BRIDGE_STDIO_STREAM_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(clamp_stream_limit)
        .unwrap_or(DEFAULT_STREAM_LIMIT);

    let mut command = Command::new(&cmd.command);
    command
        .args(&cmd.args)
        .env_clear()
        .envs(&cmd.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return run_spawn_failure_loop(server_name, &e.to_string()).await,
    };

    let child_stdin = child.stdin.take().expect("piped stdin");
    let child_stdout = child.stdout.take().expect("piped stdout");
    let child_stderr = child.stderr.take().expect("piped stderr");

    let tracker = Arc::new(InFlightTracker::new());
    let shared_stdin = Arc::new(Mutex::new(child_stdin));
    let shrimp_shim = server_name == "shrimp-task-manager";

    let mut stdin_task = tokio::spawn(pump_stdin_to_child(shared_stdin.clone(), tracker.clone(), monitoring.clone()));
    let stdout_task = tokio::spawn(pump_child_stdout(
        child_stdout,
        shared_stdin,
        tracker.clone(),
        monitoring.clone(),
        stream_limit,
        shrimp_shim,
    ));
    let stderr_task = tokio::spawn(pump_child_stderr(child_stderr));

    let exit_status = relay_until_exit(&mut child, &mut stdin_task).await;

    // the child is gone by now, so its stdout/stderr pipes are at EOF already;
    // these just bound how long we wait for the pump tasks to notice.
    let _ = timeout(DRAIN_TIMEOUT, stdout_task).await;
    let _ = timeout(DRAIN_TIMEOUT, stderr_task).await;

    exit_status.and_then(|status| status.code()).unwrap_or(0)
}

async fn relay_until_exit(child: &mut Child, stdin_task: &mut tokio::task::JoinHandle<()>) -> Option<std::process::ExitStatus> {
    tokio::select! {
        _ = &mut *stdin_task => {
            match timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                _ => {
                    let _ = child.start_kill();
                    child.wait().await.ok()
                }
            }
        }
        wait_result = child.wait() => {
            stdin_task.abort();
            wait_result.ok()
        }
    }
}

async fn pump_stdin_to_child(child_stdin: Arc<Mutex<ChildStdin>>, tracker: Arc<InFlightTracker>, monitoring: Option<MonitoringHandle>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "stdin read error");
                return;
            }
        };

        if let Ok(value) = serde_json::from_str::<Value>(&line) {
            tracker.observe_outgoing(&value).await;
            if let Some(handle) = &monitoring {
                handle.record(Direction::ClientToServer, &value, now_ms());
            }
        }

        let mut guard = child_stdin.lock().await;
        if guard.write_all(line.as_bytes()).await.is_err() || guard.write_all(b"\n").await.is_err() {
            return;
        }
        let _ = guard.flush().await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn pump_child_stdout(
    mut child_stdout: ChildStdout,
    child_stdin: Arc<Mutex<ChildStdin>>,
    tracker: Arc<InFlightTracker>,
    monitoring: Option<MonitoringHandle>,
    stream_limit: usize,
    shrimp_shim: bool,
) {
    let root = if shrimp_shim { Some(workspace_root()) } else { None };
    let mut stdout = tokio::io::stdout();

    loop {
        match read_bounded_line(&mut child_stdout, stream_limit).await {
            Ok(BoundedLine::Eof) | Err(_) => return,
            Ok(BoundedLine::Overflow) => {
                for id in tracker.drain_ids().await {
                    let resp = RpcResponse::err(id, BRIDGE_OVERFLOW, "bridge_overflow: child stdout line exceeded stream limit");
                    if let Ok(value) = serde_json::to_value(&resp) {
                        write_line_to_stdout(&mut stdout, &value).await;
                    }
                }
                eprintln!("[mcp_bridge] child stdout line exceeded stream limit, dropped");
            }
            Ok(BoundedLine::Line(bytes)) => {
                handle_child_stdout_line(&bytes, &child_stdin, &tracker, &monitoring, shrimp_shim, root.as_deref(), &mut stdout).await;
            }
        }
    }
}

async fn handle_child_stdout_line(
    bytes: &[u8],
    child_stdin: &Arc<Mutex<ChildStdin>>,
    tracker: &Arc<InFlightTracker>,
    monitoring: &Option<MonitoringHandle>,
    shrimp_shim: bool,
    root: Option<&std::path::Path>,
    stdout: &mut (impl tokio::io::AsyncWrite + Unpin),
) {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_start();

    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            if value.get("jsonrpc").and_then(Value::as_str) == Some("2.0") {
                if shrimp_shim && is_roots_list_request(&value) {
                    if let (Some(req_id), Some(root)) = (value.get("id"), root) {
                        let response = build_roots_list_response(req_id, root);
                        let mut guard = child_stdin.lock().await;
                        if let Ok(mut line) = serde_json::to_string(&response) {
                            line.push('\n');
                            let _ = guard.write_all(line.as_bytes()).await;
                            let _ = guard.flush().await;
                        }
                    }
                    return;
                }

                if let Some(id) = value.get("id") {
                    tracker.complete(id).await;
                }
                if let Some(handle) = monitoring {
                    handle.record(Direction::ServerToClient, &value, now_ms());
                }
                write_line_to_stdout(stdout, &value).await;
                return;
            }
        }
    }

    eprint!("[mcp_bridge relay stdout] {text}");
}

async fn write_line_to_stdout(stdout: &mut (impl tokio::io::AsyncWrite + Unpin), value: &Value) {
    let mut line = value.to_string();
    line.push('\n');
    let _ = stdout.write_all(line.as_bytes()).await;
    let _ = stdout.flush().await;
}

async fn pump_child_stderr(mut child_stderr: ChildStderr) {
    let mut stderr = tokio::io::stderr();
    let _ = tokio::io::copy(&mut child_stderr, &mut stderr).await;
}

async fn run_spawn_failure_loop(server_name: &str, error: &str) -> i32 {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return 1,
            Err(_) => return 1,
        };

        let id = serde_json::from_str::<Value>(&line)
            .ok()
            .and_then(|v| v.get("id").cloned())
            .unwrap_or(Value::Null);
        let resp = RpcResponse::err(id, INTERNAL_ERROR, format!("Impossible de démarrer {server_name}: {error}"));
        if let Ok(value) = serde_json::to_value(&resp) {
            write_line_to_stdout(&mut stdout, &value).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_child_stdout_line_forwards_well_formed_jsonrpc() {
        let tracker = Arc::new(InFlightTracker::new());
        let mut out = Vec::new();
        let child_stdin = Arc::new(Mutex::new(dummy_child_stdin().await));
        handle_child_stdout_line(
            br#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
            &child_stdin,
            &tracker,
            &None,
            false,
            None,
            &mut out,
        )
        .await;
        assert!(String::from_utf8(out).unwrap().contains(r#""jsonrpc":"2.0""#));
    }

    #[tokio::test]
    async fn handle_child_stdout_line_drops_non_jsonrpc_banner() {
        let tracker = Arc::new(InFlightTracker::new());
        let mut out = Vec::new();
        let child_stdin = Arc::new(Mutex::new(dummy_child_stdin().await));
        handle_child_stdout_line(b"server starting up...\n", &child_stdin, &tracker, &None, false, None, &mut out).await;
        assert!(out.is_empty());
    }

    async fn dummy_child_stdin() -> ChildStdin {
        let mut child = Command::new("cat").stdin(Stdio::piped()).stdout(Stdio::null()).spawn().unwrap();
        child.stdin.take().unwrap()
    }
}
