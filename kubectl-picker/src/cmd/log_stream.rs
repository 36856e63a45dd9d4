use futures::future::join_all;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{LogProcess, StreamEvent};
use crate::error::{Error, Result};
use crate::streaming::forward_chunks;
use crate::structs::LogTarget;

/// Exit code reported when the process was killed by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Default)]
pub struct LogCommandOptions<'a> {
    pub kubectl: &'a str,
    pub context: Option<&'a str>,
    pub tail_lines: Option<i64>,
}

pub fn log_command(target: &LogTarget, opts: &LogCommandOptions<'_>) -> Vec<String> {
    let mut argv = vec![opts.kubectl.to_string()];
    if let Some(context) = opts.context {
        argv.push(format!("--context={}", context));
    }
    argv.extend([
        "logs".to_string(),
        "-f".to_string(),
        target.pod.clone(),
        "-n".to_string(),
        target.namespace.clone(),
    ]);
    if let Some(container) = &target.container {
        argv.push("-c".to_string());
        argv.push(container.clone());
    }
    if target.timestamps {
        argv.push("--timestamps".to_string());
    }
    if let Some(since) = target.since.as_deref().filter(|s| !s.is_empty() && *s != "0") {
        argv.push(format!("--since={}", since));
    }
    if target.previous {
        argv.push("--previous".to_string());
    }
    if let Some(tail) = opts.tail_lines {
        argv.push(format!("--tail={}", tail));
    }
    argv
}

/// Spawns `argv` with piped output. Stdout and stderr are forwarded as
/// chunk events; the exit code follows once both pipes have drained.
#[tracing::instrument]
pub fn spawn_log_process(argv: Vec<String>) -> Result<LogProcess> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::SpawnFailed("empty command line".into()))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::SpawnFailed(format!("{}: {}", program, e)))?;

    let pid = child.id().map(i64::from).unwrap_or(0);
    let (tx, rx) = mpsc::unbounded_channel();
    let terminate = CancellationToken::new();

    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(forward_chunks(out, tx.clone(), StreamEvent::Output)));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(forward_chunks(err, tx.clone(), StreamEvent::Error)));

    tokio::spawn(reap(
        child,
        pid,
        terminate.clone(),
        [stdout_task, stderr_task],
        tx,
    ));

    info!(pid, "log process spawned");
    Ok(LogProcess {
        pid,
        events: rx,
        terminate,
    })
}

async fn reap(
    mut child: Child,
    pid: i64,
    terminate: CancellationToken,
    readers: [Option<JoinHandle<()>>; 2],
    tx: mpsc::UnboundedSender<StreamEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = terminate.cancelled() => {
            send_terminate(pid);
            child.wait().await
        }
    };

    join_all(readers.into_iter().flatten()).await;

    let code = match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            warn!(pid, "waiting for log process failed: {}", e);
            SIGNALLED_EXIT_CODE
        }
    };
    debug!(pid, code, "log process exited");
    let _ = tx.send(StreamEvent::Exit(code));
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SIGNALLED_EXIT_CODE)
}

/// Sends SIGTERM. A process that is already gone is not an error.
fn send_terminate(pid: i64) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if raw <= 0 {
        return;
    }
    match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => debug!(pid, "sent SIGTERM to log process"),
        Err(Errno::ESRCH) => debug!(pid, "log process already exited"),
        Err(e) => warn!(pid, "failed to signal log process: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> LogCommandOptions<'static> {
        LogCommandOptions {
            kubectl: "kubectl",
            context: None,
            tail_lines: None,
        }
    }

    #[test]
    fn test_minimal_command() {
        let target = LogTarget::new("web-0", "prod");
        assert_eq!(
            log_command(&target, &opts()),
            ["kubectl", "logs", "-f", "web-0", "-n", "prod"]
        );
    }

    #[test]
    fn test_full_command() {
        let mut target = LogTarget::new("web-0", "prod").with_container("nginx");
        target.timestamps = true;
        target.since = Some("5m".into());
        target.previous = true;
        let opts = LogCommandOptions {
            context: Some("staging"),
            tail_lines: Some(200),
            ..opts()
        };

        assert_eq!(
            log_command(&target, &opts),
            [
                "kubectl",
                "--context=staging",
                "logs",
                "-f",
                "web-0",
                "-n",
                "prod",
                "-c",
                "nginx",
                "--timestamps",
                "--since=5m",
                "--previous",
                "--tail=200",
            ]
        );
    }

    #[test]
    fn test_zero_since_is_ignored() {
        let mut target = LogTarget::new("web-0", "prod");
        target.since = Some("0".into());
        assert!(!log_command(&target, &opts()).iter().any(|a| a.starts_with("--since")));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let err = spawn_log_process(vec!["/nonexistent/kubectl-picker-test".into()]).unwrap_err();
        assert!(matches!(err, Error::SpawnFailed(_)));
        assert!(matches!(
            spawn_log_process(Vec::new()),
            Err(Error::SpawnFailed(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_process_reports_output_then_exit() {
        let mut process = spawn_log_process(vec![
            "sh".into(),
            "-c".into(),
            "echo one; echo two; echo oops >&2; exit 3".into(),
        ])
        .unwrap();
        assert!(process.pid > 0);

        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = loop {
            match process.events.recv().await {
                Some(StreamEvent::Output(lines)) => out.extend(lines),
                Some(StreamEvent::Error(lines)) => err.extend(lines),
                Some(StreamEvent::Exit(code)) => break code,
                None => panic!("channel closed before exit"),
            }
        };
        assert_eq!(out, ["one", "two"]);
        assert_eq!(err, ["oops"]);
        assert_eq!(code, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_stops_long_running_process() {
        let mut process =
            spawn_log_process(vec!["sh".into(), "-c".into(), "exec sleep 30".into()]).unwrap();
        process.terminate.cancel();
        process.terminate.cancel();

        let code = loop {
            match process.events.recv().await {
                Some(StreamEvent::Exit(code)) => break code,
                Some(_) => continue,
                None => panic!("channel closed before exit"),
            }
        };
        assert_eq!(code, SIGNALLED_EXIT_CODE);
    }
}
