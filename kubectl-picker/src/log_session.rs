//! A running `logs -f` session: bounded line buffer, follow-mode viewport and
//! the task that applies subprocess events to it.

use k8s_openapi::serde_json::json;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{LogProcess, StreamEvent};
use crate::error::{Error, Result};
use crate::event_queue::EventSender;
use crate::structs::LogTarget;
use crate::supervisor::Supervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(u32);

impl SessionId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Process ids of zero or less mean the spawn did not produce a process.
    pub fn from_pid(pid: i64) -> Result<Self> {
        match u32::try_from(pid) {
            Ok(raw) if raw > 0 => Ok(Self(raw)),
            _ => Err(Error::SpawnFailed(format!("invalid process handle {pid}"))),
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "code", rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Stopped,
    Failed(i32),
}

impl SessionStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Starting | SessionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Failed(_) => "failed",
        }
    }
}

/// Ring of the most recent lines plus the consumer's view position.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    max_lines: usize,
    follow: bool,
    view_row: usize,
    viewport_at_tail: bool,
}

impl LogBuffer {
    pub fn new(max_lines: usize, follow: bool) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines: max_lines.max(1),
            follow,
            view_row: 0,
            viewport_at_tail: true,
        }
    }

    /// Appends one chunk and returns how many lines it contributed.
    ///
    /// Trailing empty lines are split artifacts and are dropped. Eviction is
    /// from the front only. With follow on, a view at (or one line short of)
    /// the end before the append is moved to the new last line after it.
    pub fn append(&mut self, chunk: Vec<String>) -> usize {
        let mut chunk = chunk;
        while chunk.last().is_some_and(|line| line.is_empty()) {
            chunk.pop();
        }
        if chunk.is_empty() {
            return 0;
        }

        let at_tail = self.follow && self.view_is_near_end();
        let added = chunk.len();

        self.lines.extend(chunk);
        let excess = self.lines.len().saturating_sub(self.max_lines);
        if excess > 0 {
            self.lines.drain(..excess);
        }

        self.viewport_at_tail = at_tail;
        if at_tail {
            self.view_row = self.lines.len() - 1;
        }
        added
    }

    fn view_is_near_end(&self) -> bool {
        self.lines.len() < 2 || self.view_row + 2 >= self.lines.len()
    }

    pub fn set_view_row(&mut self, row: usize) {
        self.view_row = row.min(self.lines.len().saturating_sub(1));
    }

    pub fn view_row(&self) -> usize {
        self.view_row
    }

    pub fn viewport_at_tail(&self) -> bool {
        self.viewport_at_tail
    }

    pub fn follow(&self) -> bool {
        self.follow
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

#[derive(Debug)]
struct SessionState {
    buffer: LogBuffer,
    status: SessionStatus,
}

/// Point-in-time copy of a session for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSnapshot {
    pub id: SessionId,
    pub lines: Vec<String>,
    pub view_row: usize,
    pub viewport_at_tail: bool,
    pub status: SessionStatus,
}

/// Shared handle to one log session. Clones refer to the same session.
#[derive(Debug, Clone)]
pub struct LogSession {
    id: SessionId,
    target: Arc<LogTarget>,
    state: Arc<Mutex<SessionState>>,
    terminate: CancellationToken,
}

impl LogSession {
    pub fn new(
        id: SessionId,
        target: LogTarget,
        buffer: LogBuffer,
        terminate: CancellationToken,
    ) -> Self {
        Self {
            id,
            target: Arc::new(target),
            state: Arc::new(Mutex::new(SessionState {
                buffer,
                status: SessionStatus::Starting,
            })),
            terminate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn target(&self) -> &LogTarget {
        &self.target
    }

    /// True when both handles are clones of one session. Ids alone are not
    /// enough since the OS may hand a pid to a new process.
    pub fn same_session(&self, other: &LogSession) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub fn is_live(&self) -> bool {
        self.status().is_live()
    }

    pub(crate) fn mark_running(&self) {
        let mut state = self.lock();
        if state.status == SessionStatus::Starting {
            state.status = SessionStatus::Running;
        }
    }

    /// Applies one subprocess event. Returns the terminal status when the
    /// event ended the session. Events arriving after the session ended are
    /// dropped.
    pub fn apply(&self, event: StreamEvent) -> Option<SessionStatus> {
        let mut state = self.lock();
        if !state.status.is_live() {
            debug!(id = %self.id, "dropping event for finished session");
            return None;
        }
        match event {
            StreamEvent::Output(lines) | StreamEvent::Error(lines) => {
                state.buffer.append(lines);
                None
            }
            StreamEvent::Exit(0) => {
                state.status = SessionStatus::Stopped;
                Some(state.status)
            }
            StreamEvent::Exit(code) => {
                state.status = SessionStatus::Failed(code);
                Some(state.status)
            }
        }
    }

    /// User-initiated stop. Always signals the subprocess, even if it has
    /// already exited. Returns whether the session was still live.
    pub fn stop(&self) -> bool {
        let was_live = {
            let mut state = self.lock();
            let live = state.status.is_live();
            if live {
                state.status = SessionStatus::Stopped;
            }
            live
        };
        self.terminate.cancel();
        was_live
    }

    pub fn set_view_row(&self, row: usize) {
        self.lock().buffer.set_view_row(row);
    }

    pub fn snapshot(&self) -> LogSnapshot {
        let state = self.lock();
        LogSnapshot {
            id: self.id,
            lines: state.buffer.lines().map(str::to_string).collect(),
            view_row: state.buffer.view_row(),
            viewport_at_tail: state.buffer.viewport_at_tail(),
            status: state.status,
        }
    }

    fn stopped(&self) -> &CancellationToken {
        &self.terminate
    }
}

/// Turns a freshly spawned process into a registered, running session.
///
/// The session is registered before its pump starts reading, so any output
/// the process produced in the meantime is still queued in `process.events`.
#[tracing::instrument(skip(process, buffer, supervisor, notifier))]
pub fn start_session(
    target: LogTarget,
    process: LogProcess,
    buffer: LogBuffer,
    supervisor: Arc<Supervisor>,
    notifier: EventSender,
) -> Result<LogSession> {
    let LogProcess {
        pid,
        events,
        terminate,
    } = process;

    let id = match SessionId::from_pid(pid) {
        Ok(id) => id,
        Err(err) => {
            terminate.cancel();
            return Err(err);
        }
    };

    let session = LogSession::new(id, target, buffer, terminate);
    supervisor.register(session.clone());
    session.mark_running();
    info!(%id, pod = %session.target().pod, "log session started");

    spawn_pump(session.clone(), events, supervisor, notifier);
    Ok(session)
}

fn spawn_pump(
    session: LogSession,
    mut events: mpsc::UnboundedReceiver<StreamEvent>,
    supervisor: Arc<Supervisor>,
    notifier: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let id = session.id();
        loop {
            tokio::select! {
                biased;
                _ = session.stopped().cancelled() => {
                    debug!(%id, "log session stopped, discarding remaining output");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        // the process side went away without reporting an exit code
                        if session.stop() {
                            report(&notifier, &session, SessionStatus::Stopped);
                        }
                        break;
                    };
                    if let Some(status) = session.apply(event) {
                        session.stopped().cancel();
                        report(&notifier, &session, status);
                        break;
                    }
                }
            }
        }
        supervisor.unregister_session(&session);
    })
}

fn report(notifier: &EventSender, session: &LogSession, status: SessionStatus) {
    let target = session.target();
    let message = match status {
        SessionStatus::Failed(code) => {
            warn!(id = %session.id(), code, pod = %target.pod, "log stream exited with an error");
            format!("logs for {}/{} exited with code {}", target.namespace, target.pod, code)
        }
        _ => {
            info!(id = %session.id(), pod = %target.pod, "log stream finished");
            format!("logs for {}/{} finished", target.namespace, target.pod)
        }
    };

    let payload = json!({
        "id": session.id(),
        "status": status,
        "message": message,
    });
    notifier.notify_named("log_session", payload.to_string());
}
