//! Registry of everything that keeps running in the background: log sessions
//! and recurring timers. `stop_all` is the shutdown path.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::log_session::{LogSession, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug)]
struct TimerEntry {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TimerEntry {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

#[derive(Debug)]
pub struct Supervisor {
    sessions: Mutex<HashMap<SessionId, LogSession>>,
    timers: Mutex<HashMap<TimerId, TimerEntry>>,
    timer_counter: AtomicUsize,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            timer_counter: AtomicUsize::new(1),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Supervisor {
    /// Tracks a session until it is stopped or its process exits. A stale
    /// entry under the same id is stopped first.
    pub fn register(&self, session: LogSession) {
        let previous = lock(&self.sessions).insert(session.id(), session);
        if let Some(previous) = previous {
            debug!(id = %previous.id(), "replacing stale session entry");
            previous.stop();
        }
    }

    /// Removes the entry without signalling. Idempotent.
    pub fn unregister(&self, id: SessionId) -> Option<LogSession> {
        let removed = lock(&self.sessions).remove(&id);
        if removed.is_some() {
            debug!(%id, "session unregistered");
        }
        removed
    }

    /// Removes `session` only if it is still the entry under its id. A newer
    /// session registered under a reused id stays put.
    pub fn unregister_session(&self, session: &LogSession) -> bool {
        let id = session.id();
        let mut sessions = lock(&self.sessions);
        match sessions.get(&id) {
            Some(current) if current.same_session(session) => {
                sessions.remove(&id);
                debug!(%id, "session unregistered");
                true
            }
            _ => false,
        }
    }

    /// Stops and forgets one session. Returns false if it was not registered.
    pub fn stop(&self, id: SessionId) -> bool {
        match self.unregister(id) {
            Some(session) => {
                session.stop();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: SessionId) -> Option<LogSession> {
        lock(&self.sessions).get(&id).cloned()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = lock(&self.sessions).keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn timer_count(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Runs `tick` every `period`, first after one full period, until the
    /// timer is cancelled. Must be called from within a Tokio runtime.
    pub fn register_timer<F, Fut>(&self, period: Duration, mut tick: F) -> TimerId
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = TimerId(self.timer_counter.fetch_add(1, Ordering::SeqCst));
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => tick().await,
                }
            }
            debug!(%id, "timer finished");
        });

        lock(&self.timers).insert(id, TimerEntry { cancel, task });
        info!(%id, period_secs = period.as_secs(), "timer registered");
        id
    }

    pub fn cancel_timer(&self, id: TimerId) -> bool {
        match lock(&self.timers).remove(&id) {
            Some(entry) => {
                entry.stop();
                true
            }
            None => false,
        }
    }

    /// Stops every session and timer and empties the registry. Safe to call
    /// repeatedly and on an empty registry.
    #[tracing::instrument(skip(self))]
    pub fn stop_all(&self) {
        let sessions: Vec<LogSession> = lock(&self.sessions).drain().map(|(_, s)| s).collect();
        let timers: Vec<TimerEntry> = lock(&self.timers).drain().map(|(_, t)| t).collect();

        if sessions.is_empty() && timers.is_empty() {
            return;
        }
        info!(
            sessions = sessions.len(),
            timers = timers.len(),
            "stopping supervised resources"
        );

        for session in sessions {
            session.stop();
        }
        for timer in timers {
            timer.stop();
        }
    }
}
