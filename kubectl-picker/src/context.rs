//! Everything the picker calls goes through `PickerContext`. It owns the cache,
//! the namespace state, the supervisor and the event queue, and talks to the
//! cluster through a `ClusterClient`.

use k8s_openapi::serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{ResourceCache, ResourceKind, CLUSTER_SCOPE};
use crate::client::ClusterClient;
use crate::error::{Error, Result};
use crate::event_queue::{Event, EventQueue};
use crate::log_session::{start_session, LogBuffer, LogSession, SessionId};
use crate::namespace::{NamespaceState, ScopeKey};
use crate::settings::{LogOutputMode, Settings, SettingsHandle};
use crate::structs::{LogTarget, NamespaceRecord, PodRecord, WorkloadRef};
use crate::supervisor::{Supervisor, TimerId};
use crate::utils::retag_image;

/// A list result. `stale` is set when the refresh failed and `items` is the
/// last good list for the same scope.
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Arc<Vec<T>>,
    pub scope: String,
    pub stale: Option<Error>,
}

impl<T> Listing<T> {
    fn fresh(items: Arc<Vec<T>>, scope: &str) -> Self {
        Self {
            items,
            scope: scope.to_string(),
            stale: None,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale.is_some()
    }
}

/// How a log request is served.
#[derive(Debug)]
pub enum LogView {
    Session(LogSession),
    /// Command line for the picker to run in a terminal of its own.
    External { command: Vec<String> },
}

pub struct PickerContext<C: ClusterClient> {
    client: C,
    settings: Arc<SettingsHandle>,
    namespace: RwLock<NamespaceState>,
    cache: ResourceCache,
    supervisor: Arc<Supervisor>,
    events: EventQueue,
    auto_refresh: Mutex<Option<TimerId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: ClusterClient> PickerContext<C> {
    pub fn new(client: C, settings: Arc<SettingsHandle>) -> Self {
        Self {
            client,
            settings,
            namespace: RwLock::new(NamespaceState::default()),
            cache: ResourceCache::default(),
            supervisor: Arc::new(Supervisor::default()),
            events: EventQueue::default(),
            auto_refresh: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Replaces the settings snapshot. Running sessions keep the buffer
    /// limits they were opened with.
    #[tracing::instrument(skip(self))]
    pub fn setup(&self, settings: Settings) -> Arc<Settings> {
        let applied = self.settings.replace(settings);
        info!(
            ttl = applied.ttl_seconds,
            mode = ?applied.log_output_mode,
            "settings applied"
        );
        applied
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load()
    }

    pub fn namespace_state(&self) -> NamespaceState {
        self.namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn scope_key(&self) -> ScopeKey {
        self.namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .scope_key()
    }

    fn update_namespace<R>(&self, f: impl FnOnce(&mut NamespaceState) -> R) -> R {
        let mut state = self
            .namespace
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub async fn list_pods(&self) -> Result<Listing<PodRecord>> {
        self.refresh(false).await
    }

    pub async fn refresh(&self, force: bool) -> Result<Listing<PodRecord>> {
        let scope = self.scope_key();
        self.list_pods_in(&scope, force).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_pods_in(&self, scope: &ScopeKey, force: bool) -> Result<Listing<PodRecord>> {
        let ttl = self.settings().ttl();
        let key = scope.cache_key();

        match self
            .cache
            .pods
            .get_or_fetch(&key, ttl, force, || self.client.list_pods(scope))
            .await
        {
            Ok(items) => Ok(Listing::fresh(items, scope.as_str())),
            Err(err) => match self.cache.pods.stale(&key).await {
                Some(items) => {
                    warn!(%scope, error = %err, "serving stale pods");
                    Ok(Listing {
                        items,
                        scope: scope.to_string(),
                        stale: Some(err),
                    })
                }
                None => Err(err),
            },
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_namespaces(&self, force: bool) -> Result<Listing<NamespaceRecord>> {
        let ttl = self.settings().ttl();

        match self
            .cache
            .namespaces
            .get_or_fetch(CLUSTER_SCOPE, ttl, force, || self.client.list_namespaces())
            .await
        {
            Ok(items) => Ok(Listing::fresh(items, CLUSTER_SCOPE)),
            Err(err) => match self.cache.namespaces.stale(CLUSTER_SCOPE).await {
                Some(items) => {
                    warn!(error = %err, "serving stale namespaces");
                    Ok(Listing {
                        items,
                        scope: CLUSTER_SCOPE.to_string(),
                        stale: Some(err),
                    })
                }
                None => Err(err),
            },
        }
    }

    pub fn toggle_scope(&self) -> ScopeKey {
        let scope = self.update_namespace(NamespaceState::toggle);
        debug!(%scope, "namespace scope toggled");
        scope
    }

    pub fn select_namespace(&self, name: &str) -> ScopeKey {
        let scope = self.update_namespace(|state| state.select(name));
        debug!(%scope, "namespace selected");
        scope
    }

    pub fn set_namespace_mode(&self, raw: &str) -> Result<ScopeKey> {
        self.update_namespace(|state| state.set_mode(raw))
    }

    /// The namespace the cluster client defaults to, asked once and then
    /// remembered until `invalidate_all`.
    pub async fn current_namespace(&self) -> Result<String> {
        let cached = self
            .namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current_namespace_cached()
            .map(str::to_string);
        if let Some(ns) = cached {
            return Ok(ns);
        }

        let ns = self.client.get_current_namespace().await?;
        self.update_namespace(|state| state.cache_current_namespace(ns.clone()));
        Ok(ns)
    }

    pub async fn invalidate(&self, kind: ResourceKind) {
        self.cache.invalidate(kind).await;
    }

    pub async fn invalidate_named(&self, key: &str) -> Result<()> {
        self.cache.invalidate_named(key).await
    }

    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all().await;
        self.update_namespace(NamespaceState::forget_current_namespace);
    }

    /// Opens a log stream according to the configured output mode. Must be
    /// called from within a Tokio runtime.
    #[tracing::instrument(skip(self))]
    pub fn open_log_session(&self, target: LogTarget) -> Result<LogView> {
        if target.pod.trim().is_empty() || target.namespace.trim().is_empty() {
            return Err(Error::InvalidInput(
                "log target needs a pod and a namespace".into(),
            ));
        }

        let settings = self.settings();
        match settings.log_output_mode {
            LogOutputMode::ExternalTerminal => Ok(LogView::External {
                command: self.client.log_command(&target),
            }),
            LogOutputMode::StreamBuffer => {
                let process = self.client.spawn_log_stream(&target)?;
                let buffer =
                    LogBuffer::new(settings.log_buffer_max_lines, settings.log_follow_mode);
                let session = start_session(
                    target,
                    process,
                    buffer,
                    self.supervisor.clone(),
                    self.events.sender(),
                )?;
                Ok(LogView::Session(session))
            }
        }
    }

    pub fn stop_log_session(&self, id: SessionId) -> bool {
        let stopped = self.supervisor.stop(id);
        debug!(%id, stopped, "stop requested");
        stopped
    }

    pub fn log_session(&self, id: SessionId) -> Option<LogSession> {
        self.supervisor.get(id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn restart(&self, workload: &WorkloadRef) -> Result<String> {
        self.client.restart_workload(workload).await?;
        self.cache.invalidate(ResourceKind::Pods).await;
        Ok(format!(
            "{}/{} restarted",
            workload.kind.kind().to_lowercase(),
            workload.name
        ))
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_image(
        &self,
        workload: &WorkloadRef,
        container: &str,
        current_image: &str,
        new_tag: &str,
    ) -> Result<String> {
        if container.trim().is_empty() {
            return Err(Error::InvalidInput("container name must not be empty".into()));
        }
        let image = retag_image(current_image, new_tag)?;

        self.client.set_image(workload, container, &image).await?;
        self.cache.invalidate(ResourceKind::Pods).await;
        Ok(format!(
            "{}/{} container {} set to {}",
            workload.kind.kind().to_lowercase(),
            workload.name,
            container,
            image
        ))
    }

    /// (Re)starts the periodic pod refresh from the current settings. Returns
    /// `None` when auto refresh is off. Must be called from within a Tokio
    /// runtime.
    pub fn start_auto_refresh(self: &Arc<Self>) -> Option<TimerId> {
        let mut slot = lock(&self.auto_refresh);
        if let Some(previous) = slot.take() {
            self.supervisor.cancel_timer(previous);
        }

        let settings = self.settings();
        if !settings.auto_refresh {
            return None;
        }

        let context = Arc::downgrade(self);
        let id = self
            .supervisor
            .register_timer(settings.auto_refresh_interval(), move || {
                let context = context.clone();
                async move {
                    if let Some(context) = context.upgrade() {
                        context.auto_refresh_tick().await;
                    }
                }
            });
        *slot = Some(id);
        Some(id)
    }

    pub fn stop_auto_refresh(&self) -> bool {
        match lock(&self.auto_refresh).take() {
            Some(id) => self.supervisor.cancel_timer(id),
            None => false,
        }
    }

    async fn auto_refresh_tick(&self) {
        let scope = self.scope_key();
        let payload = match self.list_pods_in(&scope, true).await {
            Ok(listing) => json!({
                "scope": listing.scope,
                "count": listing.items.len(),
                "stale": listing.stale.as_ref().map(|e| e.to_string()),
            }),
            Err(err) => {
                warn!(%scope, error = %err, "auto refresh failed");
                json!({
                    "scope": scope.as_str(),
                    "error": err.to_string(),
                    "kind": err.kind(),
                })
            }
        };
        self.events.notify_named("pods", payload.to_string());
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn pop_events(&self) -> Vec<Event> {
        self.events.pop_all()
    }

    /// Stops every session and timer. Safe to call more than once.
    pub fn shutdown(&self) {
        lock(&self.auto_refresh).take();
        self.supervisor.stop_all();
    }
}
