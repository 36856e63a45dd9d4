//! The narrow interface the core uses to talk to the cluster.

use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::namespace::ScopeKey;
use crate::structs::{LogTarget, NamespaceRecord, PodRecord, WorkloadRef};

/// Something a log-stream subprocess reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Output(Vec<String>),
    Error(Vec<String>),
    Exit(i32),
}

/// A spawned log stream. Events are queued in `events` from the moment the
/// process starts, so nothing is lost before a session starts consuming them.
/// Cancelling `terminate` asks the process to stop; it is safe to cancel more
/// than once or after the process has exited.
#[derive(Debug)]
pub struct LogProcess {
    pub pid: i64,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
    pub terminate: CancellationToken,
}

pub trait ClusterClient: Send + Sync + 'static {
    fn list_pods(&self, scope: &ScopeKey) -> impl Future<Output = Result<Vec<PodRecord>>> + Send;

    fn list_namespaces(&self) -> impl Future<Output = Result<Vec<NamespaceRecord>>> + Send;

    fn get_current_namespace(&self) -> impl Future<Output = Result<String>> + Send;

    fn restart_workload(&self, workload: &WorkloadRef) -> impl Future<Output = Result<()>> + Send;

    fn set_image(
        &self,
        workload: &WorkloadRef,
        container: &str,
        image: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Starts following `target`. Must be called from within a Tokio runtime.
    fn spawn_log_stream(&self, target: &LogTarget) -> Result<LogProcess>;

    /// The command line that follows `target`, for running in a terminal.
    fn log_command(&self, target: &LogTarget) -> Vec<String>;
}
