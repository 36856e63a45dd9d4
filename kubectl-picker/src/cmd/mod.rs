use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use std::sync::Arc;
use tracing::info;

use crate::client::{ClusterClient, LogProcess};
use crate::error::{Error, Result};
use crate::namespace::ScopeKey;
use crate::settings::SettingsHandle;
use crate::structs::{LogTarget, NamespaceRecord, PodRecord, WorkloadRef};

pub mod get;
pub mod log_stream;
pub mod restart;
pub mod set_image;

/// Cluster client backed by the Kubernetes API for queries and mutations and
/// by the `kubectl` binary for log streams.
///
/// The `kubectl` binary and tail length are read from `settings` each time a
/// command is built, so `setup` takes effect for the next stream.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    context: Option<String>,
    settings: Arc<SettingsHandle>,
}

impl KubeClient {
    pub fn new(client: Client, context: Option<String>, settings: Arc<SettingsHandle>) -> Self {
        Self {
            client,
            context,
            settings,
        }
    }

    #[tracing::instrument(skip(settings))]
    pub async fn from_kubeconfig(
        context: Option<String>,
        settings: Arc<SettingsHandle>,
    ) -> Result<Self> {
        let options = KubeConfigOptions {
            context: context.clone(),
            cluster: None,
            user: None,
        };
        let config = Config::from_kubeconfig(&options)
            .await
            .map_err(|e| Error::Connectivity(format!("kubeconfig: {e}")))?;
        let client = Client::try_from(config)?;

        info!(context = context.as_deref().unwrap_or("<default>"), "cluster client ready");
        Ok(Self::new(client, context, settings))
    }
}

impl ClusterClient for KubeClient {
    async fn list_pods(&self, scope: &ScopeKey) -> Result<Vec<PodRecord>> {
        get::list_pods(&self.client, scope).await
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceRecord>> {
        get::list_namespaces(&self.client).await
    }

    async fn get_current_namespace(&self) -> Result<String> {
        Ok(self.client.default_namespace().to_string())
    }

    async fn restart_workload(&self, workload: &WorkloadRef) -> Result<()> {
        restart::restart_workload(&self.client, workload).await
    }

    async fn set_image(&self, workload: &WorkloadRef, container: &str, image: &str) -> Result<()> {
        set_image::set_image(&self.client, workload, container, image).await
    }

    fn spawn_log_stream(&self, target: &LogTarget) -> Result<LogProcess> {
        log_stream::spawn_log_process(self.log_command(target))
    }

    fn log_command(&self, target: &LogTarget) -> Vec<String> {
        let settings = self.settings.load();
        let options = log_stream::LogCommandOptions {
            kubectl: &settings.kubectl_binary,
            context: self.context.as_deref(),
            tail_lines: settings.log_tail_lines,
        };
        log_stream::log_command(target, &options)
    }
}
