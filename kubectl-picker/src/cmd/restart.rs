use jiff::Timestamp;
use k8s_openapi::serde_json;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::Client;
use tracing::info;

use crate::error::Result;
use crate::structs::{WorkloadKind, WorkloadRef};

pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

pub fn workload_resource(kind: WorkloadKind) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", kind.kind()))
}

pub fn workload_api(client: &Client, kind: WorkloadKind, namespace: Option<&str>) -> Api<DynamicObject> {
    let ar = workload_resource(kind);
    match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
        None => Api::default_namespaced_with(client.clone(), &ar),
    }
}

/// Same patch `kubectl rollout restart` sends: bumping a pod template
/// annotation makes the controller roll every pod.
pub fn restart_patch(now: Timestamp) -> serde_json::Value {
    serde_json::json!({
      "spec": {
        "template": {
          "metadata": {
            "annotations": {
              RESTARTED_AT_ANNOTATION: now.to_string()
            }
          }
        }
      }
    })
}

#[tracing::instrument(skip(client))]
pub async fn restart_workload(client: &Client, workload: &WorkloadRef) -> Result<()> {
    let api = workload_api(client, workload.kind, workload.namespace.as_deref());
    let patch = restart_patch(Timestamp::now());

    api.patch(&workload.name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    info!(kind = workload.kind.kind(), name = %workload.name, "workload restarted");
    Ok(())
}
