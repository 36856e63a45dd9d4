use jiff::Timestamp;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Api, ListParams},
    Client,
};
use tracing::debug;

use crate::error::Result;
use crate::namespace::ScopeKey;
use crate::structs::{ContainerRecord, NamespaceRecord, PodRecord};
use crate::utils::age_between;

#[tracing::instrument(skip(client))]
pub async fn list_pods(client: &Client, scope: &ScopeKey) -> Result<Vec<PodRecord>> {
    let api: Api<Pod> = match scope {
        ScopeKey::All => Api::all(client.clone()),
        ScopeKey::Current => Api::default_namespaced(client.clone()),
        ScopeKey::Namespace(ns) => Api::namespaced(client.clone(), ns),
    };

    let list = api.list(&ListParams::default()).await?;
    debug!(count = list.items.len(), scope = %scope, "listed pods");

    let now = Timestamp::now();
    Ok(list.items.iter().map(|pod| pod_record(pod, &now)).collect())
}

#[tracing::instrument(skip(client))]
pub async fn list_namespaces(client: &Client) -> Result<Vec<NamespaceRecord>> {
    let api: Api<Namespace> = Api::all(client.clone());
    let list = api.list(&ListParams::default()).await?;

    let now = Timestamp::now();
    Ok(list
        .items
        .iter()
        .map(|ns| namespace_record(ns, &now))
        .collect())
}

pub fn pod_record(pod: &Pod, now: &Timestamp) -> PodRecord {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    let container_count = pod.spec.as_ref().map_or(0, |spec| spec.containers.len());
    let ready_count = statuses.iter().filter(|cs| cs.ready).count();
    let restarts = statuses.iter().map(|cs| cs.restart_count).sum();

    let containers = pod
        .spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .map(|c| ContainerRecord {
                    name: c.name.clone(),
                    image: c.image.clone().unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    PodRecord {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        phase: pod_phase(pod),
        ready: format!("{}/{}", ready_count, container_count),
        restarts,
        age: creation_age(pod.metadata.creation_timestamp.as_ref(), now),
        node: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
        containers,
    }
}

pub fn namespace_record(ns: &Namespace, now: &Timestamp) -> NamespaceRecord {
    NamespaceRecord {
        name: ns.metadata.name.clone().unwrap_or_default(),
        phase: ns
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        age: creation_age(ns.metadata.creation_timestamp.as_ref(), now),
    }
}

fn pod_phase(pod: &Pod) -> String {
    if pod.metadata.deletion_timestamp.is_some() {
        return "Terminating".to_string();
    }

    // a waiting container explains more than the pod phase does
    let waiting = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| {
            statuses.iter().find_map(|cs| {
                cs.state
                    .as_ref()
                    .and_then(|state| state.waiting.as_ref())
                    .and_then(|w| w.reason.clone())
            })
        });
    if let Some(reason) = waiting {
        return reason;
    }

    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Succeeded") => "Completed".to_string(),
        Some(phase) => phase.to_string(),
        None => "Unknown".to_string(),
    }
}

/// `Time` wraps a chrono `DateTime`; ages are computed with jiff at second
/// precision.
fn created_at(time: &Time) -> Option<Timestamp> {
    Timestamp::from_second(time.0.timestamp()).ok()
}

fn creation_age(created: Option<&Time>, now: &Timestamp) -> String {
    created
        .and_then(created_at)
        .map(|ts| age_between(&ts, now))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::serde_json::{self, json};

    fn now() -> Timestamp {
        "2024-06-10T12:00:00Z".parse().unwrap()
    }

    fn pod(value: serde_json::Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_pod_record_running() {
        let pod = pod(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "api-7d9f",
                "namespace": "prod",
                "creationTimestamp": "2024-06-10T10:00:00Z"
            },
            "spec": {
                "nodeName": "node-a",
                "containers": [
                    {"name": "api", "image": "ghcr.io/org/api:v1"},
                    {"name": "sidecar", "image": "envoy:1.30"}
                ]
            },
            "status": {
                "phase": "Running",
                "containerStatuses": [
                    {"name": "api", "ready": true, "restartCount": 2, "image": "", "imageID": ""},
                    {"name": "sidecar", "ready": false, "restartCount": 1, "image": "", "imageID": ""}
                ]
            }
        }));

        let record = pod_record(&pod, &now());
        assert_eq!(record.name, "api-7d9f");
        assert_eq!(record.namespace, "prod");
        assert_eq!(record.phase, "Running");
        assert_eq!(record.ready, "1/2");
        assert_eq!(record.restarts, 3);
        assert_eq!(record.age, "2h0m");
        assert_eq!(record.node.as_deref(), Some("node-a"));
        assert_eq!(record.containers.len(), 2);
        assert_eq!(record.containers[1].image, "envoy:1.30");
    }

    #[test]
    fn test_pod_record_waiting_reason_wins() {
        let pod = pod(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "worker", "namespace": "jobs"},
            "spec": {"containers": [{"name": "worker", "image": "worker:latest"}]},
            "status": {
                "phase": "Pending",
                "containerStatuses": [{
                    "name": "worker", "ready": false, "restartCount": 0,
                    "image": "", "imageID": "",
                    "state": {"waiting": {"reason": "ImagePullBackOff"}}
                }]
            }
        }));

        let record = pod_record(&pod, &now());
        assert_eq!(record.phase, "ImagePullBackOff");
        assert_eq!(record.ready, "0/1");
        assert_eq!(record.age, "unknown");
    }

    #[test]
    fn test_succeeded_pod_is_completed() {
        let pod = pod(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "migrate"},
            "status": {"phase": "Succeeded"}
        }));
        assert_eq!(pod_record(&pod, &now()).phase, "Completed");
    }

    #[test]
    fn test_namespace_record() {
        let ns: Namespace = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "kube-system", "creationTimestamp": "2024-06-01T12:00:00Z"},
            "status": {"phase": "Active"}
        }))
        .unwrap();

        let record = namespace_record(&ns, &now());
        assert_eq!(record.name, "kube-system");
        assert_eq!(record.phase, "Active");
        assert_eq!(record.age, "9d");
    }

    #[test]
    fn test_creation_age_from_api_time() {
        let time: Time = serde_json::from_value(json!("2024-06-10T11:30:45Z")).unwrap();
        assert_eq!(
            created_at(&time),
            Some("2024-06-10T11:30:45Z".parse().unwrap())
        );
        assert_eq!(creation_age(Some(&time), &now()), "29m15s");
        assert_eq!(creation_age(None, &now()), "unknown");
    }
}
