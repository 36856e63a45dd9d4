use k8s_openapi::serde_json::{json, Value};
use kube::api::{Patch, PatchParams};
use kube::Client;
use tracing::info;

use super::restart::workload_api;
use crate::error::Result;
use crate::structs::WorkloadRef;

/// Strategic merge keys containers by name, so only `container` changes.
pub fn image_patch(container: &str, image: &str) -> Value {
    json!({
        "spec": {
            "template": {
                "spec": {
                    "containers": [{ "name": container, "image": image }]
                }
            }
        }
    })
}

#[tracing::instrument(skip(client))]
pub async fn set_image(
    client: &Client,
    workload: &WorkloadRef,
    container: &str,
    image: &str,
) -> Result<()> {
    let api = workload_api(client, workload.kind, workload.namespace.as_deref());
    let patch = image_patch(container, image);

    api.patch(
        &workload.name,
        &PatchParams::default(),
        &Patch::Strategic(&patch),
    )
    .await?;

    info!(name = %workload.name, container, image, "image updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_patch_targets_one_container() {
        let patch = image_patch("api", "ghcr.io/org/api:v2");
        let containers = patch["spec"]["template"]["spec"]["containers"]
            .as_array()
            .unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0]["name"], "api");
        assert_eq!(containers[0]["image"], "ghcr.io/org/api:v2");
    }
}
