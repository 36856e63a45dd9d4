use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub ready: String,
    pub restarts: i32,
    pub age: String,
    pub node: Option<String>,
    pub containers: Vec<ContainerRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    pub name: String,
    pub phase: String,
    pub age: String,
}

/// What a log stream follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTarget {
    pub pod: String,
    #[serde(default)]
    pub container: Option<String>,
    pub namespace: String,
    #[serde(default)]
    pub timestamps: bool,
    /// Duration like "5m" or "1h".
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub previous: bool,
}

impl LogTarget {
    pub fn new(pod: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            container: None,
            namespace: namespace.into(),
            timestamps: false,
            since: None,
            previous: false,
        }
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl WorkloadKind {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
        }
    }
}

impl FromStr for WorkloadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deployment" | "deployments" | "deploy" => Ok(WorkloadKind::Deployment),
            "statefulset" | "statefulsets" | "sts" => Ok(WorkloadKind::StatefulSet),
            "daemonset" | "daemonsets" | "ds" => Ok(WorkloadKind::DaemonSet),
            other => Err(Error::InvalidInput(format!(
                "unsupported workload kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
    /// `None` targets the client's current namespace.
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CmdUpdateImageArgs {
    pub workload: WorkloadRef,
    pub container: String,
    pub current_image: String,
    pub new_tag: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::serde_json;

    #[test]
    fn test_log_target_defaults() {
        let target: LogTarget =
            serde_json::from_str(r#"{"pod": "web-0", "namespace": "prod"}"#).unwrap();
        assert_eq!(target, LogTarget::new("web-0", "prod"));
    }

    #[test]
    fn test_workload_kind_aliases() {
        assert_eq!("deploy".parse::<WorkloadKind>().unwrap(), WorkloadKind::Deployment);
        assert_eq!("StatefulSet".parse::<WorkloadKind>().unwrap(), WorkloadKind::StatefulSet);
        assert!("cronjob".parse::<WorkloadKind>().is_err());
    }
}
