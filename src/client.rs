//! Cluster access.
//!
//! The framework talks to the control plane exclusively through the
//! [`ClusterClient`] trait so tests can substitute a scripted cluster. The
//! production implementation, [`KubectlClient`], drives `kubectl`
//! subprocesses and exchanges typed objects as JSON.

use std::{io::Write, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::DaemonSet,
    core::v1::{Namespace, Node, Pod},
};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::error::{Error, ResourceKind, Result};

/// Captured output of a command run inside a pod.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Typed operations against the cluster control plane.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace>;
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;
    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod>;
    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<()>;
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    async fn create_daemon_set(&self, daemon_set: &DaemonSet) -> Result<DaemonSet>;
    async fn get_daemon_set(&self, name: &str, namespace: &str) -> Result<DaemonSet>;
    async fn delete_daemon_set(&self, name: &str, namespace: &str) -> Result<()>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Run `command` inside `pod`, capturing both output streams. No stdin,
    /// no TTY.
    async fn exec(&self, pod: &str, namespace: &str, command: &[&str]) -> Result<ExecOutput>;
}

/// A [`ClusterClient`] backed by `kubectl` subprocesses.
#[derive(Debug)]
pub struct KubectlClient {
    kubectl_command: String,
    kubeconfig: Option<PathBuf>,
}

impl KubectlClient {
    pub fn new(kubectl_command: impl Into<String>, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            kubectl_command: kubectl_command.into(),
            kubeconfig,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.kubectl_command);
        if let Some(path) = &self.kubeconfig {
            command.arg("--kubeconfig").arg(path);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        // A dropped in-flight call must not leave a kubectl behind.
        command.kill_on_drop(true);
        command
    }

    async fn run(kind: ResourceKind, name: &str, mut command: Command) -> Result<String> {
        let output = command.output().await.map_err(|error| Error::Infrastructure {
            kind,
            name: name.to_owned(),
            message: error.to_string(),
        })?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_failure(kind, name, &stderr))
        }
    }

    async fn create<T>(&self, kind: ResourceKind, prefix: &str, resource: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let file = resource_file(kind, prefix, resource)?;
        let mut command = self.command();
        command
            .arg("create")
            .arg("-f")
            .arg(file.path())
            .arg("-o")
            .arg("json");
        let stdout = Self::run(kind, prefix, command).await?;
        parse(kind, prefix, &stdout)
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let prefix = generate_name_of(&namespace.metadata);
        self.create(ResourceKind::Namespace, prefix, namespace).await
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let mut command = self.command();
        command.arg("get").arg("namespace").arg(name).arg("-o").arg("json");
        let stdout = Self::run(ResourceKind::Namespace, name, command).await?;
        parse(ResourceKind::Namespace, name, &stdout)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut command = self.command();
        command
            .arg("delete")
            .arg("namespace")
            .arg(name)
            .arg("--wait=false");
        Self::run(ResourceKind::Namespace, name, command).await?;
        Ok(())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let prefix = generate_name_of(&pod.metadata);
        self.create(ResourceKind::Pod, prefix, pod).await
    }

    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod> {
        let mut command = self.command();
        command
            .arg("get")
            .arg("pod")
            .arg(name)
            .arg("-n")
            .arg(namespace)
            .arg("-o")
            .arg("json");
        let stdout = Self::run(ResourceKind::Pod, name, command).await?;
        parse(ResourceKind::Pod, name, &stdout)
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<()> {
        let mut command = self.command();
        command
            .arg("delete")
            .arg("pod")
            .arg(name)
            .arg("-n")
            .arg(namespace)
            .arg("--wait=false");
        Self::run(ResourceKind::Pod, name, command).await?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let mut command = self.command();
        command
            .arg("get")
            .arg("pods")
            .arg("-n")
            .arg(namespace)
            .arg("-l")
            .arg(label_selector)
            .arg("-o")
            .arg("json");
        let stdout = Self::run(ResourceKind::Pod, label_selector, command).await?;
        let list: k8s_openapi::List<Pod> = parse(ResourceKind::Pod, label_selector, &stdout)?;
        Ok(list.items)
    }

    async fn create_daemon_set(&self, daemon_set: &DaemonSet) -> Result<DaemonSet> {
        let prefix = generate_name_of(&daemon_set.metadata);
        self.create(ResourceKind::DaemonSet, prefix, daemon_set).await
    }

    async fn get_daemon_set(&self, name: &str, namespace: &str) -> Result<DaemonSet> {
        let mut command = self.command();
        command
            .arg("get")
            .arg("daemonset")
            .arg(name)
            .arg("-n")
            .arg(namespace)
            .arg("-o")
            .arg("json");
        let stdout = Self::run(ResourceKind::DaemonSet, name, command).await?;
        parse(ResourceKind::DaemonSet, name, &stdout)
    }

    async fn delete_daemon_set(&self, name: &str, namespace: &str) -> Result<()> {
        let mut command = self.command();
        command
            .arg("delete")
            .arg("daemonset")
            .arg(name)
            .arg("-n")
            .arg(namespace)
            .arg("--wait=false");
        Self::run(ResourceKind::DaemonSet, name, command).await?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let mut command = self.command();
        command.arg("get").arg("nodes").arg("-o").arg("json");
        let stdout = Self::run(ResourceKind::Node, "*", command).await?;
        let list: k8s_openapi::List<Node> = parse(ResourceKind::Node, "*", &stdout)?;
        Ok(list.items)
    }

    async fn exec(&self, pod: &str, namespace: &str, command: &[&str]) -> Result<ExecOutput> {
        let mut kubectl = self.command();
        kubectl.arg("exec").arg(pod).arg("-n").arg(namespace).arg("--");
        kubectl.args(command);
        let output = kubectl.output().await.map_err(|error| Error::ExecFailed {
            pod: pod.to_owned(),
            namespace: namespace.to_owned(),
            message: error.to_string(),
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(Error::ExecFailed {
                pod: pod.to_owned(),
                namespace: namespace.to_owned(),
                message: if stderr.trim().is_empty() {
                    output.status.to_string()
                } else {
                    stderr.trim().to_owned()
                },
            });
        }
        Ok(ExecOutput { stdout, stderr })
    }
}

fn generate_name_of(metadata: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> &str {
    metadata
        .generate_name
        .as_deref()
        .or(metadata.name.as_deref())
        .unwrap_or("<unnamed>")
}

/// Map a failed kubectl invocation onto the error taxonomy. The control
/// plane reports misses as `Error from server (NotFound)`.
fn classify_failure(kind: ResourceKind, name: &str, stderr: &str) -> Error {
    if stderr.contains("(NotFound)") {
        Error::NotFound {
            kind,
            name: name.to_owned(),
        }
    } else {
        Error::Infrastructure {
            kind,
            name: name.to_owned(),
            message: stderr.trim().to_owned(),
        }
    }
}

fn parse<T: DeserializeOwned>(kind: ResourceKind, name: &str, json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|error| Error::Infrastructure {
        kind,
        name: name.to_owned(),
        message: format!("unparseable response: {}", error),
    })
}

fn resource_file<T: Serialize>(kind: ResourceKind, name: &str, resource: &T) -> Result<NamedTempFile> {
    let to_infrastructure = |message: String| Error::Infrastructure {
        kind,
        name: name.to_owned(),
        message,
    };
    let json = serde_json::to_string(resource).map_err(|error| to_infrastructure(error.to_string()))?;
    let mut file = NamedTempFile::new().map_err(|error| to_infrastructure(error.to_string()))?;
    file.write_all(json.as_bytes())
        .map_err(|error| to_infrastructure(error.to_string()))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_misses_map_to_not_found() {
        let error = classify_failure(
            ResourceKind::Pod,
            "alpha-x7k2f",
            "Error from server (NotFound): pods \"alpha-x7k2f\" not found\n",
        );
        assert!(error.is_not_found());
    }

    #[test]
    fn other_server_failures_map_to_infrastructure() {
        let error = classify_failure(
            ResourceKind::Namespace,
            "nettest-",
            "Error from server (Forbidden): namespaces is forbidden\n",
        );
        match error {
            Error::Infrastructure { message, .. } => {
                assert!(message.contains("Forbidden"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn created_objects_round_trip_through_json() {
        let pod = crate::resource::make_pod("alpha-", "ns-1", None);
        let json = serde_json::to_string(&pod).unwrap();
        let parsed: Pod = parse(ResourceKind::Pod, "alpha-", &json).unwrap();
        assert_eq!(parsed.metadata.generate_name.as_deref(), Some("alpha-"));
    }
}
