//! Orchestration of resource lifecycles on the cluster.
//!
//! [`Framework`] wraps the cluster client with an API optimized for
//! implementing connectivity scenarios: every create captures the control
//! plane's generated name, every wait goes through the bounded poller.

use std::sync::Arc;

use k8s_openapi::{
    api::core::v1::{Node, Pod},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use tracing::info;

use crate::{
    client::ClusterClient,
    config::Timings,
    error::{Error, ResourceKind, Result},
    resource,
    wait::{poll_until, Observation},
};

/// Name plus namespace of a created namespaced resource.
#[derive(Debug, Clone)]
pub struct Handle {
    pub name: String,
    pub namespace: String,
}

/// High-level lifecycle operations on top of a [`ClusterClient`].
pub struct Framework {
    client: Arc<dyn ClusterClient>,
    timings: Timings,
}

impl Framework {
    pub fn new(client: Arc<dyn ClusterClient>, timings: Timings) -> Self {
        Self { client, timings }
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    /// Create a namespace named by the control plane from `prefix` and
    /// return the generated name.
    pub async fn create_namespace(&self, prefix: &str) -> Result<String> {
        let created = self
            .client
            .create_namespace(&resource::make_namespace(prefix))
            .await?;
        let name = created_name(ResourceKind::Namespace, &created.metadata)?;
        info!(%name, "namespace created");
        Ok(name)
    }

    pub async fn delete_namespace(&self, name: &str) -> Result<()> {
        info!(%name, "namespace deletion requested");
        self.client.delete_namespace(name).await
    }

    /// Poll until a get-by-name misses. A namespace still `Terminating` at
    /// the deadline is reported as a deadline error carrying that phase,
    /// never silently treated as gone.
    pub async fn await_namespace_gone(&self, name: &str) -> Result<()> {
        poll_until(
            self.timings.poll_interval,
            self.timings.deletion_deadline,
            || async move {
                match self.client.get_namespace(name).await {
                    Ok(namespace) => {
                        let phase = namespace
                            .status
                            .and_then(|status| status.phase)
                            .unwrap_or_else(|| String::from("unknown"));
                        Ok(Observation::Pending(format!(
                            "namespace {} phase {}",
                            name, phase
                        )))
                    }
                    Err(error) if error.is_not_found() => Ok(Observation::Met(())),
                    Err(error) => Err(error),
                }
            },
        )
        .await
    }

    /// Create a diagnostic pod, optionally pinned to `node_name`.
    pub async fn create_pod(
        &self,
        prefix: &str,
        namespace: &str,
        node_name: Option<&str>,
    ) -> Result<Handle> {
        let created = self
            .client
            .create_pod(&resource::make_pod(prefix, namespace, node_name))
            .await?;
        let name = created_name(ResourceKind::Pod, &created.metadata)?;
        info!(%name, %namespace, node = node_name.unwrap_or("<any>"), "pod created");
        Ok(Handle {
            name,
            namespace: namespace.to_owned(),
        })
    }

    /// Poll until the pod reports the `Running` phase.
    ///
    /// A pod that lands in a terminal phase before use is a hard error: it
    /// must be recreated, not retried in place.
    pub async fn await_pod_running(&self, handle: &Handle) -> Result<()> {
        poll_until(
            self.timings.poll_interval,
            self.timings.ready_deadline,
            || async move {
                let pod = self.client.get_pod(&handle.name, &handle.namespace).await?;
                let phase = pod_phase(&pod);
                match phase.as_str() {
                    "Running" => Ok(Observation::Met(())),
                    "Failed" | "Succeeded" => Err(Error::Infrastructure {
                        kind: ResourceKind::Pod,
                        name: handle.name.clone(),
                        message: format!("reached terminal phase {} before use", phase),
                    }),
                    _ => Ok(Observation::Pending(format!(
                        "pod {} phase {}",
                        handle.name, phase
                    ))),
                }
            },
        )
        .await
    }

    /// Poll until the pod's network address is populated and return it.
    /// The address field is undefined before the pod runs, so an empty
    /// value is retried rather than returned.
    pub async fn await_pod_address(&self, handle: &Handle) -> Result<String> {
        poll_until(
            self.timings.poll_interval,
            self.timings.ready_deadline,
            || async move {
                let pod = self.client.get_pod(&handle.name, &handle.namespace).await?;
                let address = pod
                    .status
                    .and_then(|status| status.pod_ip)
                    .filter(|ip| !ip.is_empty());
                Ok(match address {
                    Some(ip) => Observation::Met(ip),
                    None => Observation::Pending(format!(
                        "pod {} has no address yet",
                        handle.name
                    )),
                })
            },
        )
        .await
    }

    pub async fn delete_pod(&self, handle: &Handle) -> Result<()> {
        info!(name = %handle.name, namespace = %handle.namespace, "pod deletion requested");
        self.client.delete_pod(&handle.name, &handle.namespace).await
    }

    pub async fn await_pod_gone(&self, handle: &Handle) -> Result<()> {
        poll_until(
            self.timings.poll_interval,
            self.timings.deletion_deadline,
            || async move {
                match self.client.get_pod(&handle.name, &handle.namespace).await {
                    Ok(pod) => Ok(Observation::Pending(format!(
                        "pod {} phase {}",
                        handle.name,
                        pod_phase(&pod)
                    ))),
                    Err(error) if error.is_not_found() => Ok(Observation::Met(())),
                    Err(error) => Err(error),
                }
            },
        )
        .await
    }

    /// Create a daemonset spanning every eligible node.
    pub async fn create_daemon_set(&self, prefix: &str, namespace: &str) -> Result<Handle> {
        let created = self
            .client
            .create_daemon_set(&resource::make_daemon_set(prefix, namespace))
            .await?;
        let name = created_name(ResourceKind::DaemonSet, &created.metadata)?;
        info!(%name, %namespace, "daemonset created");
        Ok(Handle {
            name,
            namespace: namespace.to_owned(),
        })
    }

    /// Poll until every desired replica is both ready and available.
    /// Readiness is defined by the replica counts alone; requiring at least
    /// one scheduled replica closes the all-zeroes window right after
    /// creation.
    pub async fn await_daemon_set_ready(&self, handle: &Handle) -> Result<()> {
        poll_until(
            self.timings.poll_interval,
            self.timings.ready_deadline,
            || async move {
                let daemon_set = self
                    .client
                    .get_daemon_set(&handle.name, &handle.namespace)
                    .await?;
                let status = daemon_set.status.unwrap_or_default();
                let desired = status.desired_number_scheduled;
                let ready = status.number_ready;
                let available = status.number_available.unwrap_or(0);
                if desired > 0 && desired == ready && desired == available {
                    Ok(Observation::Met(()))
                } else {
                    Ok(Observation::Pending(format!(
                        "daemonset {} desired {} ready {} available {}",
                        handle.name, desired, ready, available
                    )))
                }
            },
        )
        .await
    }

    pub async fn delete_daemon_set(&self, handle: &Handle) -> Result<()> {
        info!(name = %handle.name, namespace = %handle.namespace, "daemonset deletion requested");
        self.client
            .delete_daemon_set(&handle.name, &handle.namespace)
            .await
    }

    pub async fn await_daemon_set_gone(&self, handle: &Handle) -> Result<()> {
        poll_until(
            self.timings.poll_interval,
            self.timings.deletion_deadline,
            || async move {
                match self
                    .client
                    .get_daemon_set(&handle.name, &handle.namespace)
                    .await
                {
                    Ok(_) => Ok(Observation::Pending(format!(
                        "daemonset {} still present",
                        handle.name
                    ))),
                    Err(error) if error.is_not_found() => Ok(Observation::Met(())),
                    Err(error) => Err(error),
                }
            },
        )
        .await
    }

    /// Enumerate the pods a daemonset put on the nodes, by label.
    pub async fn list_daemon_set_pods(&self, namespace: &str) -> Result<Vec<Handle>> {
        let pods = self
            .client
            .list_pods(namespace, &resource::daemon_label_selector())
            .await?;
        pods.into_iter()
            .map(|pod| {
                created_name(ResourceKind::Pod, &pod.metadata).map(|name| Handle {
                    name,
                    namespace: namespace.to_owned(),
                })
            })
            .collect()
    }

    /// Names of the nodes whose `Ready` condition is `True`.
    pub async fn list_ready_nodes(&self) -> Result<Vec<String>> {
        let nodes = self.client.list_nodes().await?;
        Ok(nodes
            .into_iter()
            .filter(node_is_ready)
            .filter_map(|node| node.metadata.name)
            .collect())
    }
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        })
        .unwrap_or(false)
}

fn pod_phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_else(|| String::from("unknown"))
}

fn created_name(kind: ResourceKind, metadata: &ObjectMeta) -> Result<String> {
    metadata.name.clone().ok_or_else(|| Error::Infrastructure {
        kind,
        name: metadata.generate_name.clone().unwrap_or_default(),
        message: String::from("control plane returned no generated name"),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::MockCluster;

    fn fast_timings() -> Timings {
        Timings {
            poll_interval: Duration::from_secs(1),
            probe_interval: Duration::from_secs(1),
            ready_deadline: Duration::from_secs(30),
            deletion_deadline: Duration::from_secs(30),
            probe_deadline: Duration::from_secs(30),
            probe_attempt_timeout: Duration::from_secs(5),
        }
    }

    fn framework_over(cluster: MockCluster) -> Framework {
        Framework::new(Arc::new(cluster), fast_timings())
    }

    #[tokio::test(start_paused = true)]
    async fn pod_becomes_ready_after_the_reported_transition() {
        let framework = framework_over(MockCluster::new(1).pod_ready_after(3));
        let handle = framework.create_pod("alpha-", "default", None).await.unwrap();
        framework.await_pod_running(&handle).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pod_readiness_times_out_when_the_deadline_is_too_short() {
        let mut timings = fast_timings();
        timings.ready_deadline = Duration::from_secs(2);
        let framework =
            Framework::new(Arc::new(MockCluster::new(1).pod_ready_after(10)), timings);
        let handle = framework.create_pod("alpha-", "default", None).await.unwrap();
        let error = framework.await_pod_running(&handle).await.unwrap_err();
        match error {
            Error::DeadlineExceeded { last_observed, .. } => {
                assert!(last_observed.contains("Pending"), "{}", last_observed);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pod_landing_in_a_terminal_phase_is_a_hard_error() {
        let framework = framework_over(
            MockCluster::new(1)
                .pod_ready_after(1)
                .pod_final_phase("Failed"),
        );
        let handle = framework.create_pod("alpha-", "default", None).await.unwrap();
        let error = framework.await_pod_running(&handle).await.unwrap_err();
        match error {
            Error::Infrastructure { message, .. } => {
                assert!(message.contains("Failed"), "{}", message);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_addresses_are_retried_never_returned() {
        let framework = framework_over(MockCluster::new(1).address_lag(2));
        let handle = framework.create_pod("alpha-", "default", None).await.unwrap();
        framework.await_pod_running(&handle).await.unwrap();
        let address = framework.await_pod_address(&handle).await.unwrap();
        assert!(!address.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn await_gone_is_immediate_for_an_absent_resource() {
        let framework = framework_over(MockCluster::new(1));
        let started = tokio::time::Instant::now();
        framework.await_namespace_gone("never-existed").await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn terminating_namespaces_are_polled_until_gone() {
        let framework = framework_over(MockCluster::new(1).terminating_observations(3));
        let name = framework.create_namespace("nettest-").await.unwrap();
        framework.delete_namespace(&name).await.unwrap();
        framework.await_namespace_gone(&name).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_terminating_reports_the_observed_phase() {
        let mut timings = fast_timings();
        timings.deletion_deadline = Duration::from_secs(2);
        let framework = Framework::new(
            Arc::new(MockCluster::new(1).terminating_observations(100)),
            timings,
        );
        let name = framework.create_namespace("nettest-").await.unwrap();
        framework.delete_namespace(&name).await.unwrap();
        let error = framework.await_namespace_gone(&name).await.unwrap_err();
        match error {
            Error::DeadlineExceeded { last_observed, .. } => {
                assert!(last_observed.contains("Terminating"), "{}", last_observed);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn daemon_set_readiness_requires_replica_convergence() {
        let framework = framework_over(MockCluster::new(3).ds_ready_after(2));
        let namespace = framework.create_namespace("nettest-").await.unwrap();
        let handle = framework.create_daemon_set("daemon-", &namespace).await.unwrap();
        framework.await_daemon_set_ready(&handle).await.unwrap();
        let pods = framework.list_daemon_set_pods(&namespace).await.unwrap();
        assert_eq!(pods.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn only_ready_nodes_are_listed() {
        let framework = framework_over(MockCluster::new(2));
        let nodes = framework.list_ready_nodes().await.unwrap();
        assert_eq!(nodes, vec!["node-0", "node-1"]);
    }
}
