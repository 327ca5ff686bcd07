//! Sequential driver for the scenario matrix.

use tracing::{error, info, warn};

use crate::{
    config::Timings,
    error::{Error, ResourceKind, Result},
    framework::{Framework, Handle},
    probe::Prober,
    scenario::{NamespaceScope, Outcome, Placement, Report, Scenario},
    wait::{poll_until, Observation},
};

const NAMESPACE_PREFIX: &str = "nettest-";
const ALPHA_PREFIX: &str = "alpha-";
const BETA_PREFIX: &str = "beta-";
const DAEMON_SET_PREFIX: &str = "nettest-daemon-";
const DEFAULT_NAMESPACE: &str = "default";

/// Runs the matrix strictly sequentially: one scenario's resources are
/// fully torn down before the next begins, so failure attribution stays
/// unambiguous.
pub struct Runner {
    framework: Framework,
    prober: Prober,
    timings: Timings,
    external_host: String,
    external_address: String,
}

/// Resources a scenario created and is responsible for removing.
///
/// Pods whose namespace is scenario-owned are covered by the namespace
/// deletion; pods placed in the fixed `default` namespace are deleted
/// individually.
#[derive(Debug, Default)]
struct OwnedResources {
    namespaces: Vec<String>,
    pods: Vec<Handle>,
    daemon_sets: Vec<Handle>,
}

enum Verdict {
    Completed,
    Skipped(String),
}

impl Runner {
    pub fn new(
        framework: Framework,
        prober: Prober,
        external_host: impl Into<String>,
        external_address: impl Into<String>,
    ) -> Self {
        let timings = framework.timings();
        Self {
            framework,
            prober,
            timings,
            external_host: external_host.into(),
            external_address: external_address.into(),
        }
    }

    /// Run every scenario in the matrix and collect the per-scenario
    /// reports. A failing scenario never blocks the rest of the matrix.
    pub async fn run(&self) -> Vec<Report> {
        let mut reports = Vec::new();
        for scenario in Scenario::matrix() {
            let name = scenario.name();
            info!(scenario = %name, "scenario started");
            let report = self.run_scenario(&scenario).await;
            match &report.outcome {
                Outcome::Passed => info!(scenario = %name, "scenario passed"),
                Outcome::Skipped { reason } => {
                    warn!(scenario = %name, %reason, "scenario skipped")
                }
                Outcome::Unreachable {
                    source,
                    destination,
                } => {
                    error!(scenario = %name, %source, %destination, "scenario failed")
                }
                Outcome::Aborted(error) => error!(scenario = %name, %error, "scenario aborted"),
            }
            reports.push(report);
        }
        reports
    }

    async fn run_scenario(&self, scenario: &Scenario) -> Report {
        let mut owned = OwnedResources::default();
        let result = self.execute(scenario, &mut owned).await;
        // Cleanup runs whatever the body did.
        self.teardown(owned).await;
        let outcome = match result {
            Ok(Verdict::Completed) => Outcome::Passed,
            Ok(Verdict::Skipped(reason)) => Outcome::Skipped { reason },
            Err(Error::Unreachable {
                source,
                destination,
            }) => Outcome::Unreachable {
                source,
                destination,
            },
            Err(error) => Outcome::Aborted(error),
        };
        Report {
            scenario: scenario.name(),
            outcome,
        }
    }

    async fn execute(&self, scenario: &Scenario, owned: &mut OwnedResources) -> Result<Verdict> {
        match scenario {
            Scenario::PodToPod { placement, scope } => {
                self.pod_to_pod(*placement, *scope, owned).await
            }
            Scenario::ExternalFromEveryNode => self.external_from_every_node(owned).await,
            Scenario::ExternalFromDefaultNamespace => {
                self.external_from_default_namespace(owned).await
            }
        }
    }

    async fn pod_to_pod(
        &self,
        placement: Placement,
        scope: NamespaceScope,
        owned: &mut OwnedResources,
    ) -> Result<Verdict> {
        let nodes = self.framework.list_ready_nodes().await?;
        if nodes.is_empty() {
            return Err(Error::NoNodesAvailable);
        }
        let (alpha_node, beta_node) = match placement {
            Placement::SameNode => (Some(nodes[0].as_str()), Some(nodes[0].as_str())),
            Placement::DifferentNodes => {
                if nodes.len() < 2 {
                    return Ok(Verdict::Skipped(String::from(
                        "cluster has a single ready node",
                    )));
                }
                (Some(nodes[0].as_str()), Some(nodes[1].as_str()))
            }
            Placement::AnyNode => (None, None),
        };

        let primary = self.create_owned_namespace(owned).await?;
        let (alpha_namespace, beta_namespace) = match scope {
            NamespaceScope::Shared => (primary.clone(), primary),
            NamespaceScope::Distinct => {
                let secondary = self.create_owned_namespace(owned).await?;
                (primary, secondary)
            }
            NamespaceScope::DefaultAndCustom => (primary, String::from(DEFAULT_NAMESPACE)),
        };

        let alpha = self
            .create_owned_pod(ALPHA_PREFIX, &alpha_namespace, alpha_node, owned)
            .await?;
        let beta = self
            .create_owned_pod(BETA_PREFIX, &beta_namespace, beta_node, owned)
            .await?;
        self.framework.await_pod_running(&alpha).await?;
        self.framework.await_pod_running(&beta).await?;

        // Addresses are defined only now that both peers run.
        let alpha_address = self.framework.await_pod_address(&alpha).await?;
        let beta_address = self.framework.await_pod_address(&beta).await?;

        self.assert_reachable(&alpha, &beta_address).await?;
        self.assert_reachable(&beta, &alpha_address).await?;
        Ok(Verdict::Completed)
    }

    async fn external_from_every_node(&self, owned: &mut OwnedResources) -> Result<Verdict> {
        let namespace = self.create_owned_namespace(owned).await?;
        let daemon_set = self
            .framework
            .create_daemon_set(DAEMON_SET_PREFIX, &namespace)
            .await?;
        owned.daemon_sets.push(daemon_set.clone());
        self.framework.await_daemon_set_ready(&daemon_set).await?;

        let pods = self.framework.list_daemon_set_pods(&namespace).await?;
        if pods.is_empty() {
            return Err(Error::Infrastructure {
                kind: ResourceKind::DaemonSet,
                name: daemon_set.name.clone(),
                message: String::from("ready but no pods enumerated"),
            });
        }
        for pod in &pods {
            self.assert_reachable(pod, &self.external_host).await?;
            self.assert_reachable(pod, &self.external_address).await?;
        }
        Ok(Verdict::Completed)
    }

    async fn external_from_default_namespace(
        &self,
        owned: &mut OwnedResources,
    ) -> Result<Verdict> {
        let pod = self
            .create_owned_pod(ALPHA_PREFIX, DEFAULT_NAMESPACE, None, owned)
            .await?;
        self.framework.await_pod_running(&pod).await?;
        self.assert_reachable(&pod, &self.external_host).await?;
        self.assert_reachable(&pod, &self.external_address).await?;
        Ok(Verdict::Completed)
    }

    async fn create_owned_namespace(&self, owned: &mut OwnedResources) -> Result<String> {
        let name = self.framework.create_namespace(NAMESPACE_PREFIX).await?;
        owned.namespaces.push(name.clone());
        Ok(name)
    }

    async fn create_owned_pod(
        &self,
        prefix: &str,
        namespace: &str,
        node: Option<&str>,
        owned: &mut OwnedResources,
    ) -> Result<Handle> {
        let handle = self.framework.create_pod(prefix, namespace, node).await?;
        owned.pods.push(handle.clone());
        Ok(handle)
    }

    /// Keep probing until the destination answers or the probe deadline
    /// elapses; the elapsed deadline is the assertion failure.
    async fn assert_reachable(&self, source: &Handle, destination: &str) -> Result<()> {
        poll_until(
            self.timings.probe_interval,
            self.timings.probe_deadline,
            || async move {
                Ok(
                    if self
                        .prober
                        .reachable(&source.name, &source.namespace, destination)
                        .await
                    {
                        Observation::Met(())
                    } else {
                        Observation::Pending(format!(
                            "{} unreachable from {}",
                            destination, source.name
                        ))
                    },
                )
            },
        )
        .await
        .map_err(|error| match error {
            Error::DeadlineExceeded { .. } => Error::Unreachable {
                source: source.name.clone(),
                destination: destination.to_owned(),
            },
            other => other,
        })
    }

    /// Unconditional cleanup. Failures are logged as leaked resources and
    /// never retroactively fail the scenario.
    async fn teardown(&self, owned: OwnedResources) {
        for daemon_set in &owned.daemon_sets {
            if let Err(error) = self.remove_daemon_set(daemon_set).await {
                warn!(
                    name = %daemon_set.name,
                    namespace = %daemon_set.namespace,
                    %error,
                    "leaked daemonset"
                );
            }
        }
        for pod in &owned.pods {
            if owned.namespaces.contains(&pod.namespace) {
                continue;
            }
            if let Err(error) = self.remove_pod(pod).await {
                warn!(name = %pod.name, namespace = %pod.namespace, %error, "leaked pod");
            }
        }
        for namespace in &owned.namespaces {
            if let Err(error) = self.remove_namespace(namespace).await {
                warn!(%namespace, %error, "leaked namespace");
            }
        }
    }

    async fn remove_daemon_set(&self, handle: &Handle) -> Result<()> {
        self.framework.delete_daemon_set(handle).await?;
        self.framework.await_daemon_set_gone(handle).await
    }

    async fn remove_pod(&self, handle: &Handle) -> Result<()> {
        self.framework.delete_pod(handle).await?;
        self.framework.await_pod_gone(handle).await
    }

    async fn remove_namespace(&self, namespace: &str) -> Result<()> {
        self.framework.delete_namespace(namespace).await?;
        self.framework.await_namespace_gone(namespace).await
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{client::ClusterClient, mock::MockCluster};

    fn fast_timings() -> Timings {
        Timings {
            poll_interval: Duration::from_secs(1),
            probe_interval: Duration::from_secs(1),
            ready_deadline: Duration::from_secs(30),
            deletion_deadline: Duration::from_secs(30),
            probe_deadline: Duration::from_secs(5),
            probe_attempt_timeout: Duration::from_secs(5),
        }
    }

    fn runner_over(cluster: Arc<MockCluster>) -> Runner {
        let client: Arc<dyn ClusterClient> = cluster;
        let framework = Framework::new(Arc::clone(&client), fast_timings());
        let prober = Prober::new(client, fast_timings().probe_attempt_timeout);
        Runner::new(framework, prober, "google.com", "8.8.8.8")
    }

    #[tokio::test(start_paused = true)]
    async fn full_matrix_passes_and_cleans_up() {
        let cluster = Arc::new(
            MockCluster::new(2)
                .pod_ready_after(2)
                .ds_ready_after(1)
                .terminating_observations(1)
                .reachable_external("google.com")
                .reachable_external("8.8.8.8"),
        );
        let runner = runner_over(Arc::clone(&cluster));
        let reports = runner.run().await;

        assert_eq!(reports.len(), 7);
        for report in &reports {
            assert!(
                matches!(report.outcome, Outcome::Passed),
                "{}: {:?}",
                report.scenario,
                report.outcome
            );
        }
        // Nothing but the fixed default namespace survives the run.
        assert_eq!(cluster.namespaces(), vec!["default"]);
        assert!(cluster.pods_in("default").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn single_node_clusters_skip_different_node_scenarios() {
        let cluster = Arc::new(
            MockCluster::new(1)
                .reachable_external("google.com")
                .reachable_external("8.8.8.8"),
        );
        let runner = runner_over(Arc::clone(&cluster));
        let reports = runner.run().await;

        let skipped: Vec<_> = reports
            .iter()
            .filter(|report| matches!(report.outcome, Outcome::Skipped { .. }))
            .map(|report| report.scenario.as_str())
            .collect();
        assert_eq!(
            skipped,
            vec![
                "pod-to-pod/different-nodes/shared-namespace",
                "pod-to-pod/different-nodes/distinct-namespaces",
            ]
        );
        assert!(reports.iter().all(Report::passed));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_destinations_fail_but_still_clean_up() {
        // Every probe reports total loss.
        let cluster = Arc::new(MockCluster::new(2).with_exec(|_, _, _| {
            Ok(crate::client::ExecOutput {
                stdout: String::from("2 packets transmitted, 0 received, 100% packet loss"),
                stderr: String::new(),
            })
        }));
        let runner = runner_over(Arc::clone(&cluster));
        let reports = runner.run().await;

        for report in &reports {
            assert!(
                matches!(report.outcome, Outcome::Unreachable { .. }),
                "{}: {:?}",
                report.scenario,
                report.outcome
            );
        }
        assert_eq!(cluster.namespaces(), vec!["default"]);
        assert!(cluster.pods_in("default").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn node_less_clusters_abort_pod_scenarios() {
        let cluster = Arc::new(MockCluster::new(0));
        let runner = runner_over(Arc::clone(&cluster));
        let reports = runner.run().await;

        match &reports[0].outcome {
            Outcome::Aborted(Error::NoNodesAvailable) => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(cluster.namespaces(), vec!["default"]);
    }
}
