//! A scripted in-memory cluster for tests.
//!
//! State transitions are driven by observation counts rather than wall
//! clock: a pod configured with `pod_ready_after(3)` reports `Pending` for
//! three gets and `Running` from the fourth on, which lets paused-clock
//! tests step the poller through transitions deterministically.

use std::{collections::BTreeMap, sync::Mutex, time::Duration};

use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, DaemonSetStatus},
        core::v1::{
            Namespace, NamespaceStatus, Node, NodeCondition, NodeStatus, Pod, PodSpec, PodStatus,
        },
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

use crate::{
    client::{ClusterClient, ExecOutput},
    error::{Error, ResourceKind, Result},
    resource::{DAEMON_LABEL_KEY, DAEMON_LABEL_VALUE},
};

type ExecHook = Box<dyn Fn(&str, &str, &[&str]) -> Result<ExecOutput> + Send + Sync>;

const ZERO_LOSS_TRANSCRIPT: &str = "2 packets transmitted, 2 received, 0% packet loss";

pub struct MockCluster {
    nodes: usize,
    pod_ready_after: u32,
    pod_final_phase: String,
    address_lag: u32,
    ds_ready_after: u32,
    terminating_observations: u32,
    exec_delay: Duration,
    exec_hook: Option<ExecHook>,
    external: Vec<String>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    counter: u64,
    namespaces: BTreeMap<String, NamespaceEntry>,
    pods: BTreeMap<(String, String), PodEntry>,
    daemon_sets: BTreeMap<(String, String), DaemonSetEntry>,
}

struct NamespaceEntry {
    terminating: Option<u32>,
}

struct PodEntry {
    node: String,
    labels: BTreeMap<String, String>,
    ip: String,
    ready_countdown: u32,
    address_countdown: u32,
    final_phase: String,
    terminating: Option<u32>,
}

struct DaemonSetEntry {
    desired: i32,
    ready_countdown: u32,
    converged: bool,
    terminating: Option<u32>,
}

impl MockCluster {
    /// A cluster of `nodes` ready nodes with an existing `default`
    /// namespace. Pods and daemonsets come up on their first observation
    /// unless configured otherwise.
    pub fn new(nodes: usize) -> Self {
        let mut state = State::default();
        state
            .namespaces
            .insert(String::from("default"), NamespaceEntry { terminating: None });
        Self {
            nodes,
            pod_ready_after: 0,
            pod_final_phase: String::from("Running"),
            address_lag: 0,
            ds_ready_after: 0,
            terminating_observations: 0,
            exec_delay: Duration::ZERO,
            exec_hook: None,
            external: Vec::new(),
            state: Mutex::new(state),
        }
    }

    /// Observations a pod reports `Pending` before transitioning.
    pub fn pod_ready_after(mut self, observations: u32) -> Self {
        self.pod_ready_after = observations;
        self
    }

    /// Phase a pod transitions to instead of `Running`.
    pub fn pod_final_phase(mut self, phase: &str) -> Self {
        self.pod_final_phase = phase.to_owned();
        self
    }

    /// Observations a running pod reports an unpopulated address.
    pub fn address_lag(mut self, observations: u32) -> Self {
        self.address_lag = observations;
        self
    }

    /// Observations a daemonset reports unconverged replica counts.
    pub fn ds_ready_after(mut self, observations: u32) -> Self {
        self.ds_ready_after = observations;
        self
    }

    /// Observations a deleted resource lingers before a get misses.
    pub fn terminating_observations(mut self, observations: u32) -> Self {
        self.terminating_observations = observations;
        self
    }

    /// Delay injected into every exec call.
    pub fn exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = delay;
        self
    }

    /// Replace the default exec behavior with a script.
    pub fn with_exec<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &str, &[&str]) -> Result<ExecOutput> + Send + Sync + 'static,
    {
        self.exec_hook = Some(Box::new(hook));
        self
    }

    /// Mark an external destination as reachable from every pod.
    pub fn reachable_external(mut self, destination: impl Into<String>) -> Self {
        self.external.push(destination.into());
        self
    }

    /// Names of the namespaces currently present.
    pub fn namespaces(&self) -> Vec<String> {
        self.state.lock().unwrap().namespaces.keys().cloned().collect()
    }

    /// Names of the pods currently present in `namespace`.
    pub fn pods_in(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Names of the daemonsets currently present in `namespace`.
    pub fn daemon_sets_in(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .daemon_sets
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn spawn_daemon_pods(&self, state: &mut State, namespace: &str, daemon_set: &str) {
        let labels = BTreeMap::from([(
            DAEMON_LABEL_KEY.to_owned(),
            DAEMON_LABEL_VALUE.to_owned(),
        )]);
        for node in 0..self.nodes {
            state.counter += 1;
            let ip = format!("10.244.0.{}", state.counter);
            state.pods.insert(
                (namespace.to_owned(), format!("{}-{}", daemon_set, node)),
                PodEntry {
                    node: format!("node-{}", node),
                    labels: labels.clone(),
                    ip,
                    ready_countdown: 0,
                    address_countdown: 0,
                    final_phase: String::from("Running"),
                    terminating: None,
                },
            );
        }
    }
}

fn generated(state: &mut State, metadata: &ObjectMeta) -> String {
    state.counter += 1;
    let prefix = metadata.generate_name.as_deref().unwrap_or_default();
    format!("{}{:05}", prefix, state.counter)
}

fn namespace_of(metadata: &ObjectMeta) -> String {
    metadata
        .namespace
        .clone()
        .unwrap_or_else(|| String::from("default"))
}

/// Decrements a terminating countdown. `Some(true)` means the resource is
/// now gone, `Some(false)` that it is still terminating, `None` that no
/// deletion is in flight.
fn observe_terminating(terminating: &mut Option<u32>) -> Option<bool> {
    match terminating {
        None => None,
        Some(0) => Some(true),
        Some(remaining) => {
            *remaining -= 1;
            Some(false)
        }
    }
}

fn pod_object(namespace: &str, name: &str, entry: &PodEntry, phase: &str, ip: Option<String>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(entry.labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            node_name: Some(entry.node.clone()),
            ..PodSpec::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_owned()),
            pod_ip: ip,
            ..PodStatus::default()
        }),
        ..Pod::default()
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let mut state = self.state.lock().unwrap();
        let name = generated(&mut state, &namespace.metadata);
        state
            .namespaces
            .insert(name.clone(), NamespaceEntry { terminating: None });
        Ok(Namespace {
            metadata: ObjectMeta {
                name: Some(name),
                ..ObjectMeta::default()
            },
            status: Some(NamespaceStatus {
                phase: Some(String::from("Active")),
                ..NamespaceStatus::default()
            }),
            ..Namespace::default()
        })
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let mut state = self.state.lock().unwrap();
        let entry = state.namespaces.get_mut(name).ok_or_else(|| Error::NotFound {
            kind: ResourceKind::Namespace,
            name: name.to_owned(),
        })?;
        let phase = match observe_terminating(&mut entry.terminating) {
            Some(true) => {
                state.namespaces.remove(name);
                state.pods.retain(|(ns, _), _| ns != name);
                state.daemon_sets.retain(|(ns, _), _| ns != name);
                return Err(Error::NotFound {
                    kind: ResourceKind::Namespace,
                    name: name.to_owned(),
                });
            }
            Some(false) => "Terminating",
            None => "Active",
        };
        Ok(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            status: Some(NamespaceStatus {
                phase: Some(phase.to_owned()),
                ..NamespaceStatus::default()
            }),
            ..Namespace::default()
        })
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state.namespaces.get_mut(name).ok_or_else(|| Error::NotFound {
            kind: ResourceKind::Namespace,
            name: name.to_owned(),
        })?;
        entry.terminating = Some(self.terminating_observations);
        Ok(())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut state = self.state.lock().unwrap();
        let namespace = namespace_of(&pod.metadata);
        if !state.namespaces.contains_key(&namespace) {
            return Err(Error::NotFound {
                kind: ResourceKind::Namespace,
                name: namespace,
            });
        }
        let name = generated(&mut state, &pod.metadata);
        let ip = format!("10.244.0.{}", state.counter);
        let node = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.clone())
            .unwrap_or_else(|| String::from("node-0"));
        let entry = PodEntry {
            node,
            labels: pod.metadata.labels.clone().unwrap_or_default(),
            ip,
            ready_countdown: self.pod_ready_after,
            address_countdown: self.address_lag,
            final_phase: self.pod_final_phase.clone(),
            terminating: None,
        };
        let object = pod_object(&namespace, &name, &entry, "Pending", None);
        state.pods.insert((namespace, name), entry);
        Ok(object)
    }

    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_owned(), name.to_owned());
        let entry = state.pods.get_mut(&key).ok_or_else(|| Error::NotFound {
            kind: ResourceKind::Pod,
            name: name.to_owned(),
        })?;
        if let Some(true) = observe_terminating(&mut entry.terminating) {
            state.pods.remove(&key);
            return Err(Error::NotFound {
                kind: ResourceKind::Pod,
                name: name.to_owned(),
            });
        }
        let phase = if entry.ready_countdown > 0 {
            entry.ready_countdown -= 1;
            String::from("Pending")
        } else {
            entry.final_phase.clone()
        };
        let ip = if phase == "Running" {
            if entry.address_countdown > 0 {
                entry.address_countdown -= 1;
                None
            } else {
                Some(entry.ip.clone())
            }
        } else {
            None
        };
        Ok(pod_object(namespace, name, entry, &phase, ip))
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_owned(), name.to_owned());
        let entry = state.pods.get_mut(&key).ok_or_else(|| Error::NotFound {
            kind: ResourceKind::Pod,
            name: name.to_owned(),
        })?;
        entry.terminating = Some(self.terminating_observations);
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let state = self.state.lock().unwrap();
        let (key, value) = label_selector.split_once('=').unwrap_or((label_selector, ""));
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), entry)| {
                ns == namespace && entry.labels.get(key).map(String::as_str) == Some(value)
            })
            .map(|((ns, name), entry)| {
                let running = entry.ready_countdown == 0 && entry.final_phase == "Running";
                let phase = if running { "Running" } else { "Pending" };
                let ip = (running && entry.address_countdown == 0).then(|| entry.ip.clone());
                pod_object(ns, name, entry, phase, ip)
            })
            .collect())
    }

    async fn create_daemon_set(&self, daemon_set: &DaemonSet) -> Result<DaemonSet> {
        let mut state = self.state.lock().unwrap();
        let namespace = namespace_of(&daemon_set.metadata);
        if !state.namespaces.contains_key(&namespace) {
            return Err(Error::NotFound {
                kind: ResourceKind::Namespace,
                name: namespace,
            });
        }
        let name = generated(&mut state, &daemon_set.metadata);
        state.daemon_sets.insert(
            (namespace.clone(), name.clone()),
            DaemonSetEntry {
                desired: self.nodes as i32,
                ready_countdown: self.ds_ready_after,
                converged: false,
                terminating: None,
            },
        );
        Ok(DaemonSet {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(namespace),
                ..ObjectMeta::default()
            },
            ..DaemonSet::default()
        })
    }

    async fn get_daemon_set(&self, name: &str, namespace: &str) -> Result<DaemonSet> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_owned(), name.to_owned());
        let entry = state.daemon_sets.get_mut(&key).ok_or_else(|| Error::NotFound {
            kind: ResourceKind::DaemonSet,
            name: name.to_owned(),
        })?;
        if let Some(true) = observe_terminating(&mut entry.terminating) {
            state.daemon_sets.remove(&key);
            state
                .pods
                .retain(|(ns, pod), entry| {
                    !(ns == namespace
                        && entry.labels.get(DAEMON_LABEL_KEY).map(String::as_str)
                            == Some(DAEMON_LABEL_VALUE)
                        && pod.starts_with(name))
                });
            return Err(Error::NotFound {
                kind: ResourceKind::DaemonSet,
                name: name.to_owned(),
            });
        }
        let desired = entry.desired;
        let converged = if entry.ready_countdown > 0 {
            entry.ready_countdown -= 1;
            false
        } else {
            if !entry.converged {
                entry.converged = true;
                self.spawn_daemon_pods(&mut state, namespace, name);
            }
            true
        };
        let (ready, available) = if converged { (desired, desired) } else { (0, 0) };
        Ok(DaemonSet {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                ..ObjectMeta::default()
            },
            status: Some(DaemonSetStatus {
                desired_number_scheduled: desired,
                current_number_scheduled: desired,
                number_ready: ready,
                number_available: Some(available),
                ..DaemonSetStatus::default()
            }),
            ..DaemonSet::default()
        })
    }

    async fn delete_daemon_set(&self, name: &str, namespace: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_owned(), name.to_owned());
        let entry = state.daemon_sets.get_mut(&key).ok_or_else(|| Error::NotFound {
            kind: ResourceKind::DaemonSet,
            name: name.to_owned(),
        })?;
        entry.terminating = Some(self.terminating_observations);
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok((0..self.nodes)
            .map(|node| Node {
                metadata: ObjectMeta {
                    name: Some(format!("node-{}", node)),
                    ..ObjectMeta::default()
                },
                status: Some(NodeStatus {
                    conditions: Some(vec![NodeCondition {
                        type_: String::from("Ready"),
                        status: String::from("True"),
                        ..NodeCondition::default()
                    }]),
                    ..NodeStatus::default()
                }),
                ..Node::default()
            })
            .collect())
    }

    async fn exec(&self, pod: &str, namespace: &str, command: &[&str]) -> Result<ExecOutput> {
        if self.exec_delay > Duration::ZERO {
            tokio::time::sleep(self.exec_delay).await;
        }
        if let Some(hook) = &self.exec_hook {
            return hook(pod, namespace, command);
        }
        let state = self.state.lock().unwrap();
        let entry = state
            .pods
            .get(&(namespace.to_owned(), pod.to_owned()))
            .ok_or_else(|| Error::ExecFailed {
                pod: pod.to_owned(),
                namespace: namespace.to_owned(),
                message: String::from("pod not found"),
            })?;
        if entry.ready_countdown > 0 || entry.final_phase != "Running" {
            return Err(Error::ExecFailed {
                pod: pod.to_owned(),
                namespace: namespace.to_owned(),
                message: String::from("container not running"),
            });
        }
        let destination = command.last().copied().unwrap_or_default();
        let reachable = state
            .pods
            .values()
            .any(|peer| peer.ip == destination && peer.ready_countdown == 0)
            || self.external.iter().any(|external| external == destination);
        if reachable {
            Ok(ExecOutput {
                stdout: ZERO_LOSS_TRANSCRIPT.to_owned(),
                stderr: String::new(),
            })
        } else {
            Err(Error::ExecFailed {
                pod: pod.to_owned(),
                namespace: namespace.to_owned(),
                message: String::from("command terminated with exit code 1"),
            })
        }
    }
}
