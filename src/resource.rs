//! Builders for the throwaway diagnostic resources.
//!
//! Everything here is pure data: the interesting lifecycle handling lives in
//! [`crate::framework`].

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, DaemonSetSpec},
        core::v1::{Container, Namespace, Pod, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
};

/// Image the diagnostic workloads run. Must ship `ping` and `sleep`.
pub const DIAGNOSTIC_IMAGE: &str = "busybox";

/// Label pair identifying daemonset-owned diagnostic pods.
pub const DAEMON_LABEL_KEY: &str = "k8s-nettest";
pub const DAEMON_LABEL_VALUE: &str = "daemon";

/// Selector string for enumerating daemonset pods.
pub fn daemon_label_selector() -> String {
    format!("{}={}", DAEMON_LABEL_KEY, DAEMON_LABEL_VALUE)
}

fn daemon_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(DAEMON_LABEL_KEY.to_owned(), DAEMON_LABEL_VALUE.to_owned())])
}

fn diagnostic_container() -> Container {
    Container {
        name: String::from("diagnostic"),
        image: Some(DIAGNOSTIC_IMAGE.to_owned()),
        command: Some(vec![String::from("sleep"), String::from("3600")]),
        image_pull_policy: Some(String::from("IfNotPresent")),
        ..Container::default()
    }
}

/// A namespace spec named by the control plane from `prefix`.
pub fn make_namespace(prefix: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            generate_name: Some(prefix.to_owned()),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

/// A long-lived diagnostic pod, optionally pinned to a node.
pub fn make_pod(prefix: &str, namespace: &str, node_name: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            generate_name: Some(prefix.to_owned()),
            namespace: Some(namespace.to_owned()),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![diagnostic_container()],
            node_name: node_name.map(str::to_owned),
            restart_policy: Some(String::from("Always")),
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}

/// A daemonset that puts one diagnostic pod on every eligible node.
///
/// The label pair is applied to both the selector and the pod template so
/// the resulting pods can be enumerated with [`daemon_label_selector`].
pub fn make_daemon_set(prefix: &str, namespace: &str) -> DaemonSet {
    DaemonSet {
        metadata: ObjectMeta {
            generate_name: Some(prefix.to_owned()),
            namespace: Some(namespace.to_owned()),
            ..ObjectMeta::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(daemon_labels()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(daemon_labels()),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![diagnostic_container()],
                    restart_policy: Some(String::from("Always")),
                    ..PodSpec::default()
                }),
            },
            ..DaemonSetSpec::default()
        }),
        ..DaemonSet::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_is_pinned_when_a_node_is_given() {
        let pod = make_pod("alpha-", "ns-1", Some("node-0"));
        let spec = pod.spec.unwrap();
        assert_eq!(spec.node_name.as_deref(), Some("node-0"));
        assert_eq!(pod.metadata.generate_name.as_deref(), Some("alpha-"));
        assert!(pod.metadata.name.is_none());
    }

    #[test]
    fn daemon_set_selector_matches_its_template_labels() {
        let daemon_set = make_daemon_set("daemon-", "ns-1");
        let spec = daemon_set.spec.unwrap();
        let selector = spec.selector.match_labels.unwrap();
        let template_labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(selector, template_labels);
        assert_eq!(
            selector.get(DAEMON_LABEL_KEY).map(String::as_str),
            Some(DAEMON_LABEL_VALUE)
        );
    }
}
