//! The connectivity test matrix.

use crate::error::Error;

/// Node placement of the two peers of a pod-to-pod scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    SameNode,
    DifferentNodes,
    AnyNode,
}

/// Namespace placement of the two peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceScope {
    /// Both peers in the scenario's own namespace.
    Shared,
    /// Each peer in its own freshly created namespace.
    Distinct,
    /// One peer in the scenario's namespace, the other in the cluster's
    /// fixed `default` namespace.
    DefaultAndCustom,
}

/// One entry of the test matrix. Every scenario expects "reachable".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Two pods ping each other by address.
    PodToPod {
        placement: Placement,
        scope: NamespaceScope,
    },
    /// One pod per node (via a daemonset) pings the external targets.
    ExternalFromEveryNode,
    /// A single default-namespace pod pings the external targets.
    ExternalFromDefaultNamespace,
}

impl Scenario {
    /// The full matrix, in execution order.
    pub fn matrix() -> Vec<Scenario> {
        vec![
            Scenario::PodToPod {
                placement: Placement::SameNode,
                scope: NamespaceScope::Shared,
            },
            Scenario::PodToPod {
                placement: Placement::DifferentNodes,
                scope: NamespaceScope::Shared,
            },
            Scenario::PodToPod {
                placement: Placement::SameNode,
                scope: NamespaceScope::Distinct,
            },
            Scenario::PodToPod {
                placement: Placement::DifferentNodes,
                scope: NamespaceScope::Distinct,
            },
            Scenario::ExternalFromEveryNode,
            Scenario::PodToPod {
                placement: Placement::AnyNode,
                scope: NamespaceScope::DefaultAndCustom,
            },
            Scenario::ExternalFromDefaultNamespace,
        ]
    }

    pub fn name(&self) -> String {
        match self {
            Scenario::PodToPod { placement, scope } => {
                let placement = match placement {
                    Placement::SameNode => "same-node",
                    Placement::DifferentNodes => "different-nodes",
                    Placement::AnyNode => "any-node",
                };
                let scope = match scope {
                    NamespaceScope::Shared => "shared-namespace",
                    NamespaceScope::Distinct => "distinct-namespaces",
                    NamespaceScope::DefaultAndCustom => "default-and-custom-namespaces",
                };
                format!("pod-to-pod/{}/{}", placement, scope)
            }
            Scenario::ExternalFromEveryNode => String::from("external/every-node"),
            Scenario::ExternalFromDefaultNamespace => String::from("external/default-namespace"),
        }
    }
}

/// How a scenario concluded.
#[derive(Debug)]
pub enum Outcome {
    /// Every reachability assertion held.
    Passed,
    /// The matrix entry does not apply to this cluster.
    Skipped { reason: String },
    /// A probe exhausted its retries: the network under test failed.
    Unreachable {
        source: String,
        destination: String,
    },
    /// The harness could not provision or observe the scenario's
    /// resources.
    Aborted(Error),
}

/// Outcome of one scenario run.
#[derive(Debug)]
pub struct Report {
    pub scenario: String,
    pub outcome: Outcome,
}

impl Report {
    /// Whether the scenario counts as healthy for the run's exit status.
    pub fn passed(&self) -> bool {
        matches!(self.outcome, Outcome::Passed | Outcome::Skipped { .. })
    }

    pub fn status(&self) -> &'static str {
        match self.outcome {
            Outcome::Passed => "PASS",
            Outcome::Skipped { .. } => "SKIP",
            Outcome::Unreachable { .. } => "FAIL",
            Outcome::Aborted(_) => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_covers_every_dimension_once() {
        let matrix = Scenario::matrix();
        assert_eq!(matrix.len(), 7);
        let names: Vec<_> = matrix.iter().map(Scenario::name).collect();
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(names, deduped);
    }
}
