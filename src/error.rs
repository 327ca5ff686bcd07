//! Error types shared across the framework.

use std::{fmt, time::Duration};

use snafu::Snafu;

/// The kind of cluster resource an operation was acting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Namespace,
    Pod,
    DaemonSet,
    Node,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::Pod => "pod",
            ResourceKind::DaemonSet => "daemonset",
            ResourceKind::Node => "node",
        })
    }
}

/// Errors that can occur while provisioning, awaiting and probing cluster
/// resources.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The control plane rejected an API call outright. Never retried.
    #[snafu(display("cluster rejected {kind} {name:?}: {message}"))]
    Infrastructure {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    /// A get-by-name found nothing. Success for await-gone, an error
    /// everywhere else.
    #[snafu(display("{kind} {name:?} not found"))]
    NotFound { kind: ResourceKind, name: String },

    /// A bounded poll ran out of time before its condition was met.
    #[snafu(display(
        "deadline of {deadline:?} elapsed (last observed: {last_observed})"
    ))]
    DeadlineExceeded {
        deadline: Duration,
        last_observed: String,
    },

    /// All probe retries were exhausted without a successful reachability
    /// check. The only failure attributable to the network under test.
    #[snafu(display("{destination} is not reachable from pod {source}"))]
    Unreachable {
        #[snafu(source(false))]
        source: String,
        destination: String,
    },

    /// The exec channel into a pod could not be opened or broke mid-stream.
    #[snafu(display("exec into pod {pod:?} in {namespace:?} failed: {message}"))]
    ExecFailed {
        pod: String,
        namespace: String,
        message: String,
    },

    /// The cluster reported no schedulable nodes.
    #[snafu(display("no ready nodes in the cluster"))]
    NoNodesAvailable,
}

impl Error {
    /// Whether this is a get-by-name miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
