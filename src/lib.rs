//! Connectivity test framework for Kubernetes clusters.
//!
//! The framework provisions short-lived busybox workloads, waits for them
//! to reach a stable runtime state, issues ping probes between them and
//! toward external endpoints from inside the cluster, and tears the
//! workloads down again. Waiting is centralized in [`wait::poll_until`],
//! probing in [`probe::Prober`], resource lifecycles in
//! [`framework::Framework`], and the test matrix in [`runner::Runner`].

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod framework;
#[cfg(any(test, feature = "mocks"))]
pub mod mock;
pub mod probe;
pub mod resource;
pub mod runner;
pub mod scenario;
pub mod wait;

pub use client::{ClusterClient, ExecOutput, KubectlClient};
pub use config::Timings;
pub use error::{Error, ResourceKind, Result};
pub use framework::{Framework, Handle};
pub use probe::Prober;
pub use runner::Runner;
pub use scenario::{Outcome, Report, Scenario};
