//! Timing policy for polls and probes.

use std::time::Duration;

/// Poll intervals and deadlines shared by every asynchronous wait.
///
/// The probe interval is kept shorter than the readiness interval: a probe
/// attempt is cheap compared to a control plane round trip and transient
/// packet loss recovers fast.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Interval between readiness/deletion observations.
    pub poll_interval: Duration,
    /// Interval between probe attempts.
    pub probe_interval: Duration,
    /// How long a resource may take to become ready.
    pub ready_deadline: Duration,
    /// How long a deletion may take to finish.
    pub deletion_deadline: Duration,
    /// How long to keep re-probing before declaring a destination
    /// unreachable.
    pub probe_deadline: Duration,
    /// Bound on a single exec'd probe attempt.
    pub probe_attempt_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            probe_interval: Duration::from_secs(2),
            ready_deadline: Duration::from_secs(120),
            deletion_deadline: Duration::from_secs(300),
            probe_deadline: Duration::from_secs(300),
            probe_attempt_timeout: Duration::from_secs(30),
        }
    }
}
