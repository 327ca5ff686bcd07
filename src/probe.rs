//! Remote reachability probes.
//!
//! A probe runs a bounded ping inside a source pod through the exec channel
//! and classifies the captured output. Every way an attempt can go wrong
//! (channel refused, stream broken, timeout, packet loss) collapses to
//! `false`: from the caller's point of view a probe that could not run is
//! indistinguishable from an unreachable destination, and the retry loop
//! above treats both the same.

use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::client::ClusterClient;

/// Marker that classifies a ping transcript as lossless. The leading comma
/// keeps `100%` and other nonzero loss figures from matching.
const ZERO_LOSS_MARKER: &str = ", 0% packet loss";

/// Echo requests per attempt.
const PING_COUNT: &str = "2";

/// Issues reachability probes from inside pods.
pub struct Prober {
    client: Arc<dyn ClusterClient>,
    attempt_timeout: Duration,
}

impl Prober {
    pub fn new(client: Arc<dyn ClusterClient>, attempt_timeout: Duration) -> Self {
        Self {
            client,
            attempt_timeout,
        }
    }

    /// Ping `destination` (address or hostname) from inside `pod`.
    ///
    /// Never returns an error: failures to execute are reported as
    /// unreachable so the caller can retry uniformly.
    pub async fn reachable(&self, pod: &str, namespace: &str, destination: &str) -> bool {
        let command = ["ping", "-c", PING_COUNT, destination];
        let attempt = self.client.exec(pod, namespace, &command);
        let output = match timeout(self.attempt_timeout, attempt).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                debug!(%pod, %destination, %error, "probe failed to execute");
                return false;
            }
            Err(_) => {
                warn!(
                    %pod,
                    %destination,
                    timeout = ?self.attempt_timeout,
                    "probe attempt timed out"
                );
                return false;
            }
        };
        let reachable = classify(&output.stdout);
        debug!(%pod, %destination, reachable, "probe finished");
        reachable
    }
}

/// Zero packet loss is the only transcript that counts as reachable.
/// Partial loss classifies as unreachable; a lossy-but-alive path passes on
/// a later retry.
fn classify(stdout: &str) -> bool {
    stdout.contains(ZERO_LOSS_MARKER)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        client::ExecOutput,
        error::Error,
        mock::MockCluster,
    };

    #[test]
    fn classification_is_exact_substring() {
        let cases = [
            (
                indoc! {"
                    PING 10.244.1.7 (10.244.1.7): 56 data bytes
                    64 bytes from 10.244.1.7: seq=0 ttl=64 time=0.123 ms
                    64 bytes from 10.244.1.7: seq=1 ttl=64 time=0.101 ms

                    --- 10.244.1.7 ping statistics ---
                    2 packets transmitted, 2 received, 0% packet loss
                "},
                true,
            ),
            (
                "2 packets transmitted, 0 received, 100% packet loss",
                false,
            ),
            ("2 packets transmitted, 1 received, 50% packet loss", false),
            ("", false),
            ("ping: bad address 'nowhere.invalid'", false),
        ];
        for (transcript, expected) in cases {
            assert_eq!(classify(transcript), expected, "transcript: {transcript:?}");
        }
    }

    #[tokio::test]
    async fn zero_loss_output_is_reachable() {
        let cluster = Arc::new(MockCluster::new(1).with_exec(|_, _, _| {
            Ok(ExecOutput {
                stdout: String::from("2 packets transmitted, 2 received, 0% packet loss"),
                stderr: String::new(),
            })
        }));
        let prober = Prober::new(cluster, Duration::from_secs(30));
        assert!(prober.reachable("alpha-1", "ns-1", "10.244.1.7").await);
    }

    #[tokio::test]
    async fn exec_failures_are_unreachable() {
        let cluster = Arc::new(MockCluster::new(1).with_exec(|pod, namespace, _| {
            Err(Error::ExecFailed {
                pod: pod.to_owned(),
                namespace: namespace.to_owned(),
                message: String::from("container not found"),
            })
        }));
        let prober = Prober::new(cluster, Duration::from_secs(30));
        assert!(!prober.reachable("alpha-1", "ns-1", "10.244.1.7").await);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_as_unreachable() {
        let cluster = Arc::new(
            MockCluster::new(1)
                .exec_delay(Duration::from_secs(60))
                .with_exec(|_, _, _| {
                    Ok(ExecOutput {
                        stdout: String::from("2 packets transmitted, 2 received, 0% packet loss"),
                        stderr: String::new(),
                    })
                }),
        );
        let prober = Prober::new(cluster, Duration::from_secs(30));
        assert!(!prober.reachable("alpha-1", "ns-1", "10.244.1.7").await);
    }
}
