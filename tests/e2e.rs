//! End-to-end run against a live cluster.
//!
//! Requires a reachable cluster and `kubectl` on the path; run with
//! `cargo test -- --ignored`.

use std::sync::Arc;

use k8s_nettest::{ClusterClient, Framework, KubectlClient, Prober, Runner, Timings};

#[tokio::test]
#[ignore = "requires a live cluster and kubectl"]
async fn full_matrix() -> Result<(), Box<dyn std::error::Error>> {
    let client: Arc<dyn ClusterClient> = Arc::new(KubectlClient::new("kubectl", None));
    let timings = Timings::default();

    let framework = Framework::new(Arc::clone(&client), timings);
    let nodes = framework.list_ready_nodes().await?;
    assert!(!nodes.is_empty(), "no ready nodes in the cluster");

    let prober = Prober::new(client, timings.probe_attempt_timeout);
    let runner = Runner::new(framework, prober, "google.com", "8.8.8.8");
    let reports = runner.run().await;

    for report in &reports {
        assert!(report.passed(), "{}: {:?}", report.scenario, report.outcome);
    }
    Ok(())
}
