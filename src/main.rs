use std::{process, sync::Arc};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use k8s_nettest::{
    cli::Opts, ClusterClient, Framework, KubectlClient, Outcome, Prober, Runner,
};

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(opts.log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let client: Arc<dyn ClusterClient> = Arc::new(KubectlClient::new(
        &opts.kubectl_command,
        opts.kubeconfig_path(),
    ));
    let framework = Framework::new(Arc::clone(&client), opts.timings());

    let nodes = match framework.list_ready_nodes().await {
        Ok(nodes) => nodes,
        Err(error) => {
            error!(%error, "cannot reach the cluster");
            process::exit(exitcode::UNAVAILABLE);
        }
    };
    if nodes.is_empty() {
        error!("no ready nodes in the cluster");
        process::exit(exitcode::UNAVAILABLE);
    }
    info!(nodes = nodes.len(), "cluster reachable");

    let prober = Prober::new(client, opts.timings().probe_attempt_timeout);
    let runner = Runner::new(
        framework,
        prober,
        opts.external_host.clone(),
        opts.external_address.clone(),
    );
    let reports = runner.run().await;

    println!();
    for report in &reports {
        println!("{:>5}  {}", report.status(), report.scenario);
    }
    let failed = reports.iter().filter(|report| !report.passed()).count();
    println!("\n{} scenarios, {} failed", reports.len(), failed);

    let aborted = reports
        .iter()
        .any(|report| matches!(report.outcome, Outcome::Aborted(_)));
    process::exit(if failed == 0 {
        exitcode::OK
    } else if aborted {
        exitcode::SOFTWARE
    } else {
        exitcode::TEMPFAIL
    });
}
