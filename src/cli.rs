//! Command line options.

use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::config::Timings;

#[derive(Debug, Parser)]
#[command(
    name = "k8s-nettest",
    about = "Connectivity test framework for Kubernetes clusters"
)]
pub struct Opts {
    /// Path to the kubeconfig granting cluster access. Falls back to
    /// `$KUBECONFIG`, then `~/.kube/config` when that file exists.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// `kubectl` binary used to drive the cluster.
    #[arg(long, default_value = "kubectl")]
    pub kubectl_command: String,

    /// External hostname probed from inside the cluster.
    #[arg(long, default_value = "google.com")]
    pub external_host: String,

    /// External literal address probed from inside the cluster.
    #[arg(long, default_value = "8.8.8.8")]
    pub external_address: String,

    /// Interval between readiness/deletion observations.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    pub poll_interval: Duration,

    /// Interval between probe attempts.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2s")]
    pub probe_interval: Duration,

    /// How long a resource may take to become ready.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2m")]
    pub ready_deadline: Duration,

    /// How long a deletion may take to finish.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5m")]
    pub deletion_deadline: Duration,

    /// How long to keep re-probing before declaring a destination
    /// unreachable.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5m")]
    pub probe_deadline: Duration,

    /// Bound on a single probe attempt.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    pub probe_attempt_timeout: Duration,

    /// Reduce log output (repeat for less).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Increase log output (repeat for more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Opts {
    pub fn timings(&self) -> Timings {
        Timings {
            poll_interval: self.poll_interval,
            probe_interval: self.probe_interval,
            ready_deadline: self.ready_deadline,
            deletion_deadline: self.deletion_deadline,
            probe_deadline: self.probe_deadline,
            probe_attempt_timeout: self.probe_attempt_timeout,
        }
    }

    /// Default filter directive for the log subscriber.
    pub const fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (0, 0) => "info",
            (0, 1) => "debug",
            (0, _) => "trace",
            (1, _) => "warn",
            (2, _) => "error",
            _ => "off",
        }
    }

    /// Kubeconfig discovery: the explicit flag and `$KUBECONFIG` are
    /// handled by the parser; the home config is used only when present,
    /// otherwise kubectl applies its own defaulting.
    pub fn kubeconfig_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.kubeconfig {
            return Some(path.clone());
        }
        let home = std::env::var_os("HOME")?;
        let fallback = PathBuf::from(home).join(".kube").join("config");
        fallback.exists().then_some(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings_keep_probes_faster_than_readiness_polls() {
        let opts = Opts::try_parse_from(["k8s-nettest"]).unwrap();
        let timings = opts.timings();
        assert!(timings.probe_interval < timings.poll_interval);
        assert_eq!(timings.ready_deadline, Duration::from_secs(120));
    }

    #[test]
    fn verbosity_ladder() {
        let level = |args: &[&str]| {
            let mut full = vec!["k8s-nettest"];
            full.extend_from_slice(args);
            Opts::try_parse_from(full).unwrap().log_level()
        };
        assert_eq!(level(&[]), "info");
        assert_eq!(level(&["-v"]), "debug");
        assert_eq!(level(&["-vv"]), "trace");
        assert_eq!(level(&["-q"]), "warn");
        assert_eq!(level(&["-qq"]), "error");
    }
}
