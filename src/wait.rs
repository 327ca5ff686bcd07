//! Bounded polling for asynchronous cluster state transitions.
//!
//! Every wait in the framework (pod becomes ready, namespace finishes
//! deleting, daemonset converges) goes through [`poll_until`] so the waiting
//! policy is uniform: evaluate immediately, retry on a fixed interval, give
//! up at the deadline.

use std::{future::Future, time::Duration};

use tokio::time::{sleep, Instant};

use crate::error::{Error, Result};

/// One observation of an asynchronously transitioning condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation<T> {
    /// The awaited condition holds; carries the observed value.
    Met(T),
    /// The condition does not hold yet. The description of what was seen is
    /// carried into the deadline report.
    Pending(String),
}

/// Repeatedly evaluate `observe` until it reports [`Observation::Met`],
/// returns an error, or `deadline` elapses.
///
/// The first evaluation happens immediately, subsequent ones after each
/// `interval`. Errors from `observe` propagate unchanged; the poller never
/// swallows an observation failure the caller must react to. On deadline
/// elapse the last observed state is reported in
/// [`Error::DeadlineExceeded`].
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    deadline: Duration,
    mut observe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation<T>>>,
{
    let give_up_at = Instant::now() + deadline;
    let mut last_observed = String::from("nothing observed yet");
    loop {
        match observe().await? {
            Observation::Met(value) => return Ok(value),
            Observation::Pending(state) => last_observed = state,
        }
        if Instant::now() + interval > give_up_at {
            return Err(Error::DeadlineExceeded {
                deadline,
                last_observed,
            });
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::ResourceKind;

    const INTERVAL: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn first_evaluation_is_immediate() {
        let started = Instant::now();
        let value = poll_until(INTERVAL, Duration::from_secs(10), || async {
            Ok(Observation::Met(42))
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_the_observation_after_the_transition() {
        // Pending for 3 observations, met on the 4th.
        let calls = AtomicUsize::new(0);
        poll_until(INTERVAL, Duration::from_secs(10), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(if n >= 3 {
                    Observation::Met(())
                } else {
                    Observation::Pending(format!("observation {}", n))
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_shorter_than_the_transition_fails() {
        let calls = AtomicUsize::new(0);
        let error = poll_until(INTERVAL, Duration::from_secs(2), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(if n >= 5 {
                    Observation::Met(())
                } else {
                    Observation::Pending(String::from("phase Pending"))
                })
            }
        })
        .await
        .unwrap_err();
        match error {
            Error::DeadlineExceeded {
                deadline,
                last_observed,
            } => {
                assert_eq!(deadline, Duration::from_secs(2));
                assert_eq!(last_observed, "phase Pending");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn observation_errors_propagate_immediately() {
        let calls = AtomicUsize::new(0);
        let error = poll_until(INTERVAL, Duration::from_secs(10), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<Observation<()>, _>(Error::NotFound {
                    kind: ResourceKind::Pod,
                    name: String::from("alpha-x"),
                })
            }
        })
        .await
        .unwrap_err();
        assert!(error.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
