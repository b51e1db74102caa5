//! Batch scheduling.
//!
//! The live-host list is cut into contiguous batches; each batch is fanned
//! out over a bounded pool of tokio tasks and fully drained before the next
//! one starts. A host whose work returns an error or panics is logged and
//! reported as failed. Its siblings are unaffected.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Result, ScanError};

/// Results of one scheduler invocation.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// Successful results, in completion order.
    pub succeeded: Vec<T>,
    pub failed: Vec<HostFailure>,
}

#[derive(Debug)]
pub struct HostFailure {
    pub host: String,
    pub error: ScanError,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Split `hosts` into contiguous batches of at most `batch_size`.
pub fn plan_batches(hosts: &[String], batch_size: usize) -> Vec<&[String]> {
    hosts.chunks(batch_size.max(1)).collect()
}

/// Run `work` for every host with at most `workers` tasks in flight.
pub async fn run_batch<T, F, Fut>(hosts: &[String], workers: usize, work: F) -> BatchOutcome<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut task_hosts = HashMap::new();

    for host in hosts {
        let permits = permits.clone();
        let job = work(host.clone());
        let handle = tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ScanError::PoolClosed)?;
            job.await
        });
        task_hosts.insert(handle.id(), host.clone());
    }

    let mut outcome = BatchOutcome::default();
    while let Some(joined) = tasks.join_next_with_id().await {
        let (host, error) = match joined {
            Ok((_, Ok(value))) => {
                outcome.succeeded.push(value);
                continue;
            }
            Ok((id, Err(error))) => (task_hosts.remove(&id).unwrap_or_default(), error),
            Err(join_error) => {
                let host = task_hosts.remove(&join_error.id()).unwrap_or_default();
                let error = ScanError::WorkerPanicked {
                    host: host.clone(),
                    reason: join_error.to_string(),
                };
                (host, error)
            }
        };

        tracing::error!(host = %host, error = %error, "Host worker failed");
        outcome.failed.push(HostFailure { host, error });
    }

    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn hosts(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("10.0.0.{i}")).collect()
    }

    #[test]
    fn test_plan_batches_counts() {
        let list = hosts(23);
        let batches = plan_batches(&list, 5);
        assert_eq!(batches.len(), 5);
        assert!(batches.iter().all(|b| b.len() <= 5));
        assert_eq!(batches[4].len(), 3);

        let rejoined: Vec<String> = batches.concat();
        assert_eq!(rejoined, list);

        assert_eq!(plan_batches(&hosts(10), 10).len(), 1);
        assert!(plan_batches(&[], 4).is_empty());
        assert_eq!(plan_batches(&hosts(3), 0).len(), 3);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let list = hosts(6);
        let outcome = run_batch(&list, 3, |host| async move {
            if host == "10.0.0.2" {
                return Err(ScanError::Config("boom".to_string()));
            }
            if host == "10.0.0.4" {
                panic!("worker blew up");
            }
            Ok(host)
        })
        .await;

        let ok: HashSet<String> = outcome.succeeded.into_iter().collect();
        let expected: HashSet<String> = ["10.0.0.1", "10.0.0.3", "10.0.0.5", "10.0.0.6"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(ok, expected);

        let mut failed: Vec<String> = outcome.failed.iter().map(|f| f.host.clone()).collect();
        failed.sort();
        assert_eq!(failed, vec!["10.0.0.2", "10.0.0.4"]);
        assert!(outcome
            .failed
            .iter()
            .any(|f| matches!(f.error, ScanError::WorkerPanicked { .. })));
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let list = hosts(12);
        let outcome = run_batch(&list, 2, |host| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(host)
            }
        })
        .await;

        assert_eq!(outcome.succeeded.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
