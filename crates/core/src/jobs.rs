use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Identifies one unit of background work for inflight deduplication. Two jobs with equal keys
/// are considered "the same identity"; a duplicate submitted while the first is still running is
/// skipped rather than queued.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKey {
    SweepTrx { address: String },
    SweepTrc20 { address: String, symbol: String },
    Payout { request_id: String },
    AmlPayout { tx_id: String },
}

/// Replaces the original's `@skip_if_running`-decorated Celery tasks: dedup is a property of this
/// scheduler (a guarded `HashSet` of in-flight keys), not something each job body re-implements.
#[derive(Clone)]
pub struct JobScheduler {
    inflight: Arc<Mutex<HashSet<JobKey>>>,
}

pub enum Dispatch<T> {
    Ran(T),
    SkippedAlreadyRunning,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self { inflight: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Runs `job` unless a job with the same key is already in flight, in which case it is
    /// skipped. The key is released once `job` resolves, regardless of outcome.
    pub async fn run_dedup<F, Fut, T>(&self, key: JobKey, job: F) -> Dispatch<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        {
            let mut guard = self.inflight.lock().await;
            if !guard.insert(key.clone()) {
                return Dispatch::SkippedAlreadyRunning;
            }
        }

        let result = job().await;

        self.inflight.lock().await.remove(&key);
        Dispatch::Ran(result)
    }

    pub async fn is_inflight(&self, key: &JobKey) -> bool {
        self.inflight.lock().await.contains(key)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_duplicate_is_skipped() {
        let scheduler = JobScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let key = JobKey::SweepTrx { address: "Txyz".into() };

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let c1 = counter.clone();
        let s1 = scheduler.clone();
        let k1 = key.clone();
        let first = tokio::spawn(async move {
            s1.run_dedup(k1, || async move {
                c1.fetch_add(1, Ordering::SeqCst);
                rx.await.ok();
            })
            .await;
        });

        tokio::task::yield_now().await;
        assert!(scheduler.is_inflight(&key).await);

        let dispatch = scheduler.run_dedup(key.clone(), || async { unreachable!("should be skipped") }).await;
        assert!(matches!(dispatch, Dispatch::SkippedAlreadyRunning));

        tx.send(()).unwrap();
        first.await.unwrap();
        assert!(!scheduler.is_inflight(&key).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
