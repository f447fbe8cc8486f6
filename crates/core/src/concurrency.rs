use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

/// User-supplied callback recomputing the admission cap from the previous value.
pub type ConcurrencyModifier = Arc<dyn Fn(i64) -> i64 + Send + Sync>;

/// Dynamic in-flight cap plus the set of currently admitted request-ids (§4.5).
///
/// Consulted single-threaded by the worker loop; the in-flight set is additionally
/// read by the heartbeat, so it is guarded by a mutex.
pub struct Concurrency {
    modifier: ConcurrencyModifier,
    allowed: AtomicI64,
    jobs: Mutex<HashSet<String>>,
}

impl Concurrency {
    pub fn new(modifier: Option<ConcurrencyModifier>) -> Self {
        Concurrency {
            modifier: modifier.unwrap_or_else(|| Arc::new(|x| x)),
            allowed: AtomicI64::new(1),
            jobs: Mutex::new(HashSet::new()),
        }
    }

    /// Recomputes `allowed` and reports whether another task may be admitted.
    ///
    /// Any panic inside the user-supplied modifier collapses the cap to 1, matching
    /// the source's "coerce to a safe default" behaviour for a misbehaving callback.
    pub async fn is_available(&self) -> bool {
        let prev = self.allowed.load(Ordering::SeqCst);
        let modifier = self.modifier.clone();
        let next = match std::panic::catch_unwind(AssertUnwindSafe(|| modifier(prev))) {
            Ok(v) => v,
            Err(_) => {
                tracing::error!("concurrency_modifier panicked, resetting cap to 1");
                1
            }
        };
        self.allowed.store(next, Ordering::SeqCst);
        let jobs = self.jobs.lock().await;
        (jobs.len() as i64) < next
    }

    pub async fn add_job(&self, request_id: String) {
        let mut jobs = self.jobs.lock().await;
        jobs.insert(request_id);
    }

    pub async fn remove_job(&self, request_id: &str) {
        let mut jobs = self.jobs.lock().await;
        if !jobs.remove(request_id) {
            tracing::error!(request_id, "attempted to remove a job that was not in flight");
        }
    }

    /// Snapshot of current ids, stable only for the duration of the call.
    pub async fn get_jobs(&self) -> Vec<String> {
        let jobs = self.jobs.lock().await;
        jobs.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_with_cap_of_one() {
        let c = Concurrency::new(None);
        assert!(c.is_available().await);
        c.add_job("a".into()).await;
        assert!(!c.is_available().await);
    }

    #[tokio::test]
    async fn modifier_raises_cap() {
        let c = Concurrency::new(Some(Arc::new(|_prev| 4)));
        c.add_job("a".into()).await;
        c.add_job("b".into()).await;
        c.add_job("c".into()).await;
        assert!(c.is_available().await);
    }

    #[tokio::test]
    async fn panicking_modifier_collapses_cap_to_one() {
        let c = Concurrency::new(Some(Arc::new(|_prev| panic!("boom"))));
        c.add_job("a".into()).await;
        assert!(!c.is_available().await);
    }

    #[tokio::test]
    async fn removing_absent_job_is_not_fatal() {
        let c = Concurrency::new(None);
        c.remove_job("missing").await;
        assert!(c.get_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn get_jobs_snapshot() {
        let c = Concurrency::new(Some(Arc::new(|_| 10)));
        c.add_job("a".into()).await;
        c.add_job("b".into()).await;
        let mut jobs = c.get_jobs().await;
        jobs.sort();
        assert_eq!(jobs, vec!["a".to_string(), "b".to_string()]);
    }
}
