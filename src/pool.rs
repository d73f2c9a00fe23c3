use std::future::Future;
use std::sync::Arc;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::JoinSet;

/// Bounded task pool: at most `limit` tasks run at once.
///
/// [`spawn`](BoundedPool::spawn) waits for a permit before starting the task;
/// the permit is released when the task finishes, whatever its outcome.
/// [`join_all`](BoundedPool::join_all) is the barrier that waits for every task.
#[derive(Debug)]
pub struct BoundedPool {
    sem: Arc<Semaphore>,
    set: JoinSet<()>,
}

/// Outcome of [`BoundedPool::join_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub completed: usize,
    pub panicked: usize,
}

impl BoundedPool {
    pub fn new(limit: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(limit.clamp(1, Semaphore::MAX_PERMITS))),
            set: JoinSet::new(),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.sem.available_permits()
    }

    pub async fn spawn<F>(&mut self, task: F) -> Result<(), AcquireError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self.sem.clone().acquire_owned().await?;
        self.set.spawn(async move {
            let _permit = permit; // keep permit until task completes
            task.await;
        });
        Ok(())
    }

    pub async fn join_all(mut self) -> JoinReport {
        let mut report = JoinReport::default();
        while let Some(res) = self.set.join_next().await {
            match res {
                Ok(()) => report.completed += 1,
                Err(e) => {
                    tracing::error!(error = %e, "scan task failed");
                    report.panicked += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_limit() {
        let mut pool = BoundedPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let running = running.clone();
            let peak = peak.clone();
            pool.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        let report = pool.join_all().await;
        assert_eq!(report.completed, 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn panicking_task_releases_permit() {
        let mut pool = BoundedPool::new(1);
        pool.spawn(async { panic!("boom"); }).await.unwrap();
        pool.spawn(async {}).await.unwrap();
        let report = pool.join_all().await;
        assert_eq!(report, JoinReport { completed: 1, panicked: 1 });
    }

    #[test]
    fn zero_limit_is_clamped() {
        let pool = BoundedPool::new(0);
        assert_eq!(pool.available_permits(), 1);
    }
}
