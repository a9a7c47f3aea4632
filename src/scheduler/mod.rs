use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::interfaces::scheduler::ScheduledJob;

/// Runs each registered job on its own interval until stopped.
pub struct Scheduler {
    jobs: Vec<Arc<dyn ScheduledJob>>,
    handles: Vec<JoinHandle<()>>,
    stop: Option<watch::Sender<bool>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            handles: Vec::new(),
            stop: None,
        }
    }

    pub fn register_job(&mut self, job: Arc<dyn ScheduledJob>) {
        self.jobs.push(job);
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_some()
    }

    pub fn start(&mut self) {
        if self.stop.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        self.stop = Some(tx);

        for job in &self.jobs {
            let job = Arc::clone(job);
            let mut tick = tokio::time::interval(job.interval().max(Duration::from_millis(1)));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut rx = rx.clone();
            tracing::debug!(job = job.name(), interval = ?job.interval(), "Starting scheduled job");
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            if let Err(err) = job.run().await {
                                tracing::warn!(job = job.name(), error = %err, "Scheduled job failed");
                            }
                        }
                        changed = rx.changed() => {
                            if changed.is_err() || *rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            });
            self.handles.push(handle);
        }
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(true);
        }
        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::{GoalListError, Result};

    struct CountingJob {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ScheduledJob for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GoalListError::Runtime("boom".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn jobs_run_until_stopped_even_when_failing() {
        let ok = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            fail: false,
        });
        let failing = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            fail: true,
        });
        let mut scheduler = Scheduler::new();
        scheduler.register_job(ok.clone());
        scheduler.register_job(failing.clone());
        scheduler.start();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());

        assert!(ok.runs.load(Ordering::SeqCst) >= 2);
        assert!(failing.runs.load(Ordering::SeqCst) >= 2);
        let settled = ok.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ok.runs.load(Ordering::SeqCst), settled);
    }
}
