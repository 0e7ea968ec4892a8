//! Debounce-with-coalescing over a fixed cooldown window.
//!
//! Concurrent `trigger` calls inside one window attach to a single shared
//! pending execution instead of each spawning a timer, so N bursts collapse
//! into at most one recomputation per window.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

/// The recomputation the scheduler guards. Failures are the job's problem;
/// the scheduler only spaces executions.
#[async_trait]
pub trait Recompute: Send + Sync {
    async fn run(&self);
}

struct PendingRun {
    id: u64,
    done: watch::Receiver<bool>,
    cancel: Arc<Notify>,
}

struct SchedulerState {
    last_run: Option<Instant>,
    pending: Option<PendingRun>,
    next_id: u64,
}

pub struct CooldownScheduler {
    window: Duration,
    job: Arc<dyn Recompute>,
    state: Arc<Mutex<SchedulerState>>,
}

impl CooldownScheduler {
    pub fn new(window: Duration, job: Arc<dyn Recompute>) -> Self {
        Self {
            window,
            job,
            state: Arc::new(Mutex::new(SchedulerState {
                last_run: None,
                pending: None,
                next_id: 0,
            })),
        }
    }

    /// Ensures a run happens: immediately when the window has elapsed,
    /// otherwise at `last_run + window`. Every concurrent caller awaits the
    /// same eventual execution. A caller whose scheduled run is cancelled by
    /// `reset` returns without it having run.
    pub async fn trigger(&self) {
        let mut done = {
            let mut state = self.state.lock().unwrap();
            match &state.pending {
                Some(pending) => pending.done.clone(),
                None => {
                    let now = Instant::now();
                    let deadline = match state.last_run {
                        Some(last) if now.duration_since(last) < self.window => last + self.window,
                        _ => now,
                    };
                    self.schedule(&mut state, deadline)
                }
            }
        };

        while !*done.borrow() {
            // sender dropped means the run was cancelled by reset
            if done.changed().await.is_err() {
                return;
            }
        }
    }

    /// Cancels any scheduled-but-not-started execution and restarts the
    /// cooldown clock, from now or from epoch (forcing the next trigger to
    /// run immediately). A run already started is allowed to finish.
    pub fn reset(&self, start_from_now: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(pending) = state.pending.take() {
            pending.cancel.notify_one();
        }
        state.last_run = if start_from_now {
            Some(Instant::now())
        } else {
            None
        };
    }

    fn schedule(&self, state: &mut SchedulerState, deadline: Instant) -> watch::Receiver<bool> {
        let id = state.next_id;
        state.next_id += 1;

        let (tx, rx) = watch::channel(false);
        let cancel = Arc::new(Notify::new());

        let job = Arc::clone(&self.job);
        let shared = Arc::clone(&self.state);
        let cancelled = Arc::clone(&cancel);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.notified() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            // point of no return: reset no longer stops this run
            {
                let mut state = shared.lock().unwrap();
                state.last_run = Some(Instant::now());
            }
            job.run().await;
            {
                let mut state = shared.lock().unwrap();
                if state.pending.as_ref().map(|p| p.id) == Some(id) {
                    state.pending = None;
                }
            }
            let _ = tx.send(true);
        });

        state.pending = Some(PendingRun {
            id,
            done: rx.clone(),
            cancel,
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{advance, Duration};

    #[derive(Default)]
    struct CountingJob {
        runs: AtomicUsize,
    }

    impl CountingJob {
        fn count(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Recompute for CountingJob {
        async fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    const WINDOW: Duration = Duration::from_millis(120_000);

    fn scheduler(job: &Arc<CountingJob>) -> Arc<CooldownScheduler> {
        Arc::new(CooldownScheduler::new(
            WINDOW,
            Arc::clone(job) as Arc<dyn Recompute>,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_triggers_coalesce_into_one_run() {
        let job = Arc::new(CountingJob::default());
        let scheduler = self::scheduler(&job);

        // enter the cooldown window first so the burst lands mid-window
        scheduler.trigger().await;
        assert_eq!(job.count(), 1);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let scheduler = Arc::clone(&scheduler);
            handles.push(tokio::spawn(async move { scheduler.trigger().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // all sixteen shared one scheduled execution
        assert_eq!(job.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_after_elapsed_window_runs_immediately() {
        let job = Arc::new(CountingJob::default());
        let scheduler = self::scheduler(&job);

        scheduler.trigger().await;
        assert_eq!(job.count(), 1);

        advance(WINDOW + Duration::from_millis(1)).await;
        scheduler.trigger().await;
        assert_eq!(job.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_a_scheduled_run() {
        let job = Arc::new(CountingJob::default());
        let scheduler = self::scheduler(&job);

        scheduler.trigger().await;
        assert_eq!(job.count(), 1);

        // schedule a run for later in the window, then cancel it
        let waiting = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.trigger().await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        scheduler.reset(true);

        waiting.await.unwrap();
        advance(WINDOW * 2).await;
        tokio::task::yield_now().await;
        assert_eq!(job.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_to_epoch_forces_the_next_trigger_to_run_now() {
        let job = Arc::new(CountingJob::default());
        let scheduler = self::scheduler(&job);

        scheduler.trigger().await;
        scheduler.reset(false);
        scheduler.trigger().await;
        assert_eq!(job.count(), 2);
    }
}
