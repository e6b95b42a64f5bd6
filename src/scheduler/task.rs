//! # scheduler::task
//!
//! [`PeriodicTask`] runs a job every `period`, first fire one period after
//! spawn. Fires that come due while the job is still running are dropped, so
//! a slow job never triggers catch-up runs and the schedule stays on the
//! start-anchored grid.
//!
//! Cancellation is checked between fires only. A job already running when
//! `cancel` is called finishes normally.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub struct PeriodicTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // interval_at panics on a zero period.
        let period = period.max(Duration::from_millis(1));
        let (cancel, mut cancelled) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut busy_until = Instant::now();

            loop {
                tokio::select! {
                    biased;
                    // Fires on cancel() and when the task handle is dropped.
                    _ = &mut cancelled => break,
                    deadline = interval.tick() => {
                        // Skip still yields one late tick after a long run.
                        if deadline < busy_until {
                            continue;
                        }
                        job().await;
                        busy_until = Instant::now();
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    /// Stop future fires. Returns the join handle for callers that want to
    /// wait for an in-flight job.
    pub fn cancel(self) -> JoinHandle<()> {
        let _ = self.cancel.send(());
        self.handle
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
