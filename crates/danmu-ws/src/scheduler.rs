//! Periodic task runner driven by a [`Schedule`].

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use danmu_core::config::Schedule;

/// A background task that calls `tick` on every schedule fire.
///
/// Ticks never overlap: the next wait starts after the previous tick
/// completes. Cancelling interrupts both the wait and a running tick.
pub struct Scheduler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the runner. `tick` returns `false` to stop the schedule.
    pub fn spawn<F, Fut>(name: impl Into<String>, schedule: Schedule, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            tracing::debug!(scheduler = %name, ?schedule, "scheduler started");
            loop {
                let wait = schedule.next_delay();
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                let keep_going = tokio::select! {
                    _ = child.cancelled() => break,
                    more = tick() => more,
                };
                if !keep_going {
                    break;
                }
            }
            tracing::debug!(scheduler = %name, "scheduler stopped");
        });

        Self { token, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel and wait for the runner to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!("scheduler task panicked");
            }
        }
    }
}
