use log::{debug, info};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A background job running on a fixed interval.
///
/// Dropping the handle stops the job.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the job. A tick in progress is cancelled at its next await point.
    pub fn stop(&self) {
        if !self.handle.is_finished() {
            info!("stopping {} job", self.name);
            self.handle.abort();
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Run `tick` once immediately, then every `every`.
///
/// Ticks never overlap: a tick that overruns the interval delays the next one
/// and missed ticks are skipped rather than bunched up.
pub fn spawn_periodic<F, Fut>(name: &'static str, every: Duration, mut tick: F) -> PeriodicTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    info!("scheduling {name} every {every:?}");
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            debug!("{name} tick");
            tick().await;
        }
    });
    PeriodicTask { name, handle }
}
