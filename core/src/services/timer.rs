use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Spawn a repeating timer that awaits `on_tick` on every period until
/// `cancel` fires. The first tick happens immediately. A tick that is
/// already running is allowed to finish; cancellation is only observed
/// between ticks.
pub fn spawn_interval<F, Fut>(period: Duration, cancel: CancellationToken, mut on_tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => on_tick().await,
            }
        }
    })
}
