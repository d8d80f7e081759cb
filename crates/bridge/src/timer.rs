use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

pub const POLL_PERIOD: Duration = Duration::from_secs(60);

type Tick = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Repeating background task. The first tick fires one period after start.
pub struct PollTimer {
    period: Duration,
    tick: Tick,
    handle: Mutex<Option<JoinHandle<()>>>,
    spawned: AtomicUsize,
}

impl PollTimer {
    pub fn new<F>(period: Duration, tick: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            period,
            tick: Arc::new(tick),
            handle: Mutex::new(None),
            spawned: AtomicUsize::new(0),
        }
    }

    /// No-op while already running. Returns whether a task was started.
    pub async fn start(&self) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return false;
        }
        let period = self.period;
        let tick = self.tick.clone();
        *handle = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        }));
        self.spawned.fetch_add(1, Ordering::Relaxed);
        debug!(period_secs = period.as_secs(), "Poll timer started");
        true
    }

    /// Aborts the running task without waiting for it. No-op when stopped.
    pub async fn stop(&self) -> bool {
        match self.handle.lock().await.take() {
            Some(task) => {
                task.abort();
                debug!("Poll timer stopped");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Number of tick tasks spawned over the timer's lifetime.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        if let Some(task) = self.handle.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    fn counting_timer(period: Duration) -> (PollTimer, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let timer = PollTimer::new(period, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });
        (timer, ticks)
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_after_one_period() {
        let (timer, ticks) = counting_timer(POLL_PERIOD);
        assert!(timer.start().await);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(POLL_PERIOD).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let (timer, ticks) = counting_timer(Duration::from_secs(10));
        assert!(timer.start().await);
        assert!(!timer.start().await);
        assert_eq!(timer.spawned(), 1);
        assert!(timer.is_running().await);

        assert!(timer.stop().await);
        assert!(!timer.stop().await);
        assert!(!timer.is_running().await);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        assert!(timer.start().await);
        assert_eq!(timer.spawned(), 2);
    }
}
