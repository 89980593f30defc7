//! Liveness watchdog for scanning sessions
//!
//! A caller that goes away without stopping its session would leave the
//! camera running. The caller is expected to call `heartbeat` more often than
//! the configured timeout; when a full timeout passes without one the
//! watchdog fires its expiry callback, once.
//!
//! One tokio task owns the deadline. Beats, stop requests and expiry are all
//! handled in its `select!` loop, so a beat can never race an expiry.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

enum Command {
    Beat,
    Stop,
}

/// Armed watchdog. Dropping it disarms it.
#[derive(Debug)]
pub struct HeartbeatWatchdog {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl HeartbeatWatchdog {
    /// Arm on the current runtime. `None` when `timeout` is zero.
    ///
    /// Panics outside a tokio runtime, like `tokio::spawn`.
    pub fn arm<F>(timeout: Duration, on_expire: F) -> Option<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::arm_on(&Handle::current(), timeout, on_expire)
    }

    /// Arm on a specific runtime, for callers outside any runtime context.
    pub fn arm_on<F>(handle: &Handle, timeout: Duration, on_expire: F) -> Option<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        if timeout.is_zero() {
            return None;
        }

        let (commands, mut rx) = mpsc::unbounded_channel();
        let task = handle.spawn(async move {
            let deadline = sleep(timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    biased;

                    command = rx.recv() => match command {
                        Some(Command::Beat) => {
                            deadline.as_mut().reset(Instant::now() + timeout);
                        }
                        Some(Command::Stop) | None => {
                            debug!("heartbeat watchdog disarmed");
                            return;
                        }
                    },
                    _ = &mut deadline => {
                        info!("No heartbeat for {:?}; expiring session", timeout);
                        on_expire();
                        return;
                    }
                }
            }
        });

        debug!("heartbeat watchdog armed: {:?}", timeout);
        Some(Self {
            commands,
            task,
        })
    }

    /// Push the deadline a full timeout into the future.
    pub fn beat(&self) {
        // The task is gone once it has expired; late beats are moot.
        let _ = self.commands.send(Command::Beat);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for HeartbeatWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_is_disabled() {
        let (_count, on_expire) = counter();
        assert!(HeartbeatWatchdog::arm(Duration::ZERO, on_expire).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expires_once_without_beats() {
        let (count, on_expire) = counter();
        let watchdog = HeartbeatWatchdog::arm(Duration::from_millis(200), on_expire).unwrap();

        tokio::time::sleep(Duration::from_millis(199)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(watchdog.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn beats_push_the_deadline() {
        let (count, on_expire) = counter();
        let watchdog = HeartbeatWatchdog::arm(Duration::from_millis(200), on_expire).unwrap();

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(150)).await;
            watchdog.beat();
            settle().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_expiry() {
        let (count, on_expire) = counter();
        let watchdog = HeartbeatWatchdog::arm(Duration::from_millis(100), on_expire).unwrap();
        watchdog.stop();
        settle().await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(watchdog.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_disarms() {
        let (count, on_expire) = counter();
        drop(HeartbeatWatchdog::arm(Duration::from_millis(100), on_expire));

        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
