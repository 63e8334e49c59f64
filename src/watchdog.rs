use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc::UnboundedSender, Notify};
use tokio::task::JoinHandle;

use crate::controller::Event;

/// Fires `Event::Stalled` once if no chunk is fed for `timeout`.
/// Dropping the watchdog disarms it.
pub struct Watchdog {
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Watchdog {
    pub fn arm(timeout: Duration, events: UnboundedSender<Event>, generation: u64) -> Self {
        let notify = Arc::new(Notify::new());
        let fed = notify.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        let _ = events.send(Event::Stalled { generation });
                        break;
                    }
                    _ = fed.notified() => {}
                }
            }
        });

        Watchdog { notify, task }
    }

    pub fn feeder(&self) -> Feeder {
        Feeder(self.notify.clone())
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct Feeder(Arc<Notify>);

impl Feeder {
    pub fn feed(&self) {
        self.0.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout, Instant};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_silence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watchdog = Watchdog::arm(TIMEOUT, tx, 7);
        let started = Instant::now();

        let event = rx.recv().await;
        assert!(matches!(event, Some(Event::Stalled { generation: 7 })));
        assert!(started.elapsed() >= TIMEOUT);
        assert!(started.elapsed() < TIMEOUT + Duration::from_secs(1));

        let again = timeout(Duration::from_secs(300), rx.recv()).await;
        assert!(!matches!(again, Ok(Some(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn feeding_resets_countdown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watchdog = Watchdog::arm(TIMEOUT, tx, 1);
        let feeder = watchdog.feeder();

        for _ in 0..5 {
            sleep(Duration::from_secs(20)).await;
            feeder.feed();
        }
        assert!(rx.try_recv().is_err());

        let last_feed = Instant::now();
        let event = rx.recv().await;
        assert!(matches!(event, Some(Event::Stalled { generation: 1 })));
        assert!(last_feed.elapsed() >= TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_disarms() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watchdog = Watchdog::arm(TIMEOUT, tx, 1);
        drop(watchdog);

        let event = timeout(Duration::from_secs(120), rx.recv()).await;
        assert!(!matches!(event, Ok(Some(_))));
    }
}
