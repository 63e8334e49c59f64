use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::controller::Event;

/// Delivers controller events after a delay.
#[derive(Clone)]
pub struct Scheduler {
    events: UnboundedSender<Event>,
}

/// A pending delivery. Cancelled when dropped.
pub struct ScheduledTask {
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(events: UnboundedSender<Event>) -> Self {
        Scheduler { events }
    }

    pub fn schedule(&self, delay: Duration, event: Event) -> ScheduledTask {
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
        ScheduledTask { task }
    }
}

impl ScheduledTask {
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Instant};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn delivers_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(tx);
        let started = Instant::now();
        let _task = scheduler.schedule(Duration::from_secs(10), Event::Retry { seq: 1 });

        assert!(matches!(rx.recv().await, Some(Event::Retry { seq: 1 })));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_delivers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(tx);
        let task = scheduler.schedule(Duration::from_secs(1), Event::Retry { seq: 1 });
        task.cancel();

        let event = timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(event.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_task_never_delivers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(tx);
        drop(scheduler.schedule(Duration::from_secs(1), Event::Retry { seq: 1 }));

        let event = timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(event.is_err());
    }
}
