use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::jobs::JobResult;
use crate::notifications::event::JobEvent;
use crate::notifications::sink::NotificationSink;

/// In-process fan-out for gateway subscribers.
///
/// Publishing with no subscribers is not an error; slow subscribers lag and
/// lose the oldest events.
pub struct BroadcastSink {
    sender: broadcast::Sender<JobEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn publish(&self, event: &JobEvent) -> JobResult<()> {
        // Err only means nobody is listening
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "broadcast"
    }
}
