use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::NotificationsConfig;
use crate::notifications::broadcast::BroadcastSink;
use crate::notifications::event::JobEvent;
use crate::notifications::log::TracingSink;
use crate::notifications::sink::NotificationSink;
use crate::notifications::webhook::WebhookSink;

/// Fans each lifecycle event out to every registered sink.
///
/// Always owns a broadcast channel so gateways can subscribe. Cloning is
/// cheap; clones share the same sinks and channel.
#[derive(Clone)]
pub struct NotificationHub {
    broadcast: Arc<BroadcastSink>,
    sinks: Arc<Vec<Arc<dyn NotificationSink>>>,
}

impl NotificationHub {
    /// A hub with only the broadcast channel
    pub fn new(capacity: usize) -> Self {
        Self {
            broadcast: Arc::new(BroadcastSink::new(capacity)),
            sinks: Arc::new(Vec::new()),
        }
    }

    pub fn from_config(config: &NotificationsConfig) -> Self {
        let mut hub = Self::new(config.broadcast_capacity);
        if config.log_events {
            hub = hub.with_sink(Arc::new(TracingSink));
        }
        for webhook in &config.webhooks {
            hub = hub.with_sink(Arc::new(WebhookSink::new(webhook.clone())));
        }
        hub
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        let mut sinks = self.sinks.as_ref().clone();
        sinks.push(sink);
        self.sinks = Arc::new(sinks);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.broadcast.subscribe()
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        std::iter::once(self.broadcast.name())
            .chain(self.sinks.iter().map(|s| s.name()))
            .collect()
    }

    /// Publish to all sinks in registration order
    pub async fn emit(&self, event: JobEvent) {
        if let Err(e) = self.broadcast.publish(&event).await {
            tracing::warn!(sink = self.broadcast.name(), error = %e, "Notification sink failed");
        }

        for sink in self.sinks.iter() {
            if let Err(e) = sink.publish(&event).await {
                tracing::warn!(
                    sink = sink.name(),
                    event = %event.kind,
                    execution_id = %event.execution_id,
                    error = %e,
                    "Notification sink failed"
                );
            }
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::from_config(&NotificationsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::{CreateJobDefinition, Execution};
    use crate::jobs::types::TriggerType;
    use crate::jobs::{JobError, JobResult};
    use crate::notifications::event::JobEventKind;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    struct Failing;

    #[async_trait]
    impl NotificationSink for Failing {
        async fn publish(&self, _event: &JobEvent) -> JobResult<()> {
            Err(JobError::Notification("down".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<JobEventKind>>);

    #[async_trait]
    impl NotificationSink for Recording {
        async fn publish(&self, event: &JobEvent) -> JobResult<()> {
            self.0.lock().unwrap().push(event.kind);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn event(kind: JobEventKind) -> JobEvent {
        let job = CreateJobDefinition::shell("hub", "true").into_definition(Utc::now());
        let execution = Execution::pending(job.id, TriggerType::Manual, None, json!({}), Utc::now());
        JobEvent::new(kind, &job, &execution)
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let recording = Arc::new(Recording::default());
        let hub = NotificationHub::new(8)
            .with_sink(Arc::new(Failing))
            .with_sink(recording.clone());
        let mut rx = hub.subscribe();

        hub.emit(event(JobEventKind::Started)).await;
        hub.emit(event(JobEventKind::Completed)).await;

        assert_eq!(
            *recording.0.lock().unwrap(),
            vec![JobEventKind::Started, JobEventKind::Completed]
        );
        assert_eq!(rx.recv().await.unwrap().kind, JobEventKind::Started);
        assert_eq!(rx.recv().await.unwrap().kind, JobEventKind::Completed);
    }

    #[test]
    fn test_from_config_registers_sinks() {
        let mut config = NotificationsConfig::default();
        config.webhooks.push(crate::config::WebhookSettings {
            url: "https://example.com/hook".into(),
            timeout_seconds: 5,
            headers: Default::default(),
        });
        let hub = NotificationHub::from_config(&config);
        assert_eq!(hub.sink_names(), vec!["broadcast", "log", "webhook"]);

        config.log_events = false;
        config.webhooks.clear();
        assert_eq!(NotificationHub::from_config(&config).sink_names(), vec!["broadcast"]);
    }
}
