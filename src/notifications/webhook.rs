//! Webhook sink: POSTs each event as JSON to a configured URL.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::WebhookSettings;
use crate::jobs::JobResult;
use crate::notifications::event::JobEvent;
use crate::notifications::sink::NotificationSink;

/// Shared HTTP client; connection pooling across all webhook sinks
static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(concat!("opsdeck/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
});

pub struct WebhookSink {
    config: WebhookSettings,
}

impl WebhookSink {
    pub fn new(config: WebhookSettings) -> Self {
        Self { config }
    }

    fn request(&self, event: &JobEvent) -> reqwest::RequestBuilder {
        let mut request = HTTP_CLIENT
            .post(&self.config.url)
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .json(event);

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        request
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    /// Delivery happens on a background task; the outcome is only logged
    async fn publish(&self, event: &JobEvent) -> JobResult<()> {
        let request = self.request(event);
        let url = self.config.url.clone();
        let kind = event.kind;
        let execution_id = event.execution_id;

        tokio::spawn(async move {
            let start = Instant::now();
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(
                        url = %url,
                        event = %kind,
                        execution_id = %execution_id,
                        status_code = resp.status().as_u16(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Webhook delivered"
                    );
                }
                Ok(resp) => {
                    tracing::warn!(
                        url = %url,
                        event = %kind,
                        execution_id = %execution_id,
                        status_code = resp.status().as_u16(),
                        "Webhook rejected event"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        url = %url,
                        event = %kind,
                        execution_id = %execution_id,
                        error = %e,
                        "Webhook delivery failed"
                    );
                }
            }
        });

        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::{CreateJobDefinition, Execution};
    use crate::jobs::types::TriggerType;
    use crate::notifications::event::JobEventKind;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;

    fn event() -> JobEvent {
        let job = CreateJobDefinition::shell("hook", "true").into_definition(Utc::now());
        let execution = Execution::pending(job.id, TriggerType::Manual, None, json!({}), Utc::now());
        JobEvent::new(JobEventKind::Completed, &job, &execution)
    }

    #[test]
    fn test_request_carries_headers_and_json_body() {
        let sink = WebhookSink::new(WebhookSettings {
            url: "http://127.0.0.1:9/hook".into(),
            timeout_seconds: 3,
            headers: HashMap::from([("X-Token".to_string(), "abc".to_string())]),
        });

        let request = sink.request(&event()).build().unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.headers()["X-Token"], "abc");
        assert_eq!(request.timeout(), Some(&Duration::from_secs(3)));

        let body: serde_json::Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(body["kind"], "completed");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_does_not_fail_publish() {
        let sink = WebhookSink::new(WebhookSettings {
            url: "http://127.0.0.1:9/hook".into(),
            timeout_seconds: 1,
            headers: HashMap::new(),
        });
        assert!(sink.publish(&event()).await.is_ok());
    }
}
