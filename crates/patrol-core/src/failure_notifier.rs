//! Severity/metadata enrichment and fan-out to external sinks on terminal
//! job failure (`spec.md` §4.8, C8).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::model::JobFailurePayload;

const SINK_MAX_ATTEMPTS: u32 = 3;
const SINK_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// A destination for terminal-failure notifications. Implementors should not
/// panic; a failing sink must never prevent its siblings from being tried.
#[async_trait::async_trait]
pub trait FailureSink: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, payload: &JobFailurePayload) -> anyhow::Result<()>;
}

pub struct FailureNotifier {
    sinks: Vec<Arc<dyn FailureSink>>,
}

impl FailureNotifier {
    pub fn new(sinks: Vec<Arc<dyn FailureSink>>) -> Self {
        Self { sinks }
    }

    /// Fans out to every configured sink. A missing sink list is a no-op, per
    /// spec. Metadata is sanitized (empty keys/values dropped) before sinks
    /// ever see the payload.
    pub async fn notify(&self, mut payload: JobFailurePayload) {
        sanitize_metadata(&mut payload);

        if self.sinks.is_empty() {
            tracing::debug!(job_id = %payload.job_id, "no failure sinks configured, dropping");
            return;
        }

        let mut handles = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let payload = payload.clone();
            handles.push(tokio::spawn(async move {
                send_with_retry(sink.as_ref(), &payload).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn send_with_retry(sink: &dyn FailureSink, payload: &JobFailurePayload) {
    let mut delay = SINK_RETRY_BASE_DELAY;
    for attempt in 1..=SINK_MAX_ATTEMPTS {
        match sink.send(payload).await {
            Ok(()) => return,
            Err(err) if attempt < SINK_MAX_ATTEMPTS => {
                tracing::warn!(sink = sink.name(), attempt, error = %err, "failure sink retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => {
                tracing::error!(sink = sink.name(), attempts = attempt, error = %err, "failure sink gave up");
            }
        }
    }
}

fn sanitize_metadata(payload: &mut JobFailurePayload) {
    payload.metadata.retain(|k, v| {
        if k.trim().is_empty() {
            return false;
        }
        match v {
            Value::String(s) => !s.trim().is_empty(),
            Value::Null => false,
            _ => true,
        }
    });
}

/// Posts a compact JSON payload to a Slack incoming webhook.
pub struct SlackSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackSink {
    pub fn new(client: reqwest::Client, webhook_url: String) -> Self {
        Self { client, webhook_url }
    }
}

#[async_trait::async_trait]
impl FailureSink for SlackSink {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, payload: &JobFailurePayload) -> anyhow::Result<()> {
        let text = format!(
            "[{}] job {} ({}) failed: {}",
            severity_label(payload.severity),
            payload.job_id,
            payload.job_type,
            payload.error_class
        );

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("slack webhook returned {}", response.status());
        }
        Ok(())
    }
}

/// Triggers a PagerDuty Events API v2 incident.
pub struct PagerDutySink {
    client: reqwest::Client,
    routing_key: String,
    endpoint: String,
}

impl PagerDutySink {
    pub fn new(client: reqwest::Client, routing_key: String) -> Self {
        Self {
            client,
            routing_key,
            endpoint: "https://events.pagerduty.com/v2/enqueue".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl FailureSink for PagerDutySink {
    fn name(&self) -> &str {
        "pagerduty"
    }

    async fn send(&self, payload: &JobFailurePayload) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "routing_key": self.routing_key,
            "event_action": "trigger",
            "dedup_key": payload.job_id.to_string(),
            "payload": {
                "summary": format!("job {} failed: {}", payload.job_id, payload.error_class),
                "source": payload.site_name.clone().unwrap_or_else(|| payload.job_type.to_string()),
                "severity": severity_label(payload.severity),
                "custom_details": payload.metadata,
            }
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("pagerduty events api returned {}", response.status());
        }
        Ok(())
    }
}

fn severity_label(severity: crate::model::Severity) -> &'static str {
    match severity {
        crate::model::Severity::Info => "info",
        crate::model::Severity::Warning => "warning",
        crate::model::Severity::Critical => "critical",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingSink {
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait::async_trait]
    impl FailureSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&self, _payload: &JobFailurePayload) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                anyhow::bail!("transient");
            }
            Ok(())
        }
    }

    fn sample_payload() -> JobFailurePayload {
        JobFailurePayload {
            job_id: Uuid::new_v4(),
            job_type: crate::model::JobType::Browser,
            site_id: None,
            site_name: None,
            scope: "browser".into(),
            severity: crate::model::Severity::Critical,
            error_class: "handler_error".into(),
            metadata: serde_json::Map::new(),
            occurred_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_sink_list_is_a_no_op() {
        let notifier = FailureNotifier::new(vec![]);
        notifier.notify(sample_payload()).await;
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(CountingSink { calls: calls.clone(), fail_first: true });
        let notifier = FailureNotifier::new(vec![sink]);

        notifier.notify(sample_payload()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sanitize_drops_empty_entries() {
        let mut payload = sample_payload();
        payload.metadata.insert("keep".into(), Value::String("value".into()));
        payload.metadata.insert("".into(), Value::String("dropped".into()));
        payload.metadata.insert("blank".into(), Value::String("  ".into()));
        payload.metadata.insert("null".into(), Value::Null);

        sanitize_metadata(&mut payload);

        assert_eq!(payload.metadata.len(), 1);
        assert!(payload.metadata.contains_key("keep"));
    }
}
