//! Failure notifications delivered to chat webhooks

use crate::core::{context::ExpressionContext, state::JobStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Error types for notification delivery
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No webhook URL configured")]
    MissingWebhook,
}

/// What a notification says about a job cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub workflow: String,
    pub job: String,
    /// Matrix label, e.g. `(ubuntu-latest, 3.9)`
    pub cell: String,
    pub status: JobStatus,
    pub git_ref: String,
    pub event: String,
    pub repository: Option<String>,
    pub author_name: Option<String>,
    /// Message text; a summary line is generated when absent
    pub text: Option<String>,
}

impl NotificationPayload {
    /// Build a payload describing the job cell a context belongs to
    pub fn from_context(ctx: &ExpressionContext) -> Self {
        let github = |key: &str| ctx.github.get(key).cloned().unwrap_or_default();
        Self {
            workflow: github("workflow"),
            job: github("job"),
            cell: ctx.matrix.label(),
            status: ctx.job_status,
            git_ref: github("ref"),
            event: github("event_name"),
            repository: ctx.github.get("repository").cloned(),
            author_name: None,
            text: None,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_author(mut self, author_name: impl Into<String>) -> Self {
        self.author_name = Some(author_name.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// One-line summary, e.g. `failure: tests / build (ubuntu-latest, 3.9) on refs/heads/main`
    pub fn summary(&self) -> String {
        let job = if self.cell.is_empty() {
            self.job.clone()
        } else {
            format!("{} {}", self.job, self.cell)
        };
        format!("{}: {} / {} on {}", self.status.as_str(), self.workflow, job, self.git_ref)
    }

    /// Slack attachment color for the status
    pub fn color(&self) -> &'static str {
        match self.status {
            JobStatus::Success => "good",
            JobStatus::Failure => "danger",
            JobStatus::Cancelled | JobStatus::Skipped => "warning",
        }
    }

    /// Slack incoming-webhook body
    pub fn to_slack_json(&self) -> Value {
        let field =
            |title: &str, value: &str| json!({ "title": title, "value": value, "short": true });

        let mut fields = vec![
            field("workflow", &self.workflow),
            field("job", &self.job),
            field("status", self.status.as_str()),
            field("ref", &self.git_ref),
            field("event", &self.event),
        ];
        if !self.cell.is_empty() {
            fields.push(field("matrix", &self.cell));
        }
        if let Some(repository) = &self.repository {
            fields.push(field("repo", repository));
        }

        let mut attachment = json!({
            "color": self.color(),
            "fields": fields,
        });
        if let Some(author) = &self.author_name {
            attachment["author_name"] = json!(author);
        }

        json!({
            "text": self.text.clone().unwrap_or_else(|| self.summary()),
            "attachments": [attachment],
        })
    }
}

/// Trait for notification delivery - allows for different implementations
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `payload` to `webhook_url`
    async fn notify(
        &self,
        webhook_url: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError>;
}

/// Posts JSON payloads to Slack-compatible incoming webhooks
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(timeout_secs: u64) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("greynir-ci/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        webhook_url: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        if webhook_url.trim().is_empty() {
            return Err(NotifyError::MissingWebhook);
        }

        debug!("Posting {} notification for job '{}'", payload.status.as_str(), payload.job);

        let response = self
            .client
            .post(webhook_url)
            .json(&payload.to_slack_json())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!("Notification delivered for job '{}'", payload.job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{context::SecretStore, matrix::MatrixCell};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn payload() -> NotificationPayload {
        let mut ctx = ExpressionContext::new(Arc::new(SecretStore::new()));
        ctx.github.insert("workflow".to_string(), "tests".to_string());
        ctx.github.insert("job".to_string(), "build".to_string());
        ctx.github.insert("ref".to_string(), "refs/heads/master".to_string());
        ctx.github.insert("event_name".to_string(), "push".to_string());
        ctx.matrix = MatrixCell {
            values: vec![
                ("os".to_string(), "ubuntu-latest".to_string()),
                ("python-version".to_string(), "3.9".to_string()),
            ],
        };
        ctx.job_status = JobStatus::Failure;
        NotificationPayload::from_context(&ctx)
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            payload().summary(),
            "failure: tests / build (ubuntu-latest, 3.9) on refs/heads/master"
        );
    }

    #[test]
    fn test_slack_json_shape() {
        let body = payload().with_author("Integration Testing").to_slack_json();
        assert_eq!(body["attachments"][0]["color"], "danger");
        assert_eq!(body["attachments"][0]["author_name"], "Integration Testing");
        let fields = body["attachments"][0]["fields"].as_array().unwrap();
        assert!(fields
            .iter()
            .any(|f| f["title"] == "matrix" && f["value"] == "(ubuntu-latest, 3.9)"));
        assert!(body["text"].as_str().unwrap().starts_with("failure: tests"));
    }

    #[test]
    fn test_explicit_text_wins() {
        let body = payload().with_text("Build broke").to_slack_json();
        assert_eq!(body["text"], "Build broke");
    }

    /// Accept one request and answer it with `status_line`
    async fn serve_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                status_line
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_webhook_delivery() {
        let (url, server) = serve_once("200 OK").await;
        let notifier = WebhookNotifier::new(5).unwrap();
        notifier.notify(&url, &payload()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("\"color\":\"danger\""));
    }

    #[tokio::test]
    async fn test_webhook_error_status() {
        let (url, _server) = serve_once("500 Internal Server Error").await;
        let notifier = WebhookNotifier::new(5).unwrap();
        let result = notifier.notify(&url, &payload()).await;
        assert!(matches!(result, Err(NotifyError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_missing_webhook() {
        let notifier = WebhookNotifier::new(5).unwrap();
        let result = notifier.notify("", &payload()).await;
        assert!(matches!(result, Err(NotifyError::MissingWebhook)));
    }
}
