//! Google Cloud Pub/Sub publisher over the REST API
//!
//! Sends one `topics.publish` request per outbox record. Works against the
//! Pub/Sub emulator when pointed at it with no access token.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use courier_outbox::{EventPublisher, OutboundMessage, OutboxRecord, PublishError};

pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Pub/Sub connection settings
#[derive(Clone, PartialEq, Eq)]
pub struct PubSubConfig {
    pub project_id: String,
    /// Base URL without trailing path, e.g. `https://pubsub.googleapis.com`
    pub endpoint: String,
    /// OAuth2 bearer token; `None` sends no Authorization header
    pub access_token: Option<String>,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for PubSubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubConfig")
            .field("project_id", &self.project_id)
            .field("endpoint", &self.endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl PubSubConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            endpoint: DEFAULT_PUBSUB_ENDPOINT.to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Plain HTTP to an emulator at `host` (e.g. `localhost:8085`), no auth
    pub fn emulator(project_id: impl Into<String>, host: &str) -> Self {
        Self {
            endpoint: format!("http://{host}"),
            ..Self::new(project_id)
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// `topics.publish` URL for `topic`
    pub fn publish_url(&self, topic: &str) -> String {
        format!(
            "{}/v1/projects/{}/topics/{}:publish",
            self.endpoint.trim_end_matches('/'),
            self.project_id,
            topic
        )
    }
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    messages: Vec<PubsubMessage<'a>>,
}

#[derive(Serialize)]
struct PubsubMessage<'a> {
    data: String,
    attributes: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct PublishResponse {
    #[serde(rename = "messageIds", default)]
    message_ids: Vec<String>,
}

/// [`EventPublisher`] for Google Cloud Pub/Sub
pub struct PubSubPublisher {
    client: reqwest::Client,
    config: PubSubConfig,
}

impl PubSubPublisher {
    pub fn new(config: PubSubConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &PubSubConfig {
        &self.config
    }

    fn transport_error(&self, e: reqwest::Error) -> PublishError {
        if e.is_timeout() {
            PublishError::Timeout(self.config.request_timeout)
        } else {
            PublishError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl EventPublisher for PubSubPublisher {
    #[instrument(skip(self, record), fields(outbox_id = %record.id, topic = %record.topic))]
    async fn publish_event(&self, record: &OutboxRecord) -> Result<(), PublishError> {
        let message = OutboundMessage::from_record(record)?;
        let body = PublishRequest {
            messages: vec![PubsubMessage {
                data: STANDARD.encode(&message.data),
                attributes: &message.attributes,
            }],
        };

        let mut request = self
            .client
            .post(self.config.publish_url(&message.topic))
            .json(&body);
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if status.is_success() {
            match response.json::<PublishResponse>().await {
                Ok(published) => debug!(message_ids = ?published.message_ids, "published to Pub/Sub"),
                Err(e) => debug!(error = %e, "published to Pub/Sub, response body not understood"),
            }
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &message.topic, body))
    }
}

/// Map a non-2xx Pub/Sub response to a publish error
pub fn classify_status(status: u16, topic: &str, body: String) -> PublishError {
    match status {
        404 => PublishError::TopicNotFound(topic.to_string()),
        429 | 500..=599 => PublishError::Unavailable(format!("status {status}: {body}")),
        _ => PublishError::Rejected { status, body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_url() {
        let config = PubSubConfig::new("demo").with_endpoint("http://localhost:8085/");
        assert_eq!(
            config.publish_url("todos"),
            "http://localhost:8085/v1/projects/demo/topics/todos:publish"
        );
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(404, "todos", String::new()),
            PublishError::TopicNotFound("todos".into())
        );
        assert!(matches!(
            classify_status(503, "todos", "busy".into()),
            PublishError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(429, "todos", "slow down".into()),
            PublishError::Unavailable(_)
        ));
        assert_eq!(
            classify_status(403, "todos", "denied".into()),
            PublishError::Rejected {
                status: 403,
                body: "denied".into()
            }
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = PubSubConfig::new("demo").with_access_token("secret-token");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("REDACTED"));
    }
}
