//! HTTP transport to agent ingress endpoints.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::caster::{Caster, DispatchError};
use crate::message::CastMessage;
use crate::topic::topic_host;

/// Casts messages by POSTing them to the addressed agent.
///
/// The agent URL comes from a template in which `{host}` is replaced by the
/// host part of the topic, e.g. `http://{host}:8470`.
pub struct HttpCaster {
    client: reqwest::Client,
    base_topic: String,
    url_template: String,
}

impl HttpCaster {
    /// Create a caster for topics under `base_topic`.
    pub fn new(base_topic: &str, url_template: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_topic: base_topic.to_string(),
            url_template: url_template.trim_end_matches('/').to_string(),
        })
    }

    /// Ingress URL for a topic.
    pub fn endpoint(&self, topic: &str) -> Result<String, DispatchError> {
        let host = topic_host(&self.base_topic, topic)
            .ok_or_else(|| DispatchError::InvalidTopic(topic.to_string()))?;
        let base = self.url_template.replace("{host}", host.as_str());
        Ok(format!("{base}/v1/cast/{topic}"))
    }
}

#[async_trait]
impl Caster for HttpCaster {
    async fn cast(&self, topic: &str, message: CastMessage) -> Result<(), DispatchError> {
        let url = self.endpoint(topic)?;
        debug!(url = %url, method = %message.method, "Casting message");

        let unavailable = |reason: String| DispatchError::Unavailable {
            topic: topic.to_string(),
            reason,
        };

        let response = self
            .client
            .post(&url)
            .json(&message)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unavailable(format!("agent answered {}", response.status())));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> CastMessage {
        CastMessage {
            method: "recover_vm".to_string(),
            version: "1.0".to_string(),
            args: serde_json::json!({}),
        }
    }

    #[test]
    fn test_endpoint_from_template() {
        let caster = HttpCaster::new("recover", "http://{host}:8470/").unwrap();
        assert_eq!(
            caster.endpoint("recover.compute-2").unwrap(),
            "http://compute-2:8470/v1/cast/recover.compute-2"
        );
        assert!(matches!(
            caster.endpoint("compute.compute-2"),
            Err(DispatchError::InvalidTopic(_))
        ));
    }

    #[tokio::test]
    async fn test_cast_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/cast/recover.h2"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let caster = HttpCaster::new("recover", &server.uri()).unwrap();
        caster.cast("recover.h2", message()).await.unwrap();
    }

    #[tokio::test]
    async fn test_cast_rejected_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let caster = HttpCaster::new("recover", &server.uri()).unwrap();
        let err = caster.cast("recover.h2", message()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_cast_unreachable_is_unavailable() {
        let caster = HttpCaster::new("recover", "http://127.0.0.1:9").unwrap();
        let err = caster.cast("recover.h2", message()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unavailable { .. }));
    }
}
