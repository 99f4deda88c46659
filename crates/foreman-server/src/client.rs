//! Runtime-side heartbeat client.
//!
//! Sessions report state and poll for commands over plain HTTP. The
//! channel is best-effort: every failure is logged and swallowed so an
//! unreachable server never stalls or kills a session.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::{ControlCommand, HeartbeatUpdate};

/// Per-request timeout. Heartbeats ride the turn loop, so they must
/// fail fast when the channel is down.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Heartbeat client construction failure.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Commands payload returned by the channel.
///
/// Command names arrive as raw strings; unknown names are skipped with
/// a warning rather than poisoning the whole batch.
#[derive(Debug, Deserialize)]
struct CommandsResponse {
    #[serde(default)]
    commands: Vec<String>,
}

/// HTTP client a session uses to talk to the channel server.
pub struct HeartbeatClient {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl HeartbeatClient {
    /// Create a client for one session against `base_url`.
    pub fn new(base_url: &str, session_id: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_id: session_id.to_string(),
        })
    }

    /// Report a partial state update. Fire-and-forget: failures are
    /// logged at debug and dropped.
    pub async fn report(&self, update: &HeartbeatUpdate) {
        let url = format!(
            "{}/api/agents/{}/heartbeat",
            self.base_url, self.session_id
        );
        match self.client.post(&url).json(update).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                debug!(status = %resp.status(), "heartbeat rejected");
            }
            Err(err) => {
                debug!(error = %err, "heartbeat failed");
            }
        }
    }

    /// Poll the channel for queued commands. Any failure yields an
    /// empty batch.
    pub async fn drain_commands(&self) -> Vec<ControlCommand> {
        let url = format!(
            "{}/api/agents/{}/commands",
            self.base_url, self.session_id
        );
        let resp = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                debug!(error = %err, "command poll failed");
                return Vec::new();
            }
        };
        let body = match resp.json::<CommandsResponse>().await {
            Ok(body) => body,
            Err(err) => {
                debug!(error = %err, "command poll returned malformed body");
                return Vec::new();
            }
        };
        body.commands
            .iter()
            .filter_map(|raw| match ControlCommand::from_str(raw) {
                Ok(command) => Some(command),
                Err(err) => {
                    warn!(error = %err, "skipping unknown command");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn report_posts_the_update() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agents/s1/heartbeat"))
            .and(body_partial_json(json!({ "iteration": 4, "role": "qa" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HeartbeatClient::new(&server.uri(), "s1").unwrap();
        client
            .report(&HeartbeatUpdate {
                iteration: Some(4),
                role: Some("qa".to_string()),
                ..HeartbeatUpdate::default()
            })
            .await;
    }

    #[test]
    fn none_fields_are_omitted_from_the_wire() {
        let update = HeartbeatUpdate {
            iteration: Some(1),
            ..HeartbeatUpdate::default()
        };
        let wire = serde_json::to_value(&update).unwrap();
        assert_eq!(wire, json!({ "iteration": 1 }));
    }

    #[tokio::test]
    async fn drain_parses_known_commands_and_skips_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agents/s1/commands"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "commands": ["pause", "reboot", "stop"]
            })))
            .mount(&server)
            .await;

        let client = HeartbeatClient::new(&server.uri(), "s1").unwrap();
        let commands = client.drain_commands().await;
        assert_eq!(commands, vec![ControlCommand::Pause, ControlCommand::Stop]);
    }

    #[tokio::test]
    async fn server_error_yields_an_empty_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agents/s1/commands"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HeartbeatClient::new(&server.uri(), "s1").unwrap();
        assert!(client.drain_commands().await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_channel_is_silent() {
        // Nothing listens on this port; both calls must come back clean.
        let client = HeartbeatClient::new("http://127.0.0.1:1", "s1").unwrap();
        client.report(&HeartbeatUpdate::default()).await;
        assert!(client.drain_commands().await.is_empty());
    }

    #[tokio::test]
    async fn trailing_slash_in_base_url_is_tolerated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agents/s1/commands"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "commands": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let base = format!("{}/", server.uri());
        let client = HeartbeatClient::new(&base, "s1").unwrap();
        assert!(client.drain_commands().await.is_empty());
    }
}
