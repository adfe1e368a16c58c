//! HTTP implementation of [`GenerationService`].

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use tracing::Instrument;

use super::auth::{fetch_token, sanitize_error_body, ClientCredentials};
use super::error::{Result, UpstreamError};
use super::types::{StatusResponse, SubmitPayload, SubmitResponse, UpstreamStatus};
use super::GenerationService;
use crate::config::UpstreamConfig;

/// Per-call timeouts. Status polls are short; result downloads of
/// confirmed-successful jobs get the long budget.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamTimeouts {
    pub connect: Duration,
    pub status: Duration,
    pub submit: Duration,
    pub result: Duration,
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            status: Duration::from_secs(15),
            submit: Duration::from_secs(30),
            result: Duration::from_secs(300),
        }
    }
}

impl From<&UpstreamConfig> for UpstreamTimeouts {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_timeout_secs),
            status: Duration::from_secs(config.status_timeout_secs),
            submit: Duration::from_secs(config.submit_timeout_secs),
            result: Duration::from_secs(config.result_timeout_secs),
        }
    }
}

/// Client for the external generation API.
pub struct HttpGenerationClient {
    client: Client,
    base_url: String,
    credentials: ClientCredentials,
    timeouts: UpstreamTimeouts,
}

impl HttpGenerationClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: ClientCredentials,
        timeouts: UpstreamTimeouts,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.status)
            .build()
            .map_err(|e| {
                UpstreamError::Unavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            timeouts,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attaches a freshly exchanged bearer token and sends the request.
    async fn send_authorized(&self, request: RequestBuilder) -> Result<Response> {
        let token = fetch_token(&self.client, &self.credentials).await?;
        request
            .bearer_auth(token.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| UpstreamError::Unavailable(describe_send_error(&e)))
    }
}

fn describe_send_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

/// Server-side trouble and throttling say nothing about the job.
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Maps a non-2xx response to the error taxonomy.
async fn classify_failure(response: Response) -> UpstreamError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = sanitize_error_body(&body);
    if is_retryable_status(status) {
        UpstreamError::Unavailable(format!("HTTP {}: {}", status, message))
    } else {
        UpstreamError::rejected(Some(status.as_u16()), message)
    }
}

#[async_trait]
impl GenerationService for HttpGenerationClient {
    async fn submit(&self, payload: &SubmitPayload) -> Result<String> {
        let span = tracing::info_span!("upstream_submit", job_type = %payload.job_type);
        async {
            let request = self
                .client
                .post(self.url("/jobs"))
                .timeout(self.timeouts.submit)
                .json(payload);
            let response = self.send_authorized(request).await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(UpstreamError::rejected(
                    Some(status.as_u16()),
                    sanitize_error_body(&body),
                ));
            }

            let body: SubmitResponse = response.json().await.map_err(|e| {
                UpstreamError::rejected(
                    Some(status.as_u16()),
                    format!("submit response carried no job id: {}", e),
                )
            })?;
            if body.job_id.trim().is_empty() {
                return Err(UpstreamError::rejected(
                    Some(status.as_u16()),
                    "submit response carried an empty job id",
                ));
            }

            debug!("Upstream accepted job {}", body.job_id);
            Ok(body.job_id)
        }
        .instrument(span)
        .await
    }

    async fn poll_status(&self, external_job_id: &str) -> Result<UpstreamStatus> {
        let span = tracing::info_span!("upstream_status", job_id = %external_job_id);
        async {
            let request = self
                .client
                .get(self.url(&format!("/jobs/{}/status", external_job_id)))
                .timeout(self.timeouts.status);
            let response = self.send_authorized(request).await?;

            if !response.status().is_success() {
                return Err(classify_failure(response).await);
            }

            let body = response.text().await.map_err(|e| {
                UpstreamError::Unavailable(format!("failed to read status body: {}", e))
            })?;
            let status = match serde_json::from_str::<StatusResponse>(&body) {
                Ok(parsed) => parsed.into_status(),
                Err(_) => UpstreamStatus::parse(&body),
            };
            debug!("Upstream status for {}: {}", external_job_id, status);
            Ok(status)
        }
        .instrument(span)
        .await
    }

    async fn fetch_result(&self, external_job_id: &str) -> Result<String> {
        let span = tracing::info_span!("upstream_result", job_id = %external_job_id);
        async {
            let request = self
                .client
                .get(self.url(&format!("/jobs/{}/result", external_job_id)))
                .timeout(self.timeouts.result);
            let response = self.send_authorized(request).await?;

            if !response.status().is_success() {
                return Err(classify_failure(response).await);
            }

            response.text().await.map_err(|e| {
                UpstreamError::Unavailable(format!("failed to read result body: {}", e))
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Avatar, Job, JobRequest};
    use chrono::Utc;
    use httpmock::prelude::*;
    use secrecy::SecretString;

    fn client_for(server: &MockServer) -> HttpGenerationClient {
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"tok","expires_in":30}"#);
        });
        let credentials = ClientCredentials {
            token_url: server.url("/oauth/token"),
            client_id: "id".to_string(),
            client_secret: SecretString::from("secret".to_string()),
            scope: None,
        };
        HttpGenerationClient::new(server.url("/api/"), credentials, UpstreamTimeouts::default())
            .unwrap()
    }

    fn payload() -> SubmitPayload {
        let job = Job::draft(
            JobRequest {
                title: "Launch".to_string(),
                brief: "Coffee subscription".to_string(),
                avatars: vec![Avatar {
                    name: "Busy parent".to_string(),
                    researched: true,
                }],
                ..Default::default()
            },
            Utc::now(),
        );
        SubmitPayload::from(&job)
    }

    #[tokio::test]
    async fn test_submit_returns_external_id() {
        let server = MockServer::start();
        let client = client_for(&server);
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/jobs")
                .header("authorization", "Bearer tok");
            then.status(202)
                .header("content-type", "application/json")
                .body(r#"{"id":"ext-7"}"#);
        });

        let id = client.submit(&payload()).await.unwrap();
        assert_eq!(id, "ext-7");
        mock.assert();
    }

    #[tokio::test]
    async fn test_submit_non_2xx_is_rejected() {
        let server = MockServer::start();
        let client = client_for(&server);
        server.mock(|when, then| {
            when.method(POST).path("/api/jobs");
            then.status(422).body("brief too short");
        });

        let err = client.submit(&payload()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected { status: Some(422), .. }));
    }

    #[tokio::test]
    async fn test_poll_status_object_and_bare_string() {
        let server = MockServer::start();
        let client = client_for(&server);
        server.mock(|when, then| {
            when.method(GET).path("/api/jobs/a/status");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"status":"RUNNING"}"#);
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/jobs/b/status");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#""SUCCEEDED""#);
        });

        assert_eq!(client.poll_status("a").await.unwrap(), UpstreamStatus::Running);
        assert_eq!(client.poll_status("b").await.unwrap(), UpstreamStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_poll_status_server_error_is_unavailable() {
        let server = MockServer::start();
        let client = client_for(&server);
        server.mock(|when, then| {
            when.method(GET).path("/api/jobs/a/status");
            then.status(503).body("maintenance");
        });

        let err = client.poll_status("a").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_poll_status_connection_refused_is_unavailable() {
        let server = MockServer::start();
        let mut client = client_for(&server);
        client.base_url = "http://127.0.0.1:9".to_string();

        let err = client.poll_status("a").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_token_failure_surfaces_as_auth_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(500);
        });
        let credentials = ClientCredentials {
            token_url: server.url("/oauth/token"),
            client_id: "id".to_string(),
            client_secret: SecretString::from("secret".to_string()),
            scope: None,
        };
        let client =
            HttpGenerationClient::new(server.url("/api"), credentials, UpstreamTimeouts::default())
                .unwrap();

        let err = client.poll_status("a").await.unwrap_err();
        assert!(matches!(err, UpstreamError::AuthUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_result_verbatim_and_expired() {
        let server = MockServer::start();
        let client = client_for(&server);
        let raw = r#"{"swipe_results":[{"angle":"Fear","content":{"headline":"X"}}]}"#;
        server.mock(|when, then| {
            when.method(GET).path("/api/jobs/ok/result");
            then.status(200)
                .header("content-type", "application/json")
                .body(raw);
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/jobs/gone/result");
            then.status(410).body("expired");
        });

        assert_eq!(client.fetch_result("ok").await.unwrap(), raw);
        let err = client.fetch_result("gone").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected { status: Some(410), .. }));
    }
}
