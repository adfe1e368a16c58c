//! OAuth2 client-credentials exchange for the generation API.
//!
//! Tokens are short-lived and deliberately never cached: every upstream call
//! performs its own exchange.

use log::debug;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::{Result, UpstreamError};

/// Maximum length for sanitized error bodies to prevent log flooding.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Truncates an error response body so token material never reaches logs
/// in full.
pub(crate) fn sanitize_error_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

/// Credentials for the token endpoint.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchanges the client credentials for a bearer token.
///
/// Any failure, including a non-2xx answer from the token endpoint, is
/// reported as `AuthUnavailable` so callers retry on the next attempt.
pub(crate) async fn fetch_token(
    client: &Client,
    credentials: &ClientCredentials,
) -> Result<SecretString> {
    let mut params = vec![
        ("grant_type", "client_credentials"),
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.expose_secret()),
    ];
    if let Some(scope) = credentials.scope.as_deref() {
        params.push(("scope", scope));
    }

    let response = client
        .post(&credentials.token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| UpstreamError::AuthUnavailable(format!("Token request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::AuthUnavailable(format!(
            "Token endpoint returned {}: {}",
            status,
            sanitize_error_body(&body)
        )));
    }

    let token: TokenResponse = response.json().await.map_err(|e| {
        UpstreamError::AuthUnavailable(format!("Failed to parse token response: {}", e))
    })?;

    if token.access_token.is_empty() {
        return Err(UpstreamError::AuthUnavailable(
            "Token endpoint returned an empty access token".to_string(),
        ));
    }

    debug!("Obtained upstream access token (expires_in={:?})", token.expires_in);
    Ok(SecretString::from(token.access_token))
}
