use serde::Deserialize;
use std::fmt;

use crate::config::{Credentials, UploaderConfig};
use crate::errors::{AppError, AppResult};

use super::graph_client::GraphClient;
use super::retry::send_with_retry;

/// Bearer token for Graph. Valid for one run; never cached or refreshed.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_in: Option<u64>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_in: Option<u64>) -> Self {
        Self {
            secret: secret.into(),
            expires_in,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    // Entra returns a number; some proxies send it as a string
    expires_in: Option<serde_json::Value>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn expires_in_secs(&self) -> Option<u64> {
        match self.expires_in.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn failure_reason(&self) -> Option<String> {
        match (&self.error, &self.error_description) {
            (_, Some(description)) => Some(description.clone()),
            (Some(error), None) => Some(error.clone()),
            (None, None) => None,
        }
    }
}

/// Client-credentials grant against the Entra ID v2.0 token endpoint.
///
/// Transport failures stay `AppError::Network`; `Authentication` means the
/// endpoint answered with a rejection or an unusable body.
pub async fn acquire_token(
    client: &GraphClient,
    config: &UploaderConfig,
    credentials: &Credentials,
) -> AppResult<AccessToken> {
    let token_url = config.token_url(&credentials.tenant_id);
    log::debug!("Requesting token from {}", token_url);

    let params = [
        ("grant_type", "client_credentials"),
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
        ("scope", config.scope.as_str()),
    ];

    let response = send_with_retry(client.retry_policy(), "token request", || {
        client.http().post(&token_url).form(&params).send()
    })
    .await?;

    let status = response.status();
    let body = response.text().await?;

    let parsed: Option<TokenResponse> = serde_json::from_str(&body).ok();

    if !status.is_success() {
        let reason = parsed
            .as_ref()
            .and_then(TokenResponse::failure_reason)
            .unwrap_or(body);
        return Err(AppError::authentication(format!(
            "HTTP {}: {}",
            status.as_u16(),
            reason
        )));
    }

    let parsed = parsed.ok_or_else(|| {
        AppError::authentication("Token endpoint returned a response that is not JSON")
    })?;

    let token = match parsed.access_token.as_deref() {
        Some(token) if !token.trim().is_empty() => token.to_string(),
        _ => {
            let reason = parsed
                .failure_reason()
                .unwrap_or_else(|| "No access_token in token response".to_string());
            return Err(AppError::authentication(reason));
        }
    };

    if let Some(token_type) = parsed.token_type.as_deref() {
        if !token_type.eq_ignore_ascii_case("bearer") {
            log::warn!("Unexpected token type '{}', using it as a bearer token", token_type);
        }
    }

    let expires_in = parsed.expires_in_secs();
    log::info!(
        "Acquired access token for tenant {} (expires in {}s)",
        credentials.tenant_id,
        expires_in.map_or_else(|| "?".to_string(), |s| s.to_string())
    );

    Ok(AccessToken::new(token, expires_in))
}
