use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ClientCredentials, DebridApi};
use crate::auth::device_code::SLOW_DOWN_STEP;
use crate::auth::{AuthError, DeviceCodePoll, DeviceCodeSession, Token};
use crate::user::User;

pub const DEFAULT_OAUTH_BASE_URL: &str = "https://api.real-debrid.com/oauth/v2";
pub const DEFAULT_REST_BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";
/// Client id the service publishes for open-source applications.
pub const DEFAULT_CLIENT_ID: &str = "X245A4XAIBGVM";

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const REFRESH_GRANT_TYPE: &str = "refresh_token";

/// HTTP client for the debrid OAuth and REST endpoints.
///
/// # Example
/// ```no_run
/// use unchained::api::{ClientCredentials, DebridApi, HttpDebridApi};
///
/// # async fn example() -> Result<(), unchained::auth::AuthError> {
/// let api = HttpDebridApi::new(ClientCredentials::new("X245A4XAIBGVM"));
/// let session = api.request_device_code().await?;
/// println!("Visit {} and enter {}", session.verification_url, session.user_code);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpDebridApi {
    client: reqwest::Client,
    credentials: ClientCredentials,
    oauth_base_url: String,
    rest_base_url: String,
}

impl HttpDebridApi {
    pub fn new(credentials: ClientCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            oauth_base_url: DEFAULT_OAUTH_BASE_URL.to_string(),
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Replace the client with one that gives up after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, AuthError> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn with_oauth_base_url(mut self, url: impl Into<String>) -> Self {
        self.oauth_base_url = trim_base(url.into());
        self
    }

    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = trim_base(url.into());
        self
    }

    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    fn oauth_url(&self, path: &str) -> String {
        format!("{}/{path}", self.oauth_base_url)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/{path}", self.rest_base_url)
    }

    fn client_form<'a>(&'a self, extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut form = vec![("client_id", self.credentials.client_id.as_str())];
        if let Some(secret) = self.credentials.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        form.extend_from_slice(extra);
        form
    }
}

#[async_trait]
impl DebridApi for HttpDebridApi {
    async fn request_device_code(&self) -> Result<DeviceCodeSession, AuthError> {
        let resp = self
            .client
            .post(self.oauth_url("device/code"))
            .header("Accept", "application/json")
            .form(&self.client_form(&[]))
            .send()
            .await?;
        let (status, body) = read_body(resp).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let payload: DeviceCodeResponse = parse_json(&body)?;
        let mut session = DeviceCodeSession::new(
            payload.device_code,
            payload.user_code,
            payload.verification_url,
            payload.interval,
            payload.expires_in,
        )?;
        session.direct_verification_url = payload.direct_verification_url;
        tracing::debug!(
            interval_secs = session.interval_secs,
            expires_in_secs = session.expires_in_secs,
            "device code issued"
        );
        Ok(session)
    }

    async fn poll_device_code(
        &self,
        session: &DeviceCodeSession,
    ) -> Result<DeviceCodePoll, AuthError> {
        let resp = self
            .client
            .post(self.oauth_url("token"))
            .header("Accept", "application/json")
            .form(&self.client_form(&[
                ("device_code", session.device_code.as_str()),
                ("grant_type", DEVICE_GRANT_TYPE),
            ]))
            .send()
            .await?;
        let (status, body) = read_body(resp).await?;
        if body.trim().is_empty() {
            return Err(if status.is_success() {
                AuthError::EmptyBody
            } else {
                api_error(status, &body)
            });
        }
        let payload: TokenResponse = match parse_json(&body) {
            Ok(payload) => payload,
            Err(_) if !status.is_success() => return Err(api_error(status, &body)),
            Err(err) => return Err(err),
        };
        if let Some(access_token) = payload.access_token {
            let token = Token::open(access_token, payload.refresh_token, payload.expires_in)?;
            return Ok(DeviceCodePoll::Authorized { token });
        }
        match payload.error.as_deref() {
            Some("authorization_pending") => Ok(DeviceCodePoll::Pending),
            Some("slow_down") => Ok(DeviceCodePoll::SlowDown {
                interval_secs: session
                    .interval_secs
                    .saturating_add(SLOW_DOWN_STEP.as_secs()),
            }),
            Some("expired_token") => Ok(DeviceCodePoll::Expired),
            Some("access_denied") => Ok(DeviceCodePoll::AccessDenied),
            Some(other) => Err(AuthError::api(
                status.as_u16(),
                payload
                    .error_description
                    .unwrap_or_else(|| format!("device code error: {other}")),
            )),
            None if !status.is_success() => Err(api_error(status, &body)),
            None => Err(AuthError::ApiConversion(
                "token response missing token and error".to_string(),
            )),
        }
    }

    async fn refresh_token(&self, token: &Token) -> Result<Token, AuthError> {
        let refresh = match token.refresh_token.as_deref() {
            Some(refresh) if token.is_refreshable() => refresh,
            _ => return Err(AuthError::NotRefreshable),
        };
        let resp = self
            .client
            .post(self.oauth_url("token/refresh"))
            .header("Accept", "application/json")
            .form(&self.client_form(&[
                ("refresh_token", refresh),
                ("grant_type", REFRESH_GRANT_TYPE),
            ]))
            .send()
            .await?;
        let (status, body) = read_body(resp).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let payload: TokenResponse = parse_json(&body)?;
        let access_token = payload.access_token.ok_or_else(|| {
            AuthError::ApiConversion("refresh response missing access_token".to_string())
        })?;
        let refresh_token = payload
            .refresh_token
            .filter(|value| !value.is_empty())
            .or_else(|| token.refresh_token.clone());
        Token::open(access_token, refresh_token, payload.expires_in)
    }

    async fn fetch_user(&self, token: &Token) -> Result<User, AuthError> {
        let resp = self
            .client
            .get(self.rest_url("user"))
            .header("Accept", "application/json")
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        let (status, body) = read_body(resp).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        parse_json(&body)
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_url: String,
    #[serde(default)]
    direct_verification_url: Option<String>,
    interval: u64,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

async fn read_body(resp: reqwest::Response) -> Result<(StatusCode, String), AuthError> {
    let status = resp.status();
    let body = resp.text().await?;
    Ok((status, body))
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, AuthError> {
    if body.trim().is_empty() {
        return Err(AuthError::EmptyBody);
    }
    Ok(serde_json::from_str(body)?)
}

fn api_error(status: StatusCode, body: &str) -> AuthError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|err| err.error_description.or(err.error))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                trimmed.to_string()
            }
        });
    AuthError::api(status.as_u16(), message)
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_prefers_error_description() {
        let err = api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"bad_request","error_description":"Unknown client"}"#,
        );
        assert_eq!(err, AuthError::api(400, "Unknown client"));
    }

    #[test]
    fn api_error_falls_back_to_reason_phrase() {
        let err = api_error(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(err, AuthError::api(503, "Service Unavailable"));
    }

    #[test]
    fn parse_json_reports_empty_bodies() {
        let result: Result<User, _> = parse_json("  ");
        assert_eq!(result.unwrap_err(), AuthError::EmptyBody);
    }

    #[test]
    fn base_urls_lose_trailing_slash() {
        let api = HttpDebridApi::new(ClientCredentials::new("client"))
            .with_oauth_base_url("http://localhost:8080/oauth/v2/");
        assert_eq!(api.oauth_url("token"), "http://localhost:8080/oauth/v2/token");
    }

    #[test]
    fn client_form_includes_secret_when_present() {
        let api = HttpDebridApi::new(ClientCredentials::new("client").with_secret("secret"));
        let form = api.client_form(&[("grant_type", REFRESH_GRANT_TYPE)]);
        assert_eq!(
            form,
            vec![
                ("client_id", "client"),
                ("client_secret", "secret"),
                ("grant_type", REFRESH_GRANT_TYPE),
            ]
        );
    }
}
