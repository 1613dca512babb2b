//! Client for the credentials-and-session endpoints.
//!
//! These calls are unauthenticated and bypass the gateway: a refresh must
//! never itself be intercepted and refreshed.

use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::transport::{ApiRequest, ApiResponse, Transport};
use super::ApiError;
use crate::auth::validation::LoginType;
use crate::auth::{AuthError, TokenPair, TokenRefresher, ValidationErrors};

pub const LOGIN_PATH: &str = "/api/user-profiles/login/";
pub const REGISTER_PATH: &str = "/api/user-profiles/register/";
pub const REFRESH_PATH: &str = "/api/token/refresh/";
pub const ME_PATH: &str = "/api/user-profiles/me/";

/// What the user typed into the login form.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub identifier: String,
    pub password: String,
    pub remember_me: bool,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: password.into(),
            remember_me: false,
        }
    }

    pub fn remember_me(mut self, remember_me: bool) -> Self {
        self.remember_me = remember_me;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
    pub remember_me: bool,
    pub login_type: LoginType,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrationRequest {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub password: String,
    pub password_confirm: String,
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokensPayload {
    access: String,
    refresh: String,
}

#[derive(Debug, Deserialize)]
struct EnvelopePayload {
    message: Option<String>,
    tokens: Option<TokensPayload>,
}

#[derive(Debug, Deserialize)]
struct RefreshPayload {
    access: Option<String>,
}

/// Successful login/register response.
#[derive(Debug, Clone)]
pub struct AuthEnvelope {
    pub message: Option<String>,
    pub tokens: Option<TokenPair>,
    /// The full response body, for anything the UI wants beyond the tokens.
    pub data: serde_json::Value,
}

impl AuthEnvelope {
    fn parse(response: &ApiResponse) -> Result<Self, AuthError> {
        let data: serde_json::Value = serde_json::from_str(&response.body)
            .map_err(|e| AuthError::InvalidResponse(format!("Malformed JSON body: {}", e)))?;
        let payload: EnvelopePayload = serde_json::from_value(data.clone())
            .map_err(|e| AuthError::InvalidResponse(format!("Unexpected body: {}", e)))?;

        Ok(Self {
            message: payload.message,
            tokens: payload.tokens.map(|t| TokenPair::new(t.access, t.refresh)),
            data,
        })
    }
}

/// Clone is cheap; the transport is shared.
#[derive(Clone)]
pub struct SessionApi {
    transport: Arc<dyn Transport>,
}

impl SessionApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<ApiResponse, AuthError> {
        let request = ApiRequest::post(path, body);
        Ok(self.transport.send(&request, None).await?)
    }

    /// Map a non-2xx login/register response into a form-displayable error.
    fn rejection(response: &ApiResponse, fallback: &str) -> AuthError {
        if response.status >= 500 {
            return AuthError::Server {
                status: response.status,
                message: ApiError::truncate_body(&response.body),
            };
        }
        let body = serde_json::from_str(&response.body).unwrap_or(serde_json::Value::Null);
        AuthError::Validation(ValidationErrors::from_body(response.status, &body, fallback))
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<AuthEnvelope, AuthError> {
        let body = serde_json::to_value(request)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let response = self.post(LOGIN_PATH, body).await?;
        if !response.is_success() {
            debug!(status = response.status, "Login rejected");
            return Err(Self::rejection(&response, "Login failed"));
        }
        AuthEnvelope::parse(&response)
    }

    pub async fn register(&self, request: &RegistrationRequest) -> Result<AuthEnvelope, AuthError> {
        let body = serde_json::to_value(request)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let response = self.post(REGISTER_PATH, body).await?;
        if !response.is_success() {
            debug!(status = response.status, "Registration rejected");
            return Err(Self::rejection(&response, "Registration failed"));
        }
        AuthEnvelope::parse(&response)
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, AuthError> {
        let response = self
            .post(REFRESH_PATH, serde_json::json!({ "refresh": refresh_token }))
            .await?;

        if !response.is_success() {
            let detail = serde_json::from_str::<serde_json::Value>(&response.body)
                .ok()
                .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
                .unwrap_or_else(|| "Token refresh failed".to_string());
            return Err(AuthError::Server {
                status: response.status,
                message: detail,
            });
        }

        let payload: RefreshPayload = serde_json::from_str(&response.body)
            .map_err(|e| AuthError::InvalidResponse(format!("Malformed refresh body: {}", e)))?;
        payload.access.ok_or_else(|| {
            AuthError::InvalidResponse("Refresh response has no access token".to_string())
        })
    }
}

impl TokenRefresher for SessionApi {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<String, AuthError>> {
        self.refresh_access_token(refresh_token).boxed()
    }
}
