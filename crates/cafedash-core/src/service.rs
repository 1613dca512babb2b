//! The authentication surface exposed to the UI layer.
//!
//! `AuthService` wires the session API, the lifecycle manager and the
//! request gateway together over one transport and one token store.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::Duration;
use serde::Serialize;
use tracing::info;

use crate::api::session::{LoginRequest, ME_PATH};
use crate::api::{
    ApiError, Credentials, RegistrationRequest, ReqwestTransport, RequestGateway, SessionApi,
    Transport,
};
use crate::auth::refresher::DEFAULT_REFRESH_LEAD_SECS;
use crate::auth::validation::{determine_login_type, validate_login, validate_registration};
use crate::auth::{
    AuthError, AuthState, BackgroundRefresh, DecodedClaims, LifecycleSettings, LoginType,
    SessionExpiredEvent, SessionPolicyHooks, StoreError, SubscriptionId, TokenLifecycleManager,
    TokenStore,
};
use crate::config::Config;

/// Result of a successful login or registration.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub message: String,
    /// Whether a session was established (registration may not return tokens).
    pub authenticated: bool,
    pub user: Option<DecodedClaims>,
    pub login_type: Option<LoginType>,
    /// The full response body.
    pub data: serde_json::Value,
}

/// Clone is cheap; clones share one session.
#[derive(Clone)]
pub struct AuthService {
    api: SessionApi,
    manager: TokenLifecycleManager,
    gateway: RequestGateway,
}

impl AuthService {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        settings: LifecycleSettings,
    ) -> Self {
        let api = SessionApi::new(Arc::clone(&transport));
        let manager = TokenLifecycleManager::new(
            store,
            Arc::new(api.clone()),
            SessionPolicyHooks::new(),
            settings,
        );
        let gateway = RequestGateway::new(transport, manager.clone());
        Self {
            api,
            manager,
            gateway,
        }
    }

    /// Build the service from configuration, using the real HTTP transport.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.base_url(), config.request_timeout())?;
        Ok(Self::new(
            Arc::new(transport),
            config.token_store()?,
            config.lifecycle_settings(),
        ))
    }

    /// Restore any stored session. Call once at startup.
    pub fn initialize(&self) -> Result<AuthState, StoreError> {
        self.manager.initialize()
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome, AuthError> {
        validate_login(credentials)?;
        let identifier = credentials.identifier.trim();
        let login_type = determine_login_type(identifier)?;

        let request = LoginRequest {
            identifier: identifier.to_string(),
            password: credentials.password.clone(),
            remember_me: credentials.remember_me,
            login_type,
        };
        let envelope = self.api.login(&request).await?;
        let tokens = envelope.tokens.ok_or_else(|| {
            AuthError::InvalidResponse("Login response has no tokens".to_string())
        })?;

        let user = self.manager.establish_session(&tokens, credentials.remember_me)?;
        info!(login_type = ?login_type, "Login successful");

        Ok(LoginOutcome {
            message: envelope.message.unwrap_or_else(|| "Login successful".to_string()),
            authenticated: true,
            user,
            login_type: Some(login_type),
            data: envelope.data,
        })
    }

    pub async fn register(&self, request: &RegistrationRequest) -> Result<LoginOutcome, AuthError> {
        validate_registration(request)?;
        let envelope = self.api.register(request).await?;

        let user = match envelope.tokens {
            Some(ref tokens) => Some(self.manager.establish_session(tokens, false)?),
            None => None,
        };
        info!(session = user.is_some(), "Registration successful");

        Ok(LoginOutcome {
            message: envelope
                .message
                .unwrap_or_else(|| "Registration successful".to_string()),
            authenticated: user.is_some(),
            user: user.flatten(),
            login_type: None,
            data: envelope.data,
        })
    }

    /// Clear the session. Does not fire session-expired hooks.
    pub fn logout(&self) -> Result<(), StoreError> {
        self.manager.logout()
    }

    pub async fn get_valid_access_token(&self) -> Result<String, AuthError> {
        self.manager.get_valid_access_token().await
    }

    pub fn on_session_expired<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionExpiredEvent) + Send + Sync + 'static,
    {
        self.manager.hooks().on_session_expired(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.manager.hooks().unsubscribe(id)
    }

    /// Fetch the current profile; validates the session server-side.
    pub async fn me(&self) -> Result<serde_json::Value, ApiError> {
        self.gateway.get(ME_PATH).await
    }

    pub fn state(&self) -> AuthState {
        self.manager.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.manager.is_authenticated()
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn manager(&self) -> &TokenLifecycleManager {
        &self.manager
    }

    /// Refresh ahead of expiry on a timer. Stops when the handle is dropped.
    pub fn start_background_refresh(&self, interval: StdDuration) -> BackgroundRefresh {
        BackgroundRefresh::spawn(
            self.manager.clone(),
            interval,
            Duration::seconds(DEFAULT_REFRESH_LEAD_SECS),
        )
    }
}
