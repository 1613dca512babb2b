//! Authenticated request pipeline.
//!
//! Every request gets a bearer token from the lifecycle manager. A 401 is
//! answered with one refresh (shared with every other request failing at
//! the same time) and one retry; a second 401 is final.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::transport::{ApiRequest, ApiResponse, Transport};
use super::ApiError;
use crate::auth::TokenLifecycleManager;

/// Retry bookkeeping carried next to the caller's request, which is never
/// modified.
struct Attempt<'a> {
    request: &'a ApiRequest,
    retried: bool,
}

/// Clone is cheap; clones share the transport and the lifecycle manager.
#[derive(Clone)]
pub struct RequestGateway {
    transport: Arc<dyn Transport>,
    manager: TokenLifecycleManager,
}

impl RequestGateway {
    pub fn new(transport: Arc<dyn Transport>, manager: TokenLifecycleManager) -> Self {
        Self { transport, manager }
    }

    /// Send a request with a valid bearer token.
    ///
    /// Non-401 responses are returned untouched, whatever their status.
    /// Fails with `SessionExpired` when no token can be produced and with
    /// `Unauthorized` when the retried request is rejected again.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut attempt = Attempt {
            request,
            retried: false,
        };
        let mut token = self.manager.get_valid_access_token().await?;

        loop {
            let response = self
                .transport
                .send(attempt.request, Some(token.as_str()))
                .await?;

            if !response.is_unauthorized() {
                return Ok(response);
            }

            if attempt.retried {
                warn!(
                    method = %attempt.request.method,
                    path = %attempt.request.path,
                    "Request rejected again after token refresh"
                );
                return Err(ApiError::Unauthorized);
            }

            debug!(path = %attempt.request.path, "Got 401, refreshing token and retrying");
            attempt.retried = true;
            token = self.manager.refresh_after_rejection(&token).await?;
        }
    }

    /// Send and decode a 2xx JSON body; other statuses become [`ApiError`]s.
    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        self.send(request).await?.error_for_status()?.json()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(&ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        self.send_json(&ApiRequest::post(path, body)).await
    }

    pub fn manager(&self) -> &TokenLifecycleManager {
        &self.manager
    }
}
