//! cafedash-core - token lifecycle and authenticated API access for the
//! cafe admin dashboard.
//!
//! The UI layer asks [`AuthService`] for a valid bearer token (or sends
//! requests through its [`RequestGateway`]) and subscribes to
//! session-expired notifications. Everything about when and how tokens are
//! refreshed stays in here.

pub mod api;
pub mod auth;
pub mod config;
pub mod service;

pub use api::{ApiError, ApiRequest, ApiResponse, Credentials, RegistrationRequest, RequestGateway};
pub use auth::{AuthError, AuthState, AuthStatus, DecodedClaims, TokenLifecycleManager};
pub use config::Config;
pub use service::{AuthService, LoginOutcome};
