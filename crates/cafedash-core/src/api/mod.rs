//! REST API client module for the cafe admin backend.
//!
//! This module provides the `RequestGateway` for authenticated requests,
//! the `SessionApi` for login, registration and token refresh, and the
//! `Transport` seam both of them send through.
//!
//! The API uses JWT bearer token authentication; tokens come from the
//! `/api/user-profiles/login/` endpoint and are renewed through
//! `/api/token/refresh/`.

pub mod error;
pub mod gateway;
pub mod session;
pub mod transport;

pub use error::{ApiError, TransportError};
pub use gateway::RequestGateway;
pub use session::{AuthEnvelope, Credentials, RegistrationRequest, SessionApi};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
