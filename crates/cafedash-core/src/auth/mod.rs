//! Authentication module for managing the access/refresh token lifecycle.
//!
//! This module provides:
//! - `claims`: Unverified decoding of bearer token payloads
//! - `TokenStore`: Durable token persistence (file, keychain, memory)
//! - `TokenLifecycleManager`: Expiry checks and single-flight refresh
//! - `SessionPolicyHooks`: Notifications when a session ends involuntarily
//! - `BackgroundRefresh`: Optional refresh ahead of expiry
//!
//! Access tokens are treated as expired 60 seconds before their `exp` claim.

pub mod claims;
pub mod error;
pub mod hooks;
pub mod keychain;
pub mod manager;
pub mod refresher;
pub mod store;
pub mod validation;

pub use claims::{DecodeError, DecodedClaims};
pub use error::{AuthError, ValidationErrors};
pub use hooks::{ExpiryReason, SessionExpiredEvent, SessionPolicyHooks, SubscriptionId};
pub use keychain::KeyringTokenStore;
pub use manager::{AuthState, AuthStatus, LifecycleSettings, TokenLifecycleManager, TokenRefresher};
pub use refresher::BackgroundRefresh;
pub use store::{FileTokenStore, MemoryTokenStore, StoreError, StoredTokens, TokenPair, TokenStore};
pub use validation::LoginType;
