//! Access/refresh token lifecycle.
//!
//! [`TokenLifecycleManager`] owns the authentication state machine:
//!
//! ```text
//! Unauthenticated --login/startup--> Authenticated
//! Authenticated --access expired--> RefreshInProgress
//! RefreshInProgress --refresh ok--> Authenticated
//! RefreshInProgress --refresh failed--> Unauthenticated (store cleared, hooks fired)
//! Authenticated --logout / all tokens expired--> Unauthenticated
//! ```
//!
//! At most one refresh call is outstanding. It runs on its own task so a
//! caller going away cannot strand the others; every caller that needs a
//! fresh token while it runs is queued and gets the single outcome in
//! arrival order.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::claims::{self, DecodedClaims, DEFAULT_SKEW_SECS};
use super::error::AuthError;
use super::hooks::{ExpiryReason, SessionExpiredEvent, SessionPolicyHooks};
use super::store::{StoreError, TokenPair, TokenStore};
use crate::api::transport::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::api::TransportError;

/// Exchanges a refresh token for a new access token.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<String, AuthError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum AuthStatus {
    Unauthenticated,
    Authenticated,
    RefreshInProgress,
}

/// Snapshot of the authentication state for the UI layer.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AuthState {
    pub status: AuthStatus,
    pub is_authenticated: bool,
    pub current_user: Option<DecodedClaims>,
    pub is_initializing: bool,
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Tokens expiring within this many seconds count as expired.
    pub skew_secs: i64,
    /// Upper bound on one refresh attempt.
    pub refresh_timeout: StdDuration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            skew_secs: DEFAULT_SKEW_SECS,
            refresh_timeout: StdDuration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// `None` means the refresh failed; waiters see `SessionExpired`.
type RefreshOutcome = Option<String>;

struct RefreshCoordination {
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

impl RefreshCoordination {
    fn join(&mut self) -> oneshot::Receiver<RefreshOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    fn release(self, outcome: RefreshOutcome) {
        for waiter in self.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

struct Lifecycle {
    status: AuthStatus,
    current_user: Option<DecodedClaims>,
    is_initializing: bool,
    /// Bumped on login and logout so a refresh started for an earlier
    /// session cannot write into a later one.
    generation: u64,
    refresh: Option<RefreshCoordination>,
}

enum Trigger<'a> {
    /// A caller needs a token to send a request.
    Demand,
    /// The server answered 401 to a request sent with this token.
    Rejected(&'a str),
    /// Refresh ahead of time when the access token expires within the window.
    Lead(Duration),
}

enum Plan {
    Ready(String),
    Wait(oneshot::Receiver<RefreshOutcome>),
    Expired(Option<SessionExpiredEvent>),
}

struct Inner {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    hooks: SessionPolicyHooks,
    settings: LifecycleSettings,
    lifecycle: Mutex<Lifecycle>,
}

/// Clone is cheap; clones share one state machine.
#[derive(Clone)]
pub struct TokenLifecycleManager {
    inner: Arc<Inner>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        hooks: SessionPolicyHooks,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                refresher,
                hooks,
                settings,
                lifecycle: Mutex::new(Lifecycle {
                    status: AuthStatus::Unauthenticated,
                    current_user: None,
                    is_initializing: true,
                    generation: 0,
                    refresh: None,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, token: &str) -> bool {
        claims::is_expired(token, self.inner.settings.skew_secs)
    }

    pub fn hooks(&self) -> &SessionPolicyHooks {
        &self.inner.hooks
    }

    /// Read the store at application start. A stored session counts as
    /// authenticated while its refresh token is still usable; a fully
    /// expired one is cleared.
    pub fn initialize(&self) -> Result<AuthState, StoreError> {
        {
            let mut lc = self.lock();
            let loaded = self.inner.store.get();
            lc.is_initializing = false;

            match loaded? {
                Some(pair)
                    if !self.is_expired(&pair.access_token)
                        || !self.is_expired(&pair.refresh_token) =>
                {
                    lc.status = AuthStatus::Authenticated;
                    lc.current_user = claims::decode(&pair.access_token).ok();
                    debug!("Restored stored session");
                }
                Some(_) => {
                    debug!("Stored tokens expired, clearing");
                    lc.status = AuthStatus::Unauthenticated;
                    lc.current_user = None;
                    self.inner.store.clear()?;
                }
                None => {
                    lc.status = AuthStatus::Unauthenticated;
                    lc.current_user = None;
                }
            }
        }
        Ok(self.state())
    }

    /// Install a freshly issued token pair after login or registration.
    pub fn establish_session(
        &self,
        pair: &TokenPair,
        remember_me: bool,
    ) -> Result<Option<DecodedClaims>, StoreError> {
        let (stale, result) = {
            let mut lc = self.lock();
            lc.generation += 1;
            let stale = lc.refresh.take();
            let result = self.inner.store.set(pair, remember_me);
            match result {
                Ok(()) => {
                    lc.status = AuthStatus::Authenticated;
                    lc.current_user = claims::decode(&pair.access_token).ok();
                }
                Err(_) => {
                    lc.status = AuthStatus::Unauthenticated;
                    lc.current_user = None;
                }
            }
            (stale, result.map(|()| lc.current_user.clone()))
        };

        if let Some(stale) = stale {
            debug!("Releasing callers waiting on a refresh for the previous session");
            stale.release(None);
        }
        if result.is_ok() {
            info!("Session established");
        }
        result
    }

    /// Explicit logout: clears the store and state. Never notifies hooks.
    pub fn logout(&self) -> Result<(), StoreError> {
        let (pending, result) = {
            let mut lc = self.lock();
            lc.generation += 1;
            lc.status = AuthStatus::Unauthenticated;
            lc.current_user = None;
            (lc.refresh.take(), self.inner.store.clear())
        };

        if let Some(pending) = pending {
            pending.release(None);
        }
        info!("Logged out");
        result
    }

    /// The single entry point for a usable access token. Never returns a
    /// token that is expired or within the skew window; refreshes first
    /// when needed.
    pub async fn get_valid_access_token(&self) -> Result<String, AuthError> {
        let plan = self.plan(Trigger::Demand)?;
        self.resolve(plan).await
    }

    /// Called after the server rejected `rejected` with 401. Joins or
    /// starts a refresh unless another caller already replaced the token.
    pub async fn refresh_after_rejection(&self, rejected: &str) -> Result<String, AuthError> {
        let plan = self.plan(Trigger::Rejected(rejected))?;
        self.resolve(plan).await
    }

    /// Refresh ahead of time if the access token expires within `lead`.
    /// Returns whether a refresh was started or joined.
    pub async fn refresh_if_expiring(&self, lead: Duration) -> Result<bool, AuthError> {
        match self.plan(Trigger::Lead(lead))? {
            Plan::Ready(_) => Ok(false),
            plan => self.resolve(plan).await.map(|_| true),
        }
    }

    async fn resolve(&self, plan: Plan) -> Result<String, AuthError> {
        match plan {
            Plan::Ready(token) => Ok(token),
            Plan::Wait(receiver) => match receiver.await {
                Ok(Some(token)) => Ok(token),
                _ => Err(AuthError::SessionExpired),
            },
            Plan::Expired(event) => {
                if let Some(event) = event {
                    self.inner.hooks.notify_session_expired(&event);
                }
                Err(AuthError::SessionExpired)
            }
        }
    }

    /// Decides under the lifecycle lock, store read included, so a refresh
    /// cannot complete between reading the tokens and choosing to start one.
    /// [`TokenStore`] documents the resulting constraint on backends.
    fn plan(&self, trigger: Trigger<'_>) -> Result<Plan, AuthError> {
        let mut lc = self.lock();

        if let Some(coordination) = lc.refresh.as_mut() {
            debug!("Refresh already in flight, queueing");
            return Ok(Plan::Wait(coordination.join()));
        }

        let Some(pair) = self.inner.store.get()? else {
            lc.status = AuthStatus::Unauthenticated;
            lc.current_user = None;
            return Ok(Plan::Expired(None));
        };

        let access_usable = !self.is_expired(&pair.access_token);
        let needs_refresh = match trigger {
            Trigger::Demand => !access_usable,
            Trigger::Rejected(rejected) => !access_usable || pair.access_token == rejected,
            Trigger::Lead(window) => {
                !access_usable || claims::expires_within(&pair.access_token, window)
            }
        };
        if !needs_refresh {
            return Ok(Plan::Ready(pair.access_token));
        }

        if self.is_expired(&pair.refresh_token) {
            return Ok(Plan::Expired(self.expire_locked(&mut lc)));
        }

        Ok(Plan::Wait(self.start_refresh(&mut lc, pair.refresh_token)))
    }

    fn expire_locked(&self, lc: &mut Lifecycle) -> Option<SessionExpiredEvent> {
        let was_authenticated = lc.status != AuthStatus::Unauthenticated;
        if let Err(e) = self.inner.store.clear() {
            error!(error = %e, "Failed to clear expired tokens");
        }
        lc.status = AuthStatus::Unauthenticated;
        lc.current_user = None;

        was_authenticated.then(|| {
            info!("Access and refresh tokens both expired");
            SessionExpiredEvent::new(ExpiryReason::TokensExpired)
        })
    }

    fn start_refresh(
        &self,
        lc: &mut Lifecycle,
        refresh_token: String,
    ) -> oneshot::Receiver<RefreshOutcome> {
        let mut coordination = RefreshCoordination {
            waiters: Vec::new(),
        };
        let receiver = coordination.join();
        lc.refresh = Some(coordination);
        lc.status = AuthStatus::RefreshInProgress;

        let generation = lc.generation;
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_refresh(refresh_token, generation).await;
        });
        receiver
    }

    async fn run_refresh(self, refresh_token: String, generation: u64) {
        debug!("Refreshing access token");
        let timeout = self.inner.settings.refresh_timeout;
        let attempt = AssertUnwindSafe(async {
            self.inner.refresher.refresh(&refresh_token).await
        })
        .catch_unwind();
        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                error!("Token refresher panicked");
                Err(AuthError::Network(TransportError::Other(
                    "token refresh panicked".to_string(),
                )))
            }
            Err(_) => Err(AuthError::Network(TransportError::Timeout)),
        };

        let (coordination, outcome, event) = {
            let mut lc = self.lock();
            if lc.generation != generation {
                // Login or logout already released this refresh's waiters.
                debug!("Session changed during refresh, discarding result");
                return;
            }
            let coordination = lc.refresh.take();

            let persisted = result.and_then(|access| {
                self.inner.store.set_access_only(&access)?;
                Ok(access)
            });
            match persisted {
                Ok(access) => {
                    lc.status = AuthStatus::Authenticated;
                    lc.current_user = claims::decode(&access).ok();
                    info!("Access token refreshed");
                    (coordination, Some(access), None)
                }
                Err(e) => {
                    warn!(error = %e, "Token refresh failed, clearing session");
                    let reason = match e {
                        AuthError::Network(_) => ExpiryReason::RefreshFailed,
                        _ => ExpiryReason::RefreshRejected,
                    };
                    if let Err(e) = self.inner.store.clear() {
                        error!(error = %e, "Failed to clear tokens after refresh failure");
                    }
                    lc.status = AuthStatus::Unauthenticated;
                    lc.current_user = None;
                    (coordination, None, Some(SessionExpiredEvent::new(reason)))
                }
            }
        };

        if let Some(event) = event {
            self.inner.hooks.notify_session_expired(&event);
        }
        if let Some(coordination) = coordination {
            coordination.release(outcome);
        }
    }

    /// True iff a usable access token or a usable refresh token is stored.
    pub fn is_authenticated(&self) -> bool {
        match self.inner.store.get() {
            Ok(Some(pair)) => {
                !self.is_expired(&pair.access_token) || !self.is_expired(&pair.refresh_token)
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Failed to read token store");
                false
            }
        }
    }

    pub fn status(&self) -> AuthStatus {
        self.lock().status
    }

    pub fn state(&self) -> AuthState {
        let is_authenticated = self.is_authenticated();
        let lc = self.lock();
        AuthState {
            status: lc.status,
            is_authenticated,
            current_user: lc.current_user.clone(),
            is_initializing: lc.is_initializing,
        }
    }

    pub fn current_user(&self) -> Option<DecodedClaims> {
        self.lock().current_user.clone()
    }

    fn access_claims(&self) -> Option<DecodedClaims> {
        let pair = self.inner.store.get().ok().flatten()?;
        claims::decode(&pair.access_token).ok()
    }

    /// When the stored access token expires.
    pub fn token_expiration(&self) -> Option<DateTime<Utc>> {
        self.access_claims().map(|c| c.expires_at)
    }

    /// Time until the stored access token expires, zero once it has.
    pub fn time_until_expiry(&self) -> Duration {
        self.access_claims()
            .map(|c| c.time_until_expiry().max(Duration::zero()))
            .unwrap_or_else(Duration::zero)
    }

    /// The stored remember-me flag. A UI hint only; lifecycle behaviour
    /// does not depend on it.
    pub fn remember_me(&self) -> bool {
        self.inner.store.remember_me().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::testing::token_expiring_in;
    use crate::auth::store::MemoryTokenStore;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Script {
        Issue(String),
        Reject,
        NetworkDown,
        Hang,
        Panic,
    }

    struct ScriptedRefresher {
        script: Script,
        calls: AtomicUsize,
    }

    impl ScriptedRefresher {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenRefresher for ScriptedRefresher {
        fn refresh<'a>(
            &'a self,
            _refresh_token: &'a str,
        ) -> BoxFuture<'a, Result<String, AuthError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::task::yield_now().await;
                match &self.script {
                    Script::Issue(token) => Ok(token.clone()),
                    Script::Reject => Err(AuthError::Server {
                        status: 401,
                        message: "Token is invalid or expired".into(),
                    }),
                    Script::NetworkDown => {
                        Err(AuthError::Network(TransportError::Connect("refused".into())))
                    }
                    Script::Hang => futures::future::pending().await,
                    Script::Panic => panic!("refresher bug"),
                }
            }
            .boxed()
        }
    }

    struct Harness {
        manager: TokenLifecycleManager,
        store: Arc<MemoryTokenStore>,
        refresher: Arc<ScriptedRefresher>,
        notified: Arc<Mutex<Vec<ExpiryReason>>>,
    }

    fn harness(pair: Option<TokenPair>, script: Script) -> Harness {
        let store = Arc::new(match pair {
            Some(ref pair) => MemoryTokenStore::with_pair(pair),
            None => MemoryTokenStore::new(),
        });
        let refresher = ScriptedRefresher::new(script);
        let hooks = SessionPolicyHooks::new();
        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notified);
        hooks.on_session_expired(move |event| sink.lock().unwrap().push(event.reason));

        let manager = TokenLifecycleManager::new(
            store.clone(),
            refresher.clone(),
            hooks,
            LifecycleSettings::default(),
        );
        manager.initialize().unwrap();
        Harness {
            manager,
            store,
            refresher,
            notified,
        }
    }

    fn notifications(h: &Harness) -> Vec<ExpiryReason> {
        h.notified.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_empty_store_is_session_expired_without_network() {
        let h = harness(None, Script::Issue(token_expiring_in(3600)));
        assert_eq!(h.manager.status(), AuthStatus::Unauthenticated);

        let result = h.manager.get_valid_access_token().await;
        assert!(matches!(result, Err(AuthError::SessionExpired)));
        assert_eq!(h.refresher.calls(), 0);
        assert!(notifications(&h).is_empty());
    }

    #[tokio::test]
    async fn test_valid_access_token_is_returned_as_is() {
        let access = token_expiring_in(600);
        let h = harness(
            Some(TokenPair::new(access.clone(), token_expiring_in(86_400))),
            Script::Reject,
        );

        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), access);
        assert_eq!(h.refresher.calls(), 0);
        assert_eq!(h.manager.status(), AuthStatus::Authenticated);
        assert_eq!(
            h.manager.current_user().and_then(|u| u.username),
            Some("frontdesk".to_string())
        );
    }

    #[tokio::test]
    async fn test_near_expiry_access_token_is_refreshed_first() {
        let refreshed = token_expiring_in(3600);
        let h = harness(
            Some(TokenPair::new(token_expiring_in(10), token_expiring_in(86_400))),
            Script::Issue(refreshed.clone()),
        );

        let token = h.manager.get_valid_access_token().await.unwrap();
        assert_eq!(token, refreshed);
        assert_eq!(h.refresher.calls(), 1);
        assert_eq!(h.store.get().unwrap().unwrap().access_token, refreshed);
        assert_eq!(h.manager.status(), AuthStatus::Authenticated);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let refreshed = token_expiring_in(3600);
        let h = harness(
            Some(TokenPair::new(token_expiring_in(-30), token_expiring_in(86_400))),
            Script::Issue(refreshed.clone()),
        );

        let results =
            futures::future::join_all((0..5).map(|_| h.manager.get_valid_access_token())).await;

        assert_eq!(h.refresher.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap(), refreshed);
        }
    }

    #[tokio::test]
    async fn test_rejected_refresh_clears_store_and_notifies_once() {
        let h = harness(
            Some(TokenPair::new(token_expiring_in(-30), token_expiring_in(86_400))),
            Script::Reject,
        );

        let results =
            futures::future::join_all((0..3).map(|_| h.manager.get_valid_access_token())).await;

        assert!(results
            .iter()
            .all(|r| matches!(r, Err(AuthError::SessionExpired))));
        assert_eq!(h.refresher.calls(), 1);
        assert!(h.store.get().unwrap().is_none());
        assert!(!h.manager.is_authenticated());
        assert_eq!(h.manager.status(), AuthStatus::Unauthenticated);
        assert_eq!(notifications(&h), vec![ExpiryReason::RefreshRejected]);
    }

    #[tokio::test]
    async fn test_network_failure_during_refresh_is_terminal() {
        let h = harness(
            Some(TokenPair::new(token_expiring_in(-30), token_expiring_in(86_400))),
            Script::NetworkDown,
        );

        assert!(matches!(
            h.manager.get_valid_access_token().await,
            Err(AuthError::SessionExpired)
        ));
        assert!(h.store.get().unwrap().is_none());
        assert_eq!(notifications(&h), vec![ExpiryReason::RefreshFailed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timeout_is_a_failure() {
        let h = harness(
            Some(TokenPair::new(token_expiring_in(-30), token_expiring_in(86_400))),
            Script::Hang,
        );

        assert!(matches!(
            h.manager.get_valid_access_token().await,
            Err(AuthError::SessionExpired)
        ));
        assert!(h.store.get().unwrap().is_none());
        assert_eq!(notifications(&h), vec![ExpiryReason::RefreshFailed]);
    }

    #[tokio::test]
    async fn test_both_tokens_expired_logs_out_and_notifies() {
        let h = harness(None, Script::Issue(token_expiring_in(3600)));
        h.manager
            .establish_session(
                &TokenPair::new(token_expiring_in(600), token_expiring_in(900)),
                false,
            )
            .unwrap();
        // Both tokens age out while the session is live
        h.store
            .set(&TokenPair::new(token_expiring_in(-60), token_expiring_in(-10)), false)
            .unwrap();

        assert!(matches!(
            h.manager.get_valid_access_token().await,
            Err(AuthError::SessionExpired)
        ));
        assert_eq!(h.refresher.calls(), 0);
        assert!(h.store.get().unwrap().is_none());
        assert_eq!(notifications(&h), vec![ExpiryReason::TokensExpired]);

        // Already unauthenticated: no second notification
        let _ = h.manager.get_valid_access_token().await;
        assert_eq!(notifications(&h).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_refresh_releases_waiters_without_notifying() {
        let h = harness(
            Some(TokenPair::new(token_expiring_in(-30), token_expiring_in(86_400))),
            Script::Hang,
        );

        let manager = h.manager.clone();
        let waiter = tokio::spawn(async move { manager.get_valid_access_token().await });
        tokio::task::yield_now().await;
        assert_eq!(h.manager.status(), AuthStatus::RefreshInProgress);

        h.manager.logout().unwrap();
        assert!(matches!(waiter.await.unwrap(), Err(AuthError::SessionExpired)));

        // Let the hung refresh time out; its result must be discarded
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        assert!(notifications(&h).is_empty());
        assert!(h.store.get().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_during_refresh_discards_stale_result() {
        let h = harness(
            Some(TokenPair::new(token_expiring_in(-30), token_expiring_in(86_400))),
            Script::Hang,
        );

        let manager = h.manager.clone();
        let waiter = tokio::spawn(async move { manager.get_valid_access_token().await });
        tokio::task::yield_now().await;
        assert_eq!(h.manager.status(), AuthStatus::RefreshInProgress);

        let fresh = TokenPair::new(token_expiring_in(900), token_expiring_in(86_400));
        h.manager.establish_session(&fresh, true).unwrap();
        assert!(matches!(waiter.await.unwrap(), Err(AuthError::SessionExpired)));

        // The old refresh times out against a session that no longer exists
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        assert_eq!(h.store.get().unwrap(), Some(fresh.clone()));
        assert_eq!(h.manager.status(), AuthStatus::Authenticated);
        assert!(notifications(&h).is_empty());
        assert_eq!(
            h.manager.get_valid_access_token().await.unwrap(),
            fresh.access_token
        );
        assert_eq!(h.refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_refresher_releases_waiters() {
        let h = harness(
            Some(TokenPair::new(token_expiring_in(-30), token_expiring_in(86_400))),
            Script::Panic,
        );

        let results = futures::future::join_all(
            (0..3).map(|_| h.manager.get_valid_access_token()),
        )
        .await;
        for result in results {
            assert!(matches!(result, Err(AuthError::SessionExpired)));
        }
        assert_eq!(h.refresher.calls(), 1);
        assert_eq!(h.manager.status(), AuthStatus::Unauthenticated);
        assert!(h.store.get().unwrap().is_none());
        assert_eq!(notifications(&h), vec![ExpiryReason::RefreshFailed]);

        // Nothing is left in flight
        assert!(matches!(
            h.manager.get_valid_access_token().await,
            Err(AuthError::SessionExpired)
        ));
        assert_eq!(h.refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejection_of_stale_token_skips_network() {
        let current = token_expiring_in(600);
        let h = harness(
            Some(TokenPair::new(current.clone(), token_expiring_in(86_400))),
            Script::Reject,
        );

        let token = h
            .manager
            .refresh_after_rejection("some-older-token")
            .await
            .unwrap();
        assert_eq!(token, current);
        assert_eq!(h.refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_rejection_of_current_token_refreshes() {
        let current = token_expiring_in(600);
        let refreshed = token_expiring_in(3600);
        let h = harness(
            Some(TokenPair::new(current.clone(), token_expiring_in(86_400))),
            Script::Issue(refreshed.clone()),
        );

        let token = h.manager.refresh_after_rejection(&current).await.unwrap();
        assert_eq!(token, refreshed);
        assert_eq!(h.refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_if_expiring_uses_lead_window() {
        let refreshed = token_expiring_in(3600);
        let h = harness(
            Some(TokenPair::new(token_expiring_in(200), token_expiring_in(86_400))),
            Script::Issue(refreshed.clone()),
        );

        assert!(!h.manager.refresh_if_expiring(Duration::seconds(60)).await.unwrap());
        assert_eq!(h.refresher.calls(), 0);

        assert!(h.manager.refresh_if_expiring(Duration::seconds(300)).await.unwrap());
        assert_eq!(h.refresher.calls(), 1);
        assert_eq!(h.store.get().unwrap().unwrap().access_token, refreshed);
    }

    #[test]
    fn test_initialize_states() {
        let store = Arc::new(MemoryTokenStore::with_pair(&TokenPair::new(
            token_expiring_in(-30),
            token_expiring_in(86_400),
        )));
        let manager = TokenLifecycleManager::new(
            store.clone(),
            ScriptedRefresher::new(Script::Reject),
            SessionPolicyHooks::new(),
            LifecycleSettings::default(),
        );
        assert!(manager.state().is_initializing);

        let state = manager.initialize().unwrap();
        assert!(!state.is_initializing);
        assert!(state.is_authenticated);
        assert_eq!(state.status, AuthStatus::Authenticated);

        store
            .set(&TokenPair::new(token_expiring_in(-30), token_expiring_in(-30)), false)
            .unwrap();
        let state = manager.initialize().unwrap();
        assert!(!state.is_authenticated);
        assert_eq!(state.status, AuthStatus::Unauthenticated);
        assert!(store.get().unwrap().is_none());
    }

    #[test]
    fn test_expiry_accessors() {
        let store = Arc::new(MemoryTokenStore::with_pair(&TokenPair::new(
            token_expiring_in(120),
            token_expiring_in(86_400),
        )));
        let manager = TokenLifecycleManager::new(
            store,
            ScriptedRefresher::new(Script::Reject),
            SessionPolicyHooks::new(),
            LifecycleSettings::default(),
        );

        let remaining = manager.time_until_expiry();
        assert!(remaining > Duration::seconds(100) && remaining <= Duration::seconds(120));
        assert!(manager.token_expiration().is_some());
        assert!(!manager.remember_me());
    }
}
