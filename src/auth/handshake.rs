//! Federated login flow: redirect, callback, token issuance

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::identity::{IdentityError, UserStore};
use super::models::{CallbackParams, LoginResponse, NewUser, User};
use super::oauth_state::OAuthStateStore;
use super::tokens::{TokenCodec, TokenError};
use crate::common::safe_email_log;
use crate::services::{IdentityProvider, ProviderError, ProviderProfile};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("state does not match a pending login")]
    Csrf,

    #[error("callback carried no authorization code")]
    MissingCode,

    #[error("provider denied authorization: {0}")]
    ProviderDenied(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// A started login: the state to pin on the browser and where to send it
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub state: String,
    pub redirect_url: String,
}

/// Drives one login attempt from redirect to minted session token
pub struct HandshakeController {
    provider: Arc<dyn IdentityProvider>,
    users: Arc<dyn UserStore>,
    tokens: Arc<TokenCodec>,
    states: OAuthStateStore,
    provider_timeout: Duration,
}

impl HandshakeController {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        users: Arc<dyn UserStore>,
        tokens: Arc<TokenCodec>,
        state_ttl: Duration,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            users,
            tokens,
            states: OAuthStateStore::new(state_ttl),
            provider_timeout,
        }
    }

    /// How long a started attempt stays valid
    pub fn state_ttl(&self) -> Duration {
        self.states.ttl()
    }

    /// Starts an attempt.
    ///
    /// The caller must hand `state` back to the same browser (the login
    /// cookie) and redirect it to `redirect_url`.
    pub async fn begin(&self) -> LoginAttempt {
        let state = self.states.issue().await;
        let redirect_url = self.provider.authorization_url(&state);
        LoginAttempt {
            state,
            redirect_url,
        }
    }

    /// Completes an attempt from the provider's callback parameters.
    ///
    /// `browser_state` is the state the calling browser received from
    /// [`begin`](Self::begin). It must equal the callback's `state`, which
    /// ties the callback to the browser that started the login. Any failure
    /// ends the attempt; the client has to start over.
    pub async fn complete(
        &self,
        params: CallbackParams,
        browser_state: Option<&str>,
    ) -> Result<LoginResponse, HandshakeError> {
        let state = params.state.unwrap_or_default();
        if state.is_empty() || browser_state != Some(state.as_str()) {
            warn!(
                has_cookie = browser_state.is_some(),
                "OAuth callback state does not match the browser that started the login"
            );
            return Err(HandshakeError::Csrf);
        }
        if !self.states.consume(&state).await {
            warn!("OAuth callback with unknown or expired state");
            return Err(HandshakeError::Csrf);
        }

        if let Some(error) = params.error {
            warn!(oauth_error = %error, "Provider returned an error to the callback");
            return Err(HandshakeError::ProviderDenied(error));
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(HandshakeError::MissingCode)?;

        let access_token = tokio::time::timeout(self.provider_timeout, self.provider.exchange_code(&code))
            .await
            .map_err(|_| ProviderError::ExchangeFailed("timed out".to_string()))??;

        let profile = tokio::time::timeout(self.provider_timeout, self.provider.fetch_profile(&access_token))
            .await
            .map_err(|_| ProviderError::ProfileFetchFailed("timed out".to_string()))??;

        let user = self.resolve_user(&profile).await?;

        // Role comes from the local record only.
        let token = self
            .tokens
            .issue(user.id, &user.email, &user.name, &user.role)?;

        info!(
            user_id = user.id,
            email = %safe_email_log(&user.email),
            provider = "google",
            "User authentication successful"
        );

        Ok(LoginResponse {
            token,
            email: user.email,
            name: user.name,
        })
    }

    async fn resolve_user(&self, profile: &ProviderProfile) -> Result<User, HandshakeError> {
        match self.users.find_by_email(&profile.email).await? {
            None => {
                let candidate = NewUser {
                    email: profile.email.clone(),
                    name: profile.name.clone(),
                    google_id: Some(profile.id.clone()),
                    role: String::new(),
                };
                match self.users.create(candidate).await {
                    Ok(user) => Ok(user),
                    Err(IdentityError::Conflict) => {
                        debug!(
                            email = %safe_email_log(&profile.email),
                            "Lost user creation race, re-reading"
                        );
                        self.users
                            .find_by_email(&profile.email)
                            .await?
                            .ok_or(HandshakeError::Identity(IdentityError::Conflict))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Some(mut user) if user.google_id.as_deref().map_or(true, str::is_empty) => {
                self.users
                    .backfill_provider_id(&user.email, &profile.id, &profile.name)
                    .await?;
                user.google_id = Some(profile.id.clone());
                user.name = profile.name.clone();
                Ok(user)
            }
            Some(user) => Ok(user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::SqliteUserStore;
    use crate::common::test_support::memory_pool;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        profile: ProviderProfile,
        exchanges: AtomicUsize,
        fail_exchange: bool,
        fail_profile: bool,
        delay: Option<Duration>,
    }

    impl StubProvider {
        fn new(email: &str) -> Self {
            Self {
                profile: ProviderProfile {
                    id: "google-sub-1".to_string(),
                    email: email.to_string(),
                    name: "Guest From Google".to_string(),
                },
                exchanges: AtomicUsize::new(0),
                fail_exchange: false,
                fail_profile: false,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        fn authorization_url(&self, state: &str) -> String {
            format!("https://provider.test/auth?state={}", state)
        }

        async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_exchange {
                return Err(ProviderError::ExchangeFailed("HTTP 400".to_string()));
            }
            Ok(format!("access-{}", code))
        }

        async fn fetch_profile(&self, _access_token: &str) -> Result<ProviderProfile, ProviderError> {
            if self.fail_profile {
                return Err(ProviderError::ProfileFetchFailed("HTTP 500".to_string()));
            }
            Ok(self.profile.clone())
        }
    }

    /// Hides existing rows from the first lookup, as if another login
    /// committed between our read and our insert.
    struct StaleFirstRead {
        inner: SqliteUserStore,
        stale_reads: AtomicUsize,
    }

    #[async_trait]
    impl UserStore for StaleFirstRead {
        async fn find_by_email(&self, email: &str) -> Result<Option<User>, IdentityError> {
            if self.stale_reads.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            self.inner.find_by_email(email).await
        }

        async fn create(&self, user: NewUser) -> Result<User, IdentityError> {
            self.inner.create(user).await
        }

        async fn backfill_provider_id(&self, email: &str, provider_id: &str, name: &str) -> Result<(), IdentityError> {
            self.inner.backfill_provider_id(email, provider_id, name).await
        }

        async fn set_role(&self, email: &str, role: &str) -> Result<Option<User>, IdentityError> {
            self.inner.set_role(email, role).await
        }
    }

    fn tokens() -> Arc<TokenCodec> {
        Arc::new(TokenCodec::new("test_secret_key", chrono::Duration::hours(1)))
    }

    fn controller(provider: Arc<dyn IdentityProvider>, users: Arc<dyn UserStore>) -> HandshakeController {
        HandshakeController::new(
            provider,
            users,
            tokens(),
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
    }

    fn callback(state: &str, code: &str) -> CallbackParams {
        CallbackParams {
            state: Some(state.to_string()),
            code: Some(code.to_string()),
            error: None,
        }
    }

    #[tokio::test]
    async fn first_login_creates_user_with_default_role() {
        let pool = memory_pool().await;
        let users = Arc::new(SqliteUserStore::new(pool));
        let ctl = controller(Arc::new(StubProvider::new("guest@example.com")), users.clone());

        let attempt = ctl.begin().await;
        assert!(attempt.redirect_url.ends_with(&format!("state={}", attempt.state)));
        let state = attempt.state;
        let resp = ctl.complete(callback(&state, "code-1"), Some(state.as_str())).await.unwrap();

        assert_eq!(resp.email, "guest@example.com");
        assert_eq!(resp.name, "Guest From Google");
        let claims = tokens().verify(&resp.token).unwrap();
        assert_eq!(claims.role, "user");

        let stored = users.find_by_email("guest@example.com").await.unwrap().unwrap();
        assert_eq!(stored.google_id.as_deref(), Some("google-sub-1"));
        assert_eq!(claims.user_id, stored.id);
    }

    #[tokio::test]
    async fn mismatched_state_stops_before_any_provider_call() {
        let pool = memory_pool().await;
        let users = Arc::new(SqliteUserStore::new(pool));
        let provider = Arc::new(StubProvider::new("guest@example.com"));
        let ctl = controller(provider.clone(), users.clone());

        let issued = ctl.begin().await.state;
        let err = ctl
            .complete(callback("random_state_string", "code-1"), Some(issued.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Csrf));

        // Both sides agreeing is not enough: the state must also be pending.
        let err = ctl
            .complete(
                callback("random_state_string", "code-1"),
                Some("random_state_string"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Csrf));

        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
        assert!(users.find_by_email("guest@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn callback_from_another_browser_is_rejected() {
        let users = Arc::new(SqliteUserStore::new(memory_pool().await));
        let provider = Arc::new(StubProvider::new("guest@example.com"));
        let ctl = controller(provider.clone(), users.clone());

        // A state issued to one browser, replayed by a client that never
        // received the login cookie.
        let state = ctl.begin().await.state;
        let err = ctl
            .complete(callback(&state, "code-1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Csrf));
        let err = ctl
            .complete(callback(&state, "code-1"), Some("someone-elses-state"))
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Csrf));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
        assert!(users.find_by_email("guest@example.com").await.unwrap().is_none());

        // The browser that started the attempt can still finish it.
        ctl.complete(callback(&state, "code-1"), Some(state.as_str()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn replayed_state_is_rejected() {
        let users = Arc::new(SqliteUserStore::new(memory_pool().await));
        let ctl = controller(Arc::new(StubProvider::new("guest@example.com")), users);

        let state = ctl.begin().await.state;
        ctl.complete(callback(&state, "code-1"), Some(state.as_str())).await.unwrap();
        let err = ctl.complete(callback(&state, "code-1"), Some(state.as_str())).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Csrf));
    }

    #[tokio::test]
    async fn existing_local_account_keeps_its_role() {
        let users = Arc::new(SqliteUserStore::new(memory_pool().await));
        users
            .create(NewUser {
                email: "owner@example.com".to_string(),
                name: "Owner".to_string(),
                google_id: None,
                role: "admin".to_string(),
            })
            .await
            .unwrap();
        let ctl = controller(Arc::new(StubProvider::new("owner@example.com")), users.clone());

        let state = ctl.begin().await.state;
        let resp = ctl.complete(callback(&state, "code-1"), Some(state.as_str())).await.unwrap();

        let claims = tokens().verify(&resp.token).unwrap();
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.name, "Guest From Google");

        let stored = users.find_by_email("owner@example.com").await.unwrap().unwrap();
        assert_eq!(stored.google_id.as_deref(), Some("google-sub-1"));
        assert_eq!(stored.role, "admin");
    }

    #[tokio::test]
    async fn exchange_failure_is_terminal() {
        let users = Arc::new(SqliteUserStore::new(memory_pool().await));
        let mut stub = StubProvider::new("guest@example.com");
        stub.fail_exchange = true;
        let ctl = controller(Arc::new(stub), users.clone());

        let state = ctl.begin().await.state;
        let err = ctl.complete(callback(&state, "code-1"), Some(state.as_str())).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Provider(ProviderError::ExchangeFailed(_))));
        assert!(users.find_by_email("guest@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn profile_failure_creates_no_user() {
        let users = Arc::new(SqliteUserStore::new(memory_pool().await));
        let mut stub = StubProvider::new("guest@example.com");
        stub.fail_profile = true;
        let provider = Arc::new(stub);
        let ctl = controller(provider.clone(), users.clone());

        let state = ctl.begin().await.state;
        let err = ctl
            .complete(callback(&state, "code-1"), Some(state.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::Provider(ProviderError::ProfileFetchFailed(_))
        ));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
        assert!(users.find_by_email("guest@example.com").await.unwrap().is_none());

        // The attempt is spent even though it failed downstream.
        let err = ctl
            .complete(callback(&state, "code-1"), Some(state.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Csrf));
    }

    #[tokio::test]
    async fn slow_provider_is_cut_off() {
        let users = Arc::new(SqliteUserStore::new(memory_pool().await));
        let mut stub = StubProvider::new("guest@example.com");
        stub.delay = Some(Duration::from_secs(5));
        let ctl = HandshakeController::new(
            Arc::new(stub),
            users,
            tokens(),
            Duration::from_secs(60),
            Duration::from_millis(20),
        );

        let state = ctl.begin().await.state;
        let err = ctl.complete(callback(&state, "code-1"), Some(state.as_str())).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Provider(ProviderError::ExchangeFailed(_))));
    }

    #[tokio::test]
    async fn provider_error_and_missing_code_are_rejected() {
        let users = Arc::new(SqliteUserStore::new(memory_pool().await));
        let ctl = controller(Arc::new(StubProvider::new("guest@example.com")), users);

        let state = ctl.begin().await.state;
        let err = ctl
            .complete(
                CallbackParams {
                    state: Some(state.clone()),
                    code: None,
                    error: Some("access_denied".to_string()),
                },
                Some(state.as_str()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::ProviderDenied(_)));

        let state = ctl.begin().await.state;
        let err = ctl
            .complete(
                CallbackParams {
                    state: Some(state.clone()),
                    code: None,
                    error: None,
                },
                Some(state.as_str()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::MissingCode));
    }

    #[tokio::test]
    async fn concurrent_first_logins_create_one_user() {
        let pool = memory_pool().await;
        let users = Arc::new(SqliteUserStore::new(pool.clone()));
        let ctl = Arc::new(controller(Arc::new(StubProvider::new("new@example.com")), users));

        let s1 = ctl.begin().await.state;
        let s2 = ctl.begin().await.state;
        let (a, b) = tokio::join!(
            ctl.complete(callback(&s1, "code-a"), Some(s1.as_str())),
            ctl.complete(callback(&s2, "code-b"), Some(s2.as_str()))
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind("new@example.com")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let ca = tokens().verify(&a.token).unwrap();
        let cb = tokens().verify(&b.token).unwrap();
        assert_eq!(ca.user_id, cb.user_id);
    }

    #[tokio::test]
    async fn lost_creation_race_rereads_the_winner() {
        let pool = memory_pool().await;
        let inner = SqliteUserStore::new(pool.clone());
        let winner = inner
            .create(NewUser {
                email: "new@example.com".to_string(),
                name: "Winner".to_string(),
                google_id: Some("google-sub-1".to_string()),
                role: String::new(),
            })
            .await
            .unwrap();
        let users = Arc::new(StaleFirstRead {
            inner,
            stale_reads: AtomicUsize::new(0),
        });
        let ctl = controller(Arc::new(StubProvider::new("new@example.com")), users);

        let state = ctl.begin().await.state;
        let resp = ctl.complete(callback(&state, "code-1"), Some(state.as_str())).await.unwrap();

        let claims = tokens().verify(&resp.token).unwrap();
        assert_eq!(claims.user_id, winner.id);
        assert_eq!(resp.name, "Winner");
    }
}
