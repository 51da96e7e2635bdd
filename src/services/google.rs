// src/services/google.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::common::config::GoogleOAuthConfig;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("profile fetch failed: {0}")]
    ProfileFetchFailed(String),
}

/// Profile returned by the provider's userinfo endpoint
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProviderProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// External OAuth2 identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authorization URL the browser is redirected to, carrying `state`.
    fn authorization_url(&self, state: &str) -> String;

    /// Exchanges an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GoogleService {
    config: GoogleOAuthConfig,
    client: Client,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
}

impl GoogleService {
    pub fn new(config: GoogleOAuthConfig, timeout: std::time::Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            config,
            client,
            auth_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            userinfo_url: USERINFO_URL.to_string(),
        }
    }

    /// Points the service at different provider endpoints.
    #[cfg(test)]
    pub fn with_endpoints(mut self, auth_url: &str, token_url: &str, userinfo_url: &str) -> Self {
        self.auth_url = auth_url.to_string();
        self.token_url = token_url.to_string();
        self.userinfo_url = userinfo_url.to_string();
        self
    }
}

#[async_trait]
impl IdentityProvider for GoogleService {
    fn authorization_url(&self, state: &str) -> String {
        let scope_param = SCOPES.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent",
            self.auth_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_url),
            urlencoding::encode(&scope_param),
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        let params = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ];

        debug!("Exchanging authorization code for tokens");

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::ExchangeFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "Token exchange failed");
            return Err(ProviderError::ExchangeFailed(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ProviderError::ExchangeFailed(e.to_string()))?;

        Ok(token.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::ProfileFetchFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status, "Userinfo request failed");
            return Err(ProviderError::ProfileFetchFailed(format!("HTTP {}", status)));
        }

        let profile = response
            .json::<ProviderProfile>()
            .await
            .map_err(|e| ProviderError::ProfileFetchFailed(e.to_string()))?;

        if profile.email.is_empty() || profile.id.is_empty() {
            return Err(ProviderError::ProfileFetchFailed(
                "profile missing id or email".to_string(),
            ));
        }

        debug!(provider_id = %profile.id, "Fetched provider profile");
        Ok(profile)
    }
}
