//! Reddit submission feed.
//!
//! App-only OAuth against the Reddit API and a polling stream over `/r/{sub}/new`
//! that behaves like a live submission stream.

mod models;
mod stream;

pub use models::parse_transaction_count;
pub use stream::{RedditFeed, RedditSession};

use listing_core::{FeedError, Submission};
use reqwest::{Client, StatusCode};
use std::fmt;
use std::time::{Duration, Instant};

const AUTH_BASE_URL: &str = "https://www.reddit.com";
const API_BASE_URL: &str = "https://oauth.reddit.com";
const SITE_URL: &str = "https://www.reddit.com";
const LISTING_LIMIT: u32 = 100;

/// Script-app credentials used for the client-credentials grant.
#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

impl fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AccessToken {
    pub value: String,
    pub expires_at: Instant,
}

impl AccessToken {
    /// Treat tokens as expired a minute early so a poll never races the expiry.
    pub fn is_expired(&self) -> bool {
        Instant::now() + Duration::from_secs(60) >= self.expires_at
    }
}

#[derive(Clone)]
pub struct RedditClient {
    client: Client,
    credentials: RedditCredentials,
    auth_base_url: String,
    api_base_url: String,
    site_url: String,
}

impl RedditClient {
    pub fn new(credentials: RedditCredentials, timeout: Duration) -> Result<Self, FeedError> {
        Self::with_base_urls(credentials, timeout, AUTH_BASE_URL, API_BASE_URL)
    }

    /// Point the client at other hosts (proxies, local test servers).
    pub fn with_base_urls(
        credentials: RedditCredentials,
        timeout: Duration,
        auth_base_url: &str,
        api_base_url: &str,
    ) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(credentials.user_agent.clone())
            .build()
            .map_err(|e| FeedError::Fatal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            auth_base_url: auth_base_url.trim_end_matches('/').to_string(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            site_url: SITE_URL.to_string(),
        })
    }

    /// Obtain an app-only access token.
    ///
    /// Rejected credentials are `Fatal`; anything else is `Transient`.
    pub(crate) async fn authenticate(&self) -> Result<AccessToken, FeedError> {
        let url = format!("{}/api/v1/access_token", self.auth_base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| FeedError::Transient(format!("Auth request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FeedError::Fatal(format!(
                "Reddit rejected the client credentials (HTTP {})",
                status
            )));
        }
        if !status.is_success() {
            return Err(FeedError::Transient(format!("Auth returned HTTP {}", status)));
        }

        let token: models::TokenResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Transient(format!("Undecodable auth response: {}", e)))?;

        if let Some(error) = token.error {
            return Err(FeedError::Fatal(format!("Reddit auth error: {}", error)));
        }
        let value = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FeedError::Fatal("Reddit auth response had no access_token".to_string()))?;

        let expires_in = Duration::from_secs(token.expires_in.unwrap_or(3600));
        tracing::debug!("Obtained Reddit access token (expires in {}s)", expires_in.as_secs());

        Ok(AccessToken {
            value,
            expires_at: Instant::now() + expires_in,
        })
    }

    /// Fetch the newest page of `subreddit`, newest first.
    pub(crate) async fn fetch_new(
        &self,
        token: &AccessToken,
        subreddit: &str,
    ) -> Result<Vec<Result<Submission, FeedError>>, FeedError> {
        let url = format!("{}/r/{}/new", self.api_base_url, subreddit);
        let limit = LISTING_LIMIT.to_string();
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token.value)
            .query(&[("limit", limit.as_str()), ("raw_json", "1")])
            .send()
            .await
            .map_err(|e| FeedError::Transient(format!("Listing request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
            return Err(FeedError::Fatal(format!(
                "r/{} is not readable (HTTP {})",
                subreddit, status
            )));
        }
        if !status.is_success() {
            // 401 lands here too: the next session re-authenticates.
            return Err(FeedError::Transient(format!("Listing returned HTTP {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Transient(format!("Listing body: {}", e)))?;

        models::parse_listing(&body, &self.site_url)
    }
}
