//! # Token Cache
//!
//! Holds the bearer token issued by `POST /sync/connect`.
//!
//! ## Token Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   (none) ──connect 200──► cached ──expires_in - margin──► treated absent│
//! │      ▲                       │                              │           │
//! │      │                       │ server answers 401           │           │
//! │      └───────────────────────┴──────────────────────────────┘           │
//! │                                                                         │
//! │   Absent token  = DISCONNECTED   Usable token = CONNECTED               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The margin is 60s, or half the lifetime for tokens shorter than two
//! minutes. Lifetimes are capped at one year.
//!
//! Tokens live in memory only. A restart simply connects again.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use medstore_core::changes::ConnectResponse;

/// Margin before token expiration after which the token is no longer used (60 s).
const EXPIRY_MARGIN_SECS: u64 = 60;

/// Longest lifetime taken at face value.
const MAX_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

/// A token issued by the central server.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    /// The JWT access token
    pub access_token: String,
    /// When the access token expires (local time)
    pub expires_at: Instant,
    /// From here on the token is no longer used
    pub stale_at: Instant,
}

impl TokenInfo {
    pub fn new(access_token: impl Into<String>, expires_in: Duration) -> Self {
        let lifetime = expires_in.min(Duration::from_secs(MAX_LIFETIME_SECS));
        let margin = Duration::from_secs(EXPIRY_MARGIN_SECS).min(lifetime / 2);
        if lifetime < Duration::from_secs(2 * EXPIRY_MARGIN_SECS) {
            warn!(lifetime_secs = lifetime.as_secs(), "Server issued a short-lived token");
        }

        let now = Instant::now();
        let expires_at = now.checked_add(lifetime).unwrap_or(now);
        TokenInfo {
            access_token: access_token.into(),
            expires_at,
            stale_at: expires_at.checked_sub(margin).unwrap_or(now),
        }
    }

    /// Builds token info from a connect response. A negative lifetime
    /// yields an already expired token.
    pub fn from_response(response: &ConnectResponse) -> Self {
        let secs = u64::try_from(response.expires_in).unwrap_or(0);
        Self::new(response.access_token.clone(), Duration::from_secs(secs))
    }

    /// Check if the token is expired or about to expire
    pub fn is_stale(&self) -> bool {
        Instant::now() >= self.stale_at
    }

    /// Get remaining valid time
    pub fn remaining_secs(&self) -> u64 {
        self.expires_at
            .saturating_duration_since(Instant::now())
            .as_secs()
    }
}

/// Shared, replaceable token slot.
#[derive(Debug, Default)]
pub struct TokenCache {
    current: RwLock<Option<TokenInfo>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token, unless absent or stale.
    pub async fn usable(&self) -> Option<String> {
        let guard = self.current.read().await;
        match guard.as_ref() {
            Some(token) if !token.is_stale() => Some(token.access_token.clone()),
            Some(_) => {
                debug!("Cached token is stale");
                None
            }
            None => None,
        }
    }

    pub async fn store(&self, token: TokenInfo) {
        debug!(remaining_secs = token.remaining_secs(), "Caching sync token");
        *self.current.write().await = Some(token);
    }

    pub async fn clear(&self) {
        *self.current.write().await = None;
    }

    pub async fn is_connected(&self) -> bool {
        self.usable().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_lifecycle() {
        let cache = TokenCache::new();
        assert!(!cache.is_connected().await);

        cache
            .store(TokenInfo::new("abc", Duration::from_secs(3600)))
            .await;
        assert_eq!(cache.usable().await.as_deref(), Some("abc"));

        cache.clear().await;
        assert!(cache.usable().await.is_none());
    }

    #[test]
    fn test_token_within_margin_is_stale() {
        let token = TokenInfo::new("hour", Duration::from_secs(3600));
        assert_eq!(token.expires_at - token.stale_at, Duration::from_secs(60));
        assert!(!token.is_stale());
    }

    #[tokio::test]
    async fn test_short_lifetime_is_usable_for_half_of_it() {
        let cache = TokenCache::new();
        let token = TokenInfo::new("short", Duration::from_secs(30));
        assert_eq!(token.expires_at - token.stale_at, Duration::from_secs(15));

        cache.store(token).await;
        assert_eq!(cache.usable().await.as_deref(), Some("short"));
    }

    #[test]
    fn test_huge_lifetime_does_not_overflow() {
        let token = TokenInfo::new("forever", Duration::MAX);
        assert!(!token.is_stale());
        assert!(token.remaining_secs() <= MAX_LIFETIME_SECS);

        let response = ConnectResponse {
            access_token: "t".into(),
            token_type: "bearer".into(),
            expires_in: i64::MAX,
            last_sync: Default::default(),
        };
        assert!(!TokenInfo::from_response(&response).is_stale());
    }

    #[test]
    fn test_zero_lifetime_is_stale() {
        let token = TokenInfo::new("none", Duration::ZERO);
        assert!(token.is_stale());
    }

    #[test]
    fn test_negative_lifetime_is_expired() {
        let response = ConnectResponse {
            access_token: "t".into(),
            token_type: "bearer".into(),
            expires_in: -5,
            last_sync: Default::default(),
        };
        let token = TokenInfo::from_response(&response);
        assert!(token.is_stale());
        assert_eq!(token.remaining_secs(), 0);
    }
}
