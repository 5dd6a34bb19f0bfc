// Session types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Access/refresh credential bundle identifying an authenticated session
///
/// Token contents are opaque; nothing here parses or validates them.
/// Persisted as `{accessToken, tokenType, refreshToken?, expiresAt?}`; the
/// issuance endpoints answer with `type` instead of `tokenType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,

    #[serde(alias = "type")]
    pub token_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Value of the Authorization header: "{tokenType} {accessToken}"
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Check if the pair expires within `threshold`
    /// Pairs without expiry information never count as expiring.
    pub fn is_expiring_within(&self, threshold: Duration) -> bool {
        match self.expires_at {
            None => false,
            // A window reaching past the representable range covers every expiry
            Some(exp) => Utc::now()
                .checked_add_signed(threshold)
                .map_or(true, |limit| exp <= limit),
        }
    }
}

/// Monotonically increasing tag for each distinct credential pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub const FIRST: Generation = Generation(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Process-wide view of identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggedIn(Generation),
    Refreshing(Generation),
}

impl SessionState {
    pub fn generation(&self) -> Option<Generation> {
        match self {
            SessionState::LoggedOut => None,
            SessionState::LoggedIn(g) | SessionState::Refreshing(g) => Some(*g),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        !matches!(self, SessionState::LoggedOut)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::LoggedOut => write!(f, "logged out"),
            SessionState::LoggedIn(g) => write!(f, "logged in ({})", g),
            SessionState::Refreshing(g) => write!(f, "refreshing ({})", g),
        }
    }
}

/// Credential pair together with the generation it was stored under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSnapshot {
    pub generation: Generation,
    pub pair: CredentialPair,
}

/// Sign-in request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}
