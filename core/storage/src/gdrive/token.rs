//! Bearer credentials and granted-scope checks.
//!
//! Sign-in and token refresh happen outside the vault. The client only asks
//! a [`TokenSource`] for the current access token before each request.

use async_trait::async_trait;
use std::fmt;
use zeroize::Zeroizing;

use cardsafe_common::{Error, RemoteReason, Result};

/// Full Drive access.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Access to files created by this app.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Supplies the bearer credential attached to Drive requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current access token.
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token handed over by the sign-in flow.
pub struct StaticToken {
    token: Zeroizing<String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
        }
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken([REDACTED])")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        if self.token.trim().is_empty() {
            return Err(Error::remote(
                RemoteReason::Unauthorized,
                "No access token available",
            ));
        }
        Ok(self.token.to_string())
    }
}

/// Check the scope list reported alongside a token.
///
/// `scopes` is the space-separated list from the identity provider. Missing
/// or empty scope information is treated as not granted.
pub fn check_granted_scopes(scopes: Option<&str>) -> Result<()> {
    let scopes = match scopes.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => {
            return Err(Error::remote(
                RemoteReason::PermissionDenied,
                "Granted scopes unknown; storage access not confirmed",
            ))
        }
    };

    if scopes
        .split_whitespace()
        .any(|scope| scope == DRIVE_SCOPE || scope == DRIVE_FILE_SCOPE)
    {
        Ok(())
    } else {
        Err(Error::remote(
            RemoteReason::PermissionDenied,
            format!("Drive scope not granted (have: {})", scopes),
        ))
    }
}
