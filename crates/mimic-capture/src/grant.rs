//! Capture grants.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Authorization to read screen contents for one session.
///
/// The token is opaque; it comes from the platform consent flow. Clones
/// share revocation state, so the host can revoke a grant the pipeline
/// is using.
#[derive(Clone)]
pub struct CaptureGrant {
    token: Arc<str>,
    issued_at: Instant,
    ttl: Option<Duration>,
    revoked: Arc<AtomicBool>,
}

impl CaptureGrant {
    /// A grant that stays valid until revoked.
    pub fn new(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            token: Arc::from(token),
            issued_at: Instant::now(),
            ttl: None,
            revoked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A grant that expires `ttl` after issue.
    pub fn with_ttl(token: impl Into<String>, ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new(token)
        }
    }

    /// Withdraw the grant.
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    /// Returns true if the grant was revoked.
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Returns true if the grant has passed its lifetime.
    pub fn is_expired(&self) -> bool {
        self.ttl
            .map(|ttl| self.issued_at.elapsed() >= ttl)
            .unwrap_or(false)
    }

    /// Returns true if the grant can be used.
    pub fn is_valid(&self) -> bool {
        !self.token.is_empty() && !self.is_revoked() && !self.is_expired()
    }
}

impl fmt::Debug for CaptureGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log the token itself.
        f.debug_struct("CaptureGrant")
            .field("ttl", &self.ttl)
            .field("revoked", &self.is_revoked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revocation_is_shared() {
        let grant = CaptureGrant::new("token");
        let held = grant.clone();
        assert!(held.is_valid());
        grant.revoke();
        assert!(!held.is_valid());
    }

    #[test]
    fn test_expiry() {
        let grant = CaptureGrant::with_ttl("token", Duration::ZERO);
        assert!(grant.is_expired());
        assert!(!grant.is_valid());
    }

    #[test]
    fn test_empty_token_invalid() {
        assert!(!CaptureGrant::new("").is_valid());
    }

    #[test]
    fn test_debug_hides_token() {
        let grant = CaptureGrant::new("secret-token");
        assert!(!format!("{grant:?}").contains("secret"));
    }
}
