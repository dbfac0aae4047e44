//! Passphrase session cache.
//!
//! Holds the passphrase in memory for a bounded time so the user is not
//! prompted for every operation. The passphrase is zeroized when the lease
//! ends, whether by expiry or by [`SessionCache::clear`]. Nothing here is
//! ever written to storage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use cardsafe_common::SecretBytes;

/// Default lease length.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.offset_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// State of the session cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No passphrase held.
    Empty,
    /// A passphrase is held until the lease expires.
    Leased,
}

struct Lease {
    passphrase: SecretBytes,
    expires_at: Instant,
}

/// Time-bounded in-memory passphrase holder.
pub struct SessionCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    lease: RwLock<Option<Lease>>,
}

impl SessionCache {
    /// Create an empty cache using the system clock.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Create an empty cache with an injected clock.
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            lease: RwLock::new(None),
        }
    }

    /// Lease length.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Hold `passphrase` for one TTL from now, replacing any current lease.
    pub async fn store(&self, passphrase: SecretBytes) {
        let expires_at = self.clock.now() + self.ttl;
        *self.lease.write().await = Some(Lease {
            passphrase,
            expires_at,
        });
        debug!(ttl_secs = self.ttl.as_secs(), "Passphrase lease started");
    }

    /// A copy of the held passphrase, if the lease is still valid.
    ///
    /// An expired lease is dropped on the way out.
    pub async fn retrieve(&self) -> Option<SecretBytes> {
        let mut lease = self.lease.write().await;
        if self.expire(&mut lease) {
            return None;
        }
        lease.as_ref().map(|l| l.passphrase.duplicate())
    }

    /// End the lease now.
    pub async fn clear(&self) {
        if self.lease.write().await.take().is_some() {
            debug!("Passphrase lease cleared");
        }
    }

    /// Current state, after applying expiry.
    pub async fn state(&self) -> SessionState {
        let mut lease = self.lease.write().await;
        self.expire(&mut lease);
        if lease.is_some() {
            SessionState::Leased
        } else {
            SessionState::Empty
        }
    }

    /// Time left on the lease.
    pub async fn remaining(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.lease
            .read()
            .await
            .as_ref()
            .and_then(|l| l.expires_at.checked_duration_since(now))
            .filter(|d| !d.is_zero())
    }

    /// Drop the lease if it has expired. Returns whether it did.
    fn expire(&self, lease: &mut Option<Lease>) -> bool {
        let expired = matches!(lease, Some(l) if self.clock.now() >= l.expires_at);
        if expired {
            *lease = None;
            debug!("Passphrase lease expired");
        }
        expired
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
