//! Admission policy: limits on concurrent sessions and relays.
//!
//! The policy layer is split into two types:
//!
//! - [`AdmissionPolicy`]: a plain configuration struct holding the limits.
//!   `None` means unbounded, which is the default.
//! - [`Admission`]: the runtime counterpart that owns the policy plus an
//!   atomic session counter, and hands out per-session [`RelayCounter`]s.
//!
//! Every admitted session or relay is represented by an [`ActiveGuard`] that
//! decrements its counter on drop, so counts stay correct on every exit path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Static admission limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Maximum number of concurrent sessions (top-level connections).
    pub max_sessions: Option<usize>,
    /// Maximum number of concurrent relays within one session.
    pub max_relays_per_session: Option<usize>,
}

/// Runtime admission control with atomic counters.
pub struct Admission {
    policy: AdmissionPolicy,
    active_sessions: Arc<AtomicUsize>,
}

impl Admission {
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self {
            policy,
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Admit a new session if the session limit allows it.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` describing the limit when the server is full.
    pub fn try_admit_session(&self) -> Result<ActiveGuard, String> {
        try_acquire(&self.active_sessions, self.policy.max_sessions)
            .map_err(|limit| format!("session limit reached ({limit}/{limit})"))
    }

    /// Create the relay counter for a newly admitted session.
    pub fn relay_counter(&self) -> RelayCounter {
        RelayCounter {
            limit: self.policy.max_relays_per_session,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Current number of admitted sessions (approximate under concurrency).
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }
}

/// Per-session count of in-flight relays, with an optional limit.
#[derive(Clone)]
pub struct RelayCounter {
    limit: Option<usize>,
    active: Arc<AtomicUsize>,
}

impl RelayCounter {
    /// Count one more relay if the per-session limit allows it.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` describing the limit when the session is full.
    pub fn try_acquire(&self) -> Result<ActiveGuard, String> {
        try_acquire(&self.active, self.limit)
            .map_err(|limit| format!("relay limit reached ({limit}/{limit})"))
    }

    /// Number of relays currently running in the session.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// Increment `counter` unless it already sits at `limit`. On refusal the
/// limit is returned.
fn try_acquire(counter: &Arc<AtomicUsize>, limit: Option<usize>) -> Result<ActiveGuard, usize> {
    match limit {
        None => {
            counter.fetch_add(1, Ordering::AcqRel);
        }
        Some(max) => {
            counter
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current < max).then_some(current + 1)
                })
                .map_err(|_| max)?;
        }
    }
    Ok(ActiveGuard {
        counter: counter.clone(),
    })
}

/// RAII guard that decrements its counter on drop.
/// Owns an `Arc<AtomicUsize>` so it is `Send` and can be moved into spawned tasks.
pub struct ActiveGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
