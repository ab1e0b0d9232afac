//! Cancellation tokens and deadlines for runtime calls.
//!
//! A runtime call gets a [`Deadline`]. It bounds how long the call may wait
//! for the runtime guard and is checked cooperatively inside the call. A
//! [`CancellationToken`] can be attached to stop the call early from another
//! thread.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use montante::{CancellationToken, Deadline};
//!
//! let token = CancellationToken::new();
//! let deadline = Deadline::after(Duration::from_secs(30)).with_token(token.clone());
//! assert!(deadline.check().is_ok());
//!
//! token.cancel();
//! assert!(deadline.check().is_err());
//! ```
//!
//! # Thread Safety
//!
//! Both types are `Send + Sync` and cheap to clone.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{MontanteError, Result};

/// A token that can be used to signal cancellation of an operation.
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);

impl CancellationToken {
    /// Creates a new token in the non-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Visible to every clone.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Time budget for a runtime call.
///
/// `Deadline::none()` never expires on its own but still honours an attached
/// token.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Option<Duration>,
    token: Option<CancellationToken>,
}

static_assertions::assert_impl_all!(Deadline: Send, Sync);

impl Deadline {
    /// A deadline that never expires.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
            budget: Some(budget),
            token: None,
        }
    }

    /// `Deadline::after(budget)` when a budget is given, `Deadline::none()` otherwise.
    #[must_use]
    pub fn from_budget(budget: Option<Duration>) -> Self {
        budget.map_or_else(Self::none, Self::after)
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// The instant the deadline expires, if bounded.
    #[must_use]
    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// The original budget, if bounded.
    #[must_use]
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Time left before expiry. `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// `true` once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Fails with [`MontanteError::Cancelled`] or [`MontanteError::TrainingTimeout`]
    /// when the call should stop.
    pub fn check(&self) -> Result<()> {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(MontanteError::Cancelled);
        }
        if self.is_expired() {
            return Err(self.timeout_error());
        }
        Ok(())
    }

    pub(crate) fn timeout_error(&self) -> MontanteError {
        MontanteError::TrainingTimeout(self.budget.unwrap_or_default())
    }
}
