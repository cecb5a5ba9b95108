//! Per-request actor context
//!
//! Every mutating call takes a [`RequestContext`] naming the acting user and
//! carrying the request's deadline and cancellation signal. Nothing here is
//! global or thread-local.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AuthzError, Result};
use crate::types::UserId;

/// Actor identity used for bootstrap grants that bypass delegation checks
pub const SYSTEM_ACTOR: &str = "system";

/// Request-scoped identity, deadline and cancellation signal
#[derive(Debug, Clone)]
pub struct RequestContext {
    actor: UserId,
    subject: Option<UserId>,
    system: bool,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Context for an acting user subject to delegation rules
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            subject: None,
            system: false,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Context for bootstrap and maintenance grants
    ///
    /// Skips delegation checks. Registry and identity checks still apply.
    pub fn system() -> Self {
        Self {
            system: true,
            ..Self::new(SYSTEM_ACTOR)
        }
    }

    /// Records the user whose permissions the request is about
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Fails the request once `timeout` has elapsed from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Binds the request to an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Subject user, falling back to the actor
    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or(&self.actor)
    }

    pub fn is_system(&self) -> bool {
        self.system
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the cancellation signal fired or the deadline passed
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns `Cancelled` if the request must stop
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AuthzError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs `fut` unless the request is cancelled or its deadline passes first
    ///
    /// Only used around read-only and not-yet-committed work; commits are
    /// never raced against the signal.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.ensure_active()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AuthzError::Cancelled),
            _ = deadline => Err(AuthzError::Cancelled),
            result = fut => result,
        }
    }
}
