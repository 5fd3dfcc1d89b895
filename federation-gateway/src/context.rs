//! Request context.
//!
//! A [`Context`] is created by the caller for every request and handed to each subgraph call
//! made on behalf of that request. It carries the request's cancellation token and deadline.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per request state shared by every fetch of a query plan.
#[derive(Clone, Debug)]
pub struct Context {
    cancellation_token: CancellationToken,
    deadline: Option<Instant>,
    pub(crate) created_at: Instant,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A context without deadline and with a fresh cancellation token.
    pub fn new() -> Self {
        Context {
            cancellation_token: CancellationToken::new(),
            deadline: None,
            created_at: Instant::now(),
        }
    }

    /// A context which is cancelled when `parent` is.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Context {
            cancellation_token: parent.child_token(),
            ..Context::new()
        }
    }

    /// Sets an absolute deadline. An earlier deadline already present is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Sets a deadline relative to the creation of the context.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = self.created_at + timeout;
        self.with_deadline(deadline)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Cancels this request, and every subgraph call still running for it.
    pub fn cancel(&self) {
        self.cancellation_token.cancel()
    }

    /// A context for the same request whose cancellation does not reach the caller.
    ///
    /// Execution cancels this child on its first failure so sibling fetches stop, while the
    /// caller's token stays untouched.
    pub(crate) fn request_scope(&self) -> Context {
        Context {
            cancellation_token: self.cancellation_token.child_token(),
            deadline: self.deadline,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn earliest_deadline_wins() {
        let now = Instant::now();
        let context = Context::new()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(5));
        assert_eq!(context.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn timeout_is_relative_to_creation() {
        let context = Context::new();
        let created_at = context.created_at;
        let context = context.with_timeout(Duration::from_millis(100));
        assert_eq!(
            context.deadline(),
            Some(created_at + Duration::from_millis(100))
        );
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_children() {
        let parent = CancellationToken::new();
        let context = Context::with_parent(&parent);
        let scope = context.request_scope();
        parent.cancel();
        assert!(context.is_cancelled());
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn request_scope_cancellation_does_not_reach_caller() {
        let context = Context::new();
        let scope = context.request_scope();
        scope.cancel();
        assert!(scope.is_cancelled());
        assert!(!context.is_cancelled());
    }
}
