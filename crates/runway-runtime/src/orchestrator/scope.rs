use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Why a request, or one branch of it, was told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The request's own timeout elapsed.
    Timeout,
    /// Another concurrent attempt already won.
    Superseded,
    /// The operator withdrew the request, e.g. by replacing its specification.
    Withdrawn,
}

struct ScopeInner {
    token: CancellationToken,
    reason: OnceLock<StopReason>,
    parent: Option<RequestScope>,
}

/// Cancellation scope of one execution request.
///
/// Children observe their parent's stop; stopping a child leaves the parent running.
/// The first recorded reason wins.
#[derive(Clone)]
pub struct RequestScope {
    inner: Arc<ScopeInner>,
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestScope {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                token: CancellationToken::new(),
                reason: OnceLock::new(),
                parent: None,
            }),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                token: self.inner.token.child_token(),
                reason: OnceLock::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn stop(&self, reason: StopReason) {
        let _ = self.inner.reason.set(reason);
        self.inner.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub async fn stopped(&self) {
        self.inner.token.cancelled().await
    }

    /// The reason recorded on this scope, else the nearest ancestor's.
    pub fn reason(&self) -> Option<StopReason> {
        self.inner
            .reason
            .get()
            .copied()
            .or_else(|| self.inner.parent.as_ref().and_then(|p| p.reason()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_follow_parents_but_not_the_reverse() {
        let parent = RequestScope::new();
        let a = parent.child();
        let b = parent.child();

        a.stop(StopReason::Superseded);
        assert!(a.is_stopped());
        assert!(!parent.is_stopped());
        assert!(!b.is_stopped());

        parent.stop(StopReason::Timeout);
        assert!(b.is_stopped());
        assert_eq!(b.reason(), Some(StopReason::Timeout));
        assert_eq!(a.reason(), Some(StopReason::Superseded));
    }

    #[test]
    fn first_reason_sticks() {
        let scope = RequestScope::new();
        scope.stop(StopReason::Withdrawn);
        scope.stop(StopReason::Timeout);
        assert_eq!(scope.reason(), Some(StopReason::Withdrawn));
    }
}
