use async_trait::async_trait;
use recall_sampling::{SampleRequest, Sampler, SamplingError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle flag shared by the version cache, its watcher and the sampler.
///
/// Closing is one-way. Once closed, mutations are rejected and the filesystem watcher stops.
#[derive(Debug)]
pub struct SessionState {
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            closed: AtomicBool::new(false),
            closed_tx,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns true if this call performed the transition.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        log::warn!("Memory session closed; further writes are rejected");
        self.closed_tx.send_replace(true);
        true
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives in self, so the channel cannot close under us.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Wraps a sampler so that a permission denial closes the session for good.
pub struct GuardedSampler {
    inner: Arc<dyn Sampler>,
    state: Arc<SessionState>,
}

impl GuardedSampler {
    pub fn new(inner: Arc<dyn Sampler>, state: Arc<SessionState>) -> Self {
        Self { inner, state }
    }
}

#[async_trait]
impl Sampler for GuardedSampler {
    async fn sample(&self, request: SampleRequest) -> recall_sampling::Result<String> {
        if self.state.is_closed() {
            return Err(SamplingError::SessionClosed);
        }
        let result = self.inner.sample(request).await;
        if let Err(err) = &result {
            if err.is_permission_denied() {
                log::error!("Sampling permission denied by client: {err}");
                self.state.close();
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct DenyOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Sampler for DenyOnce {
        async fn sample(&self, _request: SampleRequest) -> recall_sampling::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SamplingError::PermissionDenied("user rejected".to_string()))
        }
    }

    #[tokio::test]
    async fn close_is_one_way_and_wakes_waiters() {
        let state = Arc::new(SessionState::new());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.closed().await })
        };

        assert!(state.close());
        assert!(!state.close());
        assert!(state.is_closed());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn permission_denial_closes_session() {
        let state = Arc::new(SessionState::new());
        let inner = Arc::new(DenyOnce {
            calls: AtomicUsize::new(0),
        });
        let sampler = GuardedSampler::new(inner.clone(), state.clone());

        let first = sampler.sample(SampleRequest::new("hi", 10)).await;
        assert!(matches!(first, Err(SamplingError::PermissionDenied(_))));
        assert!(state.is_closed());

        let second = sampler.sample(SampleRequest::new("hi", 10)).await;
        assert_eq!(second, Err(SamplingError::SessionClosed));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
