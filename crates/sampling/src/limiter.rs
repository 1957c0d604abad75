use crate::{Result, SampleRequest, Sampler};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{self, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingLimits {
    pub max_in_flight: usize,
    pub min_spacing: Duration,
}

impl Default for SamplingLimits {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            min_spacing: Duration::from_millis(100),
        }
    }
}

/// Caps concurrent calls to the wrapped sampler and keeps a minimum gap between dispatches.
pub struct RateLimitedSampler<S> {
    inner: S,
    permits: Semaphore,
    min_spacing: Duration,
    next_dispatch: Mutex<Instant>,
}

impl<S: Sampler> RateLimitedSampler<S> {
    pub fn new(inner: S, limits: SamplingLimits) -> Self {
        Self {
            inner,
            permits: Semaphore::new(limits.max_in_flight.max(1)),
            min_spacing: limits.min_spacing,
            next_dispatch: Mutex::new(Instant::now()),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    async fn wait_for_slot(&self) {
        let mut next = self.next_dispatch.lock().await;
        let now = Instant::now();
        if *next > now {
            time::sleep_until(*next).await;
        }
        *next = Instant::now() + self.min_spacing;
    }
}

#[async_trait]
impl<S: Sampler> Sampler for RateLimitedSampler<S> {
    async fn sample(&self, request: SampleRequest) -> Result<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| crate::SamplingError::Transport(format!("rate limiter closed: {err}")))?;
        self.wait_for_slot().await;
        self.inner.sample(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct SlowSampler {
        running: AtomicUsize,
        peak: AtomicUsize,
        dispatched_at: std::sync::Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl Sampler for SlowSampler {
        async fn sample(&self, _request: SampleRequest) -> Result<String> {
            self.dispatched_at.lock().unwrap().push(Instant::now());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            time::sleep(Duration::from_millis(500)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok("ok".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn limits_in_flight_calls_and_spacing() {
        let sampler = Arc::new(RateLimitedSampler::new(
            SlowSampler {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                dispatched_at: std::sync::Mutex::new(Vec::new()),
            },
            SamplingLimits {
                max_in_flight: 2,
                min_spacing: Duration::from_millis(50),
            },
        ));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let sampler = sampler.clone();
            handles.push(tokio::spawn(async move {
                sampler.sample(SampleRequest::new("hi", 10)).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "ok");
        }

        assert_eq!(sampler.inner.peak.load(Ordering::SeqCst), 2);
        let dispatched = sampler.inner.dispatched_at.lock().unwrap().clone();
        assert_eq!(dispatched.len(), 6);
        for pair in dispatched.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(50));
        }
        assert_eq!(sampler.available_permits(), 2);
    }
}
