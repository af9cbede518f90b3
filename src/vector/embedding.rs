//! `EmbeddingBackend`: the abstract contract for turning text into vectors.
//! Concrete provider wire formats are out of scope; only the contract plus
//! a `NoneBackend` and a rate-limited remote-call skeleton are implemented
//! here.
use crate::error::{RecallError, RecallResult};
use crate::vector::types::Vector;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn encode(&self, text: &str) -> RecallResult<Vector>;
    async fn encode_batch(&self, texts: &[String]) -> RecallResult<Vec<Vector>>;
    fn dimension(&self) -> usize;
    fn is_available(&self) -> bool;
}

/// The vector layer is disabled; every call reports unavailable rather than
/// failing loudly, so callers (Extractor, Retriever) degrade gracefully.
pub struct NoneBackend;

#[async_trait]
impl EmbeddingBackend for NoneBackend {
    async fn encode(&self, _text: &str) -> RecallResult<Vector> {
        Err(RecallError::Validation("embedding backend disabled".into()))
    }

    async fn encode_batch(&self, _texts: &[String]) -> RecallResult<Vec<Vector>> {
        Err(RecallError::Validation("embedding backend disabled".into()))
    }

    fn dimension(&self) -> usize {
        0
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// A sliding-window limiter: at most `max_requests` calls per
/// `window_seconds`. Callers that exceed the window back off with a fixed
/// 15s/30s/45s schedule over three attempts on a 429.
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_seconds),
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an attempt and report whether it's allowed right now.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().unwrap();
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) > self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Backoff schedule used after a 429 from a remote embedding/LLM provider:
/// 15s, 30s, 45s, three attempts total.
pub const RETRY_BACKOFF_SECONDS: [u64; 3] = [15, 30, 45];

/// Skeleton for a remote HTTP embedding provider. The wire protocol is out
/// of scope; this owns only the rate limiter and retry bookkeeping that the
/// contract requires, behind a caller-supplied `call` closure so the crate
/// never bakes in a specific vendor's request shape.
pub struct RemoteBackend<F> {
    dimension: usize,
    limiter: SlidingWindowLimiter,
    call: F,
}

impl<F> RemoteBackend<F>
where
    F: Fn(&str) -> RecallResult<Vec<f32>> + Send + Sync,
{
    pub fn new(dimension: usize, max_requests: usize, window_seconds: u64, call: F) -> Self {
        Self {
            dimension,
            limiter: SlidingWindowLimiter::new(max_requests, window_seconds),
            call,
        }
    }

    async fn encode_with_retry(&self, text: &str) -> RecallResult<Vector> {
        for (attempt, backoff) in RETRY_BACKOFF_SECONDS.iter().enumerate() {
            if !self.limiter.try_acquire() {
                if attempt + 1 == RETRY_BACKOFF_SECONDS.len() {
                    return Err(RecallError::RateLimited { attempts: (attempt + 1) as u32 });
                }
                tokio::time::sleep(Duration::from_secs(*backoff)).await;
                continue;
            }
            return (self.call)(text).map(|values| Vector::new(values).normalized());
        }
        Err(RecallError::RateLimited { attempts: RETRY_BACKOFF_SECONDS.len() as u32 })
    }
}

#[async_trait]
impl<F> EmbeddingBackend for RemoteBackend<F>
where
    F: Fn(&str) -> RecallResult<Vec<f32>> + Send + Sync,
{
    async fn encode(&self, text: &str) -> RecallResult<Vector> {
        self.encode_with_retry(text).await
    }

    async fn encode_batch(&self, texts: &[String]) -> RecallResult<Vec<Vector>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.encode(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_allows_up_to_max_then_blocks() {
        let limiter = SlidingWindowLimiter::new(2, 60);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn none_backend_reports_unavailable() {
        let backend = NoneBackend;
        assert!(!backend.is_available());
        assert!(backend.encode("hi").await.is_err());
    }

    #[tokio::test]
    async fn remote_backend_encodes_and_normalizes() {
        let backend = RemoteBackend::new(3, 10, 60, |_text| Ok(vec![3.0, 4.0, 0.0]));
        let v = backend.encode("hello").await.unwrap();
        assert!((v.cosine_similarity(&v) - 1.0).abs() < 1e-5);
    }
}
