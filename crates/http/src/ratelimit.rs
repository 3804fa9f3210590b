use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Per-key token-bucket rate limiter.
///
/// Keys default to the request host, so each remote endpoint gets its
/// own bucket. Tokens accumulate at `rate` per second up to `burst`;
/// [`wait`](Self::wait) sleeps until a token is available.
pub struct TokenBucketLimiter {
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
    rate: f64,
    burst: usize,
    key_fn: Option<Box<dyn Fn(&reqwest::Request) -> String + Send + Sync>>,
}

struct Bucket {
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last: Instant,
}

impl TokenBucketLimiter {
    /// Creates a limiter issuing `rate` tokens per second with the
    /// given burst capacity.
    pub fn new(rate: f64, burst: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate,
            burst,
            key_fn: None,
        }
    }

    /// Overrides the bucket key derivation (default: request host).
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&reqwest::Request) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Box::new(key_fn));
        self
    }

    /// Blocks until the request's bucket yields a token.
    pub async fn wait(&self, req: &reqwest::Request) {
        if self.rate <= 0.0 {
            return;
        }
        let bucket = self.bucket_for(req);
        loop {
            let delay = bucket.reserve(self.rate, self.burst);
            if delay.is_zero() {
                return;
            }
            tokio::time::sleep(delay).await;
        }
    }

    fn bucket_for(&self, req: &reqwest::Request) -> Arc<Bucket> {
        let mut key = req.url().host_str().unwrap_or_default().to_string();
        if let Some(key_fn) = &self.key_fn {
            let custom = key_fn(req);
            if !custom.is_empty() {
                key = custom;
            }
        }
        if key.is_empty() {
            key = "default".to_string();
        }
        let mut buckets = self.buckets.lock().unwrap();
        Arc::clone(buckets.entry(key).or_insert_with(|| {
            Arc::new(Bucket {
                state: Mutex::new(BucketState {
                    tokens: self.burst as f64,
                    last: Instant::now(),
                }),
            })
        }))
    }
}

impl Bucket {
    /// Takes a token if available, otherwise returns how long to wait.
    fn reserve(&self, rate: f64, burst: usize) -> Duration {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(burst as f64);
        state.last = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - state.tokens) / rate)
    }
}
