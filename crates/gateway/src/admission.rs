//! Per-tenant admission control: token-bucket rate limiting plus a bounded
//! concurrency gate.
//!
//! A request first consumes one token (reject immediately when the bucket is
//! empty), then waits up to [`ACQUIRE_WAIT`] for a concurrency slot. On
//! timeout the token is returned to the bucket. Release is idempotent: the
//! in-flight table keyed by client prevents underflow when release is called
//! without a matching acquire.

use crate::config::RateLimitPolicy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// How long a request may wait for a concurrency slot.
const ACQUIRE_WAIT: Duration = Duration::from_millis(500);

/// Token bucket with continuous proportional refill.
///
/// Token count stays within `[0, capacity]`.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        Self {
            capacity: f64::from(capacity),
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.capacity).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn return_token(&mut self) {
        self.refill();
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }
}

/// Admission state for one tenant. Lives exactly as long as its registry
/// entry; rebuilt whenever the tenant policy changes.
#[derive(Debug)]
pub struct TenantAdmission {
    enabled: bool,
    max_concurrent: u32,
    bucket: Mutex<TokenBucket>,
    semaphore: Arc<Semaphore>,
    active: AtomicU32,
    // Every acquire stacks its own permit so concurrent requests from one
    // client each hold a slot.
    in_flight: Mutex<HashMap<String, Vec<OwnedSemaphorePermit>>>,
}

impl TenantAdmission {
    #[must_use]
    pub fn new(policy: &RateLimitPolicy) -> Arc<Self> {
        Arc::new(Self {
            enabled: policy.enabled,
            max_concurrent: policy.max_concurrent,
            bucket: Mutex::new(TokenBucket::new(policy.max_tps)),
            semaphore: Arc::new(Semaphore::new(policy.max_concurrent as usize)),
            active: AtomicU32::new(0),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Try to admit one request for `client_key`.
    ///
    /// Returns a guard that releases the admission slot on drop, or `None`
    /// when the request is rate limited.
    pub async fn try_acquire(self: &Arc<Self>, client_key: &str) -> Option<AdmissionGuard> {
        if !self.enabled {
            return Some(AdmissionGuard {
                admission: Arc::clone(self),
                client_key: client_key.to_string(),
                released: false,
            });
        }

        if !self.bucket.lock().try_consume() {
            return None;
        }

        let permit =
            match tokio::time::timeout(ACQUIRE_WAIT, Arc::clone(&self.semaphore).acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                // Timed out or semaphore closed: give the token back.
                _ => {
                    self.bucket.lock().return_token();
                    return None;
                }
            };

        self.in_flight
            .lock()
            .entry(client_key.to_string())
            .or_default()
            .push(permit);
        self.active.fetch_add(1, Ordering::SeqCst);

        Some(AdmissionGuard {
            admission: Arc::clone(self),
            client_key: client_key.to_string(),
            released: false,
        })
    }

    /// Free one concurrency slot held by `client_key`. No-op when the client
    /// holds none.
    pub fn release(&self, client_key: &str) {
        if !self.enabled {
            return;
        }
        let mut in_flight = self.in_flight.lock();
        let Some(permits) = in_flight.get_mut(client_key) else {
            return;
        };
        // Dropping the permit frees the semaphore slot.
        if permits.pop().is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        if permits.is_empty() {
            in_flight.remove(client_key);
        }
    }

    /// Live gauge of concurrency usage in `[0, 1]`.
    #[must_use]
    pub fn usage_rate(&self) -> f64 {
        if !self.enabled || self.max_concurrent == 0 {
            return 0.0;
        }
        f64::from(self.active.load(Ordering::SeqCst)) / f64::from(self.max_concurrent)
    }
}

/// Releases the admission slot exactly once, on drop or explicit release.
#[derive(Debug)]
pub struct AdmissionGuard {
    admission: Arc<TenantAdmission>,
    client_key: String,
    released: bool,
}

impl AdmissionGuard {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.admission.release(&self.client_key);
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
