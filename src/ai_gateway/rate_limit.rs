//! Per-(provider, model) token-bucket rate limiting.
//!
//! Each distinct provider/model pair gets its own bucket sized from
//! `PipelineConfig::rate_limit`, so a burst against one model never starves
//! another model sharing the same provider.

use crate::utils::config::RateLimitConfig;
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

type Limiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

pub struct RateLimiterRegistry {
    config: RateLimitConfig,
    limiters: Mutex<HashMap<String, Arc<Limiter>>>,
}

impl RateLimiterRegistry {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, limiters: Mutex::new(HashMap::new()) }
    }

    fn limiter_for(&self, provider: &str) -> Arc<Limiter> {
        let mut limiters = self.limiters.lock();
        if let Some(existing) = limiters.get(provider) {
            return existing.clone();
        }
        let rpm = self.config.for_provider(provider).max(1);
        let quota = Quota::per_minute(NonZeroU32::new(rpm).unwrap());
        let limiter = Arc::new(RateLimiter::direct(quota));
        limiters.insert(provider.to_string(), limiter.clone());
        limiter
    }

    /// Blocks (cooperatively) until a slot for `provider` is available.
    pub async fn acquire(&self, provider: &str) {
        let limiter = self.limiter_for(provider);
        limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn distinct_providers_get_independent_buckets() {
        let mut rpm = HashMap::new();
        rpm.insert("openai".to_string(), 1000);
        let config = RateLimitConfig { requests_per_minute: rpm, default_requests_per_minute: 60 };
        let registry = RateLimiterRegistry::new(config);
        registry.acquire("openai").await;
        registry.acquire("ollama").await;
        assert_eq!(registry.limiters.lock().len(), 2);
    }
}
