use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use tracing::warn;

use crate::error::AppError;

/// Process-wide request budget for the API
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimitLayer {
    pub fn per_minute(requests: u32) -> Self {
        let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(burst))),
        }
    }

    pub fn check(&self) -> Result<(), AppError> {
        self.limiter.check().map_err(|_| AppError::RateLimited)
    }
}

pub async fn rate_limit_middleware(
    State(limit): State<RateLimitLayer>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Err(e) = limit.check() {
        warn!("⚠️ Rate limit exceeded for {} {}", req.method(), req.uri().path());
        return Err(e);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_enforced() {
        let limit = RateLimitLayer::per_minute(2);

        assert!(limit.check().is_ok());
        assert!(limit.check().is_ok());
        assert!(matches!(limit.check(), Err(AppError::RateLimited)));
    }

    #[test]
    fn test_zero_budget_still_admits_one() {
        let limit = RateLimitLayer::per_minute(0);
        assert!(limit.check().is_ok());
    }
}
