// Per-user rate limiting shared by all report endpoints

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ThrottleRate;
use crate::models::{AppState, Requester};
use crate::types::AppError;

pub struct UserThrottle {
    limiter: DefaultKeyedRateLimiter<i64>,
    clock: DefaultClock,
}

impl UserThrottle {
    pub fn new(rate: &ThrottleRate) -> Self {
        let burst = NonZeroU32::new(rate.num_requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(rate.period / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);
        Self { limiter: RateLimiter::keyed(quota), clock: DefaultClock::default() }
    }

    /// `Err` carries how long the user has to wait.
    pub fn check(&self, user_id: i64) -> Result<(), Duration> {
        self.limiter
            .check_key(&user_id)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Users currently tracked by the limiter.
    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }

    /// Forget users whose quota has fully replenished.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Prune on a fixed interval for the life of the process.
    pub fn spawn_pruner(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let throttle = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                throttle.prune();
                debug!(tracked_users = throttle.len(), "Throttle state pruned");
            }
        })
    }
}

fn whole_seconds(wait: Duration) -> u64 {
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}

pub async fn throttle(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    if let Some(requester) = req.extensions().get::<Requester>() {
        if let Err(wait) = state.throttle.check(requester.user_id) {
            let wait_secs = whole_seconds(wait);
            warn!(user = %requester.username, wait_secs, "Request throttled");
            return Err(AppError::Throttled { wait_secs });
        }
    }
    Ok(next.run(req).await)
}
