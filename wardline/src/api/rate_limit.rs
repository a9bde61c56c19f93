//! Per-address request limits for the protected API

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::context::AppContext;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One limiter per client address, each allowing `max_requests` per window
pub struct RateLimits {
    quota: Quota,
    max_requests: u32,
    limiters: DashMap<IpAddr, Arc<DirectRateLimiter>>,
}

impl RateLimits {
    /// The full allowance is usable at once and refills evenly over `window`
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(max_requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            quota,
            max_requests: burst.get(),
            limiters: DashMap::new(),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Take one request from `client`'s allowance, or report how long until
    /// the next one is available
    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        let limiter = self
            .limiters
            .entry(client)
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
            .value()
            .clone();

        limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }
}

/// Reject requests over the caller's allowance with 429
pub async fn rate_limit_middleware(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(&request);

    match ctx.rate_limits.check(client) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            let retry_after = wait.as_secs().max(1);
            warn!(client = %client, retry_after = retry_after, "Rate limit exceeded");

            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "success": false,
                    "error": "Too many requests from this IP, please try again later.",
                })),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("retry-after"), value);
            }
            response
        }
    }
}

/// First `X-Forwarded-For` hop, else the peer address
fn client_ip(request: &Request) -> IpAddr {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|list| list.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());

    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
