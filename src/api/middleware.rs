//! Security middleware for API authentication and rate limiting.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::ServerConfig;

const HEALTH_PATH: &str = "/api/v1/health";

/// Authentication, CORS and rate-limit settings for the REST surface.
#[derive(Clone, Debug, Default)]
pub struct SecurityConfig {
    /// Bearer token every request must carry. `None` disables authentication.
    pub api_key: Option<String>,
    /// Allowed CORS origins. `None` is permissive.
    pub cors_origins: Option<Vec<String>>,
    pub rate_limiter: Option<RateLimiter>,
}

impl SecurityConfig {
    /// Derive settings from the server configuration. Rate limiting is only
    /// enabled together with an API key (remote deployment mode).
    pub fn from_server(server: &ServerConfig) -> Self {
        let rate_limiter = server.api_key.as_ref().map(|_| {
            RateLimiter::new(server.rate_limit_per_minute, Duration::from_secs(60))
        });
        Self {
            api_key: server.api_key.clone(),
            cors_origins: server.cors_origins.clone(),
            rate_limiter,
        }
    }

    /// No authentication, permissive CORS, no rate limit.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn with_rate_limit(max_requests: u32) -> Self {
        Self {
            rate_limiter: Some(RateLimiter::new(max_requests, Duration::from_secs(60))),
            ..Self::default()
        }
    }

    pub fn cors_layer(&self) -> CorsLayer {
        match &self.cors_origins {
            None => CorsLayer::permissive(),
            Some(origins) => {
                let origins: Vec<HeaderValue> = origins
                    .iter()
                    .filter_map(|o| HeaderValue::from_str(o).ok())
                    .collect();
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods(tower_http::cors::Any)
                    .allow_headers(tower_http::cors::Any)
            }
        }
    }
}

/// In-memory sliding-window rate limiter keyed by client IP.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    requests: Arc<Mutex<HashMap<IpAddr, Vec<Instant>>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, Vec<Instant>>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns true if the request is allowed, false if rate limited.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut requests = self.lock();
        let entry = requests.entry(ip).or_default();

        entry.retain(|&t| now.duration_since(t) < self.window);

        if entry.len() < self.max_requests as usize {
            entry.push(now);
            true
        } else {
            false
        }
    }

    /// Drop clients with no requests inside the window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.lock().retain(|_, timestamps| {
            timestamps.retain(|&t| now.duration_since(t) < self.window);
            !timestamps.is_empty()
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }
}

pub async fn auth_middleware(
    State(config): State<SecurityConfig>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected_key = match &config.api_key {
        Some(key) => key,
        None => return Ok(next.run(request).await),
    };

    // Liveness probes stay reachable without credentials.
    if request.uri().path() == HEALTH_PATH {
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if token == expected_key => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

pub async fn rate_limit_middleware(
    State(rate_limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let ip = extract_client_ip(&request);

    if rate_limiter.check(ip) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("Rate limit exceeded for IP: {}", ip);
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

/// Client IP from proxy headers, then the peer address, then localhost when
/// the router is driven without connection info.
fn extract_client_ip(request: &Request<Body>) -> IpAddr {
    let header_ip = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok())
    };

    header_ip("X-Forwarded-For")
        .or_else(|| header_ip("X-Real-IP"))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_blocks_requests_over_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let ip: IpAddr = "192.168.1.1".parse().unwrap();

        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }

    #[test]
    fn rate_limiter_tracks_ips_independently() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let ip1: IpAddr = "192.168.1.1".parse().unwrap();
        let ip2: IpAddr = "192.168.1.2".parse().unwrap();

        assert!(limiter.check(ip1));
        assert!(!limiter.check(ip1));
        assert!(limiter.check(ip2));
    }

    #[test]
    fn cleanup_forgets_idle_clients() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));
        limiter.check("10.0.0.1".parse().unwrap());
        std::thread::sleep(Duration::from_millis(20));
        limiter.cleanup();
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn rate_limit_follows_api_key() {
        let mut server = ServerConfig::default();
        assert!(SecurityConfig::from_server(&server).rate_limiter.is_none());

        server.api_key = Some("secret".into());
        let config = SecurityConfig::from_server(&server);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert!(config.rate_limiter.is_some());
    }

    #[test]
    fn forwarded_header_wins() {
        let request = Request::builder()
            .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            extract_client_ip(&request),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn peer_address_keys_unproxied_clients() {
        let peer: SocketAddr = "198.51.100.4:52100".parse().unwrap();
        let mut request = Request::builder().body(Body::empty()).unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        assert_eq!(extract_client_ip(&request), peer.ip());

        let other: SocketAddr = "198.51.100.5:52101".parse().unwrap();
        let mut second = Request::builder().body(Body::empty()).unwrap();
        second.extensions_mut().insert(ConnectInfo(other));
        assert_ne!(extract_client_ip(&second), extract_client_ip(&request));
    }

    #[test]
    fn header_outranks_peer_address() {
        let peer: SocketAddr = "198.51.100.4:52100".parse().unwrap();
        let mut request = Request::builder()
            .header("X-Real-IP", "203.0.113.8")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        assert_eq!(
            extract_client_ip(&request),
            "203.0.113.8".parse::<IpAddr>().unwrap()
        );
    }
}
