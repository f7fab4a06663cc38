//! Transport-agnostic request guard.
//!
//! A [`RateGuard`] turns a limiter decision into transport signals through a
//! narrow [`Responder`] capability: three rate-limit headers on every guarded
//! request, plus a rejection when the request is blocked. Framework adapters
//! implement `Responder` for their response type and act on the returned
//! [`Verdict`].
//!
//! The guard fails open. If the backend returns an error the request
//! proceeds untouched and the error is logged.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RateGuardError, Result};
use crate::ratelimit::{Algorithm, Limiter, RateLimitPolicy, RateLimiterBackend, RateLimitResult};
use crate::store::MemoryStore;

/// Header carrying the policy maximum.
pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
/// Header carrying the remaining requests in the window.
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
/// Header carrying the reset time in epoch seconds.
pub const RESET_HEADER: &str = "X-RateLimit-Reset";

pub const DEFAULT_STATUS_CODE: u16 = 429;
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Options accepted when building a guard.
///
/// Window and maximum are signed so that values straight from configuration
/// can be validated rather than silently wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateGuardOptions {
    /// Window length in milliseconds, must be positive
    pub window_ms: i64,
    /// Requests admitted per window, must be zero or greater
    pub max: i64,
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Status used when rejecting
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    /// Body used when rejecting
    #[serde(default = "default_message")]
    pub message: String,
}

fn default_status_code() -> u16 {
    DEFAULT_STATUS_CODE
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

impl RateGuardOptions {
    /// Fixed-window options with the default rejection status and message.
    pub fn new(window_ms: i64, max: i64) -> Self {
        Self {
            window_ms,
            max,
            algorithm: Algorithm::default(),
            status_code: DEFAULT_STATUS_CODE,
            message: DEFAULT_MESSAGE.to_string(),
        }
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Validate the options into a policy.
    pub fn policy(&self) -> Result<RateLimitPolicy> {
        RateLimitPolicy::new(self.window_ms, self.max, self.algorithm)
    }
}

/// What the guard needs from a transport response.
pub trait Responder {
    /// Set a response header.
    fn set_header(&mut self, name: &'static str, value: String);

    /// Terminate the request with `status` and `message`.
    fn reject(&mut self, status: u16, message: &str);
}

/// Derives the rate-limit key from a request.
pub trait KeyExtractor<Req: ?Sized>: Send + Sync {
    fn extract(&self, request: &Req) -> String;
}

impl<Req: ?Sized, F> KeyExtractor<Req> for F
where
    F: Fn(&Req) -> String + Send + Sync,
{
    fn extract(&self, request: &Req) -> String {
        self(request)
    }
}

/// Key used when a request carries no client address at all.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Client addressing a request exposes to the [`DefaultKeyExtractor`].
pub trait ClientInfo {
    /// Client address as resolved by the transport, if any.
    fn ip(&self) -> Option<String>;

    /// Value of a request header, if present.
    fn header(&self, name: &str) -> Option<String>;

    /// Address of the peer socket, if known.
    fn remote_addr(&self) -> Option<String>;
}

/// Keys requests by client address.
///
/// Tries the resolved client IP, then the first hop of `X-Forwarded-For`,
/// then the peer socket address, and falls back to [`UNKNOWN_CLIENT`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyExtractor;

impl<Req: ClientInfo + ?Sized> KeyExtractor<Req> for DefaultKeyExtractor {
    fn extract(&self, request: &Req) -> String {
        let forwarded = || {
            request.header("x-forwarded-for").and_then(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .find(|hop| !hop.is_empty())
                    .map(str::to_string)
            })
        };

        request
            .ip()
            .filter(|ip| !ip.is_empty())
            .or_else(forwarded)
            .or_else(|| request.remote_addr().filter(|addr| !addr.is_empty()))
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

/// Outcome of guarding one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Continue handling the request
    Proceed,
    /// The responder has been told to reject the request
    Rejected,
}

/// Applies a rate policy to requests on behalf of a transport adapter.
pub struct RateGuard<B> {
    backend: B,
    policy: RateLimitPolicy,
    status_code: u16,
    message: String,
}

impl<B: RateLimiterBackend> RateGuard<B> {
    /// Build a guard, validating `options` up front.
    ///
    /// Invalid options fail here with [`RateGuardError::Config`], never per
    /// request.
    pub fn new(options: RateGuardOptions, backend: B) -> Result<Self> {
        let policy = options.policy()?;

        if !(100..=599).contains(&options.status_code) {
            return Err(RateGuardError::Config(format!(
                "status_code must be a valid HTTP status, got {}",
                options.status_code
            )));
        }

        Ok(Self {
            backend,
            policy,
            status_code: options.status_code,
            message: options.message,
        })
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// The engine behind this guard.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Guard one request identified by `key`.
    pub async fn guard<R>(&self, key: &str, responder: &mut R) -> Verdict
    where
        R: Responder + ?Sized,
    {
        let result = match self.backend.check(key, &self.policy).await {
            Ok(result) => result,
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit check failed, allowing request");
                return Verdict::Proceed;
            }
        };

        write_headers(&result, responder);

        if result.blocked {
            debug!(key = %key, status = self.status_code, "Rejecting request");
            responder.reject(self.status_code, &self.message);
            return Verdict::Rejected;
        }

        Verdict::Proceed
    }

    /// Extract the key from `request`, then guard it.
    pub async fn guard_request<Req, E, R>(
        &self,
        request: &Req,
        extractor: &E,
        responder: &mut R,
    ) -> Verdict
    where
        Req: ?Sized,
        E: KeyExtractor<Req> + ?Sized,
        R: Responder + ?Sized,
    {
        let key = extractor.extract(request);
        self.guard(&key, responder).await
    }
}

impl RateGuard<Limiter<MemoryStore>> {
    /// Build a guard over a fresh in-memory store with the default sweep.
    pub fn with_memory_store(options: RateGuardOptions) -> Result<Self> {
        Self::new(options, Limiter::new(MemoryStore::new()))
    }
}

fn write_headers<R: Responder + ?Sized>(result: &RateLimitResult, responder: &mut R) {
    responder.set_header(LIMIT_HEADER, result.limit.to_string());
    responder.set_header(REMAINING_HEADER, result.remaining.to_string());
    responder.set_header(RESET_HEADER, result.reset_time_secs().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingResponder {
        headers: HashMap<&'static str, String>,
        rejected: Option<(u16, String)>,
    }

    impl Responder for RecordingResponder {
        fn set_header(&mut self, name: &'static str, value: String) {
            self.headers.insert(name, value);
        }

        fn reject(&mut self, status: u16, message: &str) {
            self.rejected = Some((status, message.to_string()));
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl RateLimiterBackend for BrokenBackend {
        async fn check(&self, _key: &str, _policy: &RateLimitPolicy) -> Result<RateLimitResult> {
            Err(RateGuardError::store(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "store offline",
            )))
        }
    }

    struct Request {
        ip: &'static str,
    }

    #[derive(Default)]
    struct ClientRequest {
        ip: Option<&'static str>,
        headers: HashMap<&'static str, &'static str>,
        peer: Option<&'static str>,
    }

    impl ClientInfo for ClientRequest {
        fn ip(&self) -> Option<String> {
            self.ip.map(str::to_string)
        }

        fn header(&self, name: &str) -> Option<String> {
            self.headers.get(name).map(|v| v.to_string())
        }

        fn remote_addr(&self) -> Option<String> {
            self.peer.map(str::to_string)
        }
    }

    #[tokio::test]
    async fn test_guard_sets_headers_and_rejects() {
        let guard = RateGuard::with_memory_store(RateGuardOptions::new(1000, 1)).unwrap();

        let mut first = RecordingResponder::default();
        assert_eq!(guard.guard("127.0.0.1", &mut first).await, Verdict::Proceed);
        assert_eq!(first.headers[LIMIT_HEADER], "1");
        assert_eq!(first.headers[REMAINING_HEADER], "0");
        assert!(first.headers.contains_key(RESET_HEADER));
        assert!(first.rejected.is_none());

        let mut second = RecordingResponder::default();
        assert_eq!(guard.guard("127.0.0.1", &mut second).await, Verdict::Rejected);
        assert_eq!(second.rejected, Some((429, DEFAULT_MESSAGE.to_string())));
        assert_eq!(second.headers[REMAINING_HEADER], "0");
    }

    #[tokio::test]
    async fn test_custom_status_and_message() {
        let options = RateGuardOptions::new(1000, 0)
            .algorithm(Algorithm::Sliding)
            .status_code(503)
            .message("slow down");
        let guard = RateGuard::with_memory_store(options).unwrap();

        let mut responder = RecordingResponder::default();
        assert_eq!(guard.guard("k", &mut responder).await, Verdict::Rejected);
        assert_eq!(responder.rejected, Some((503, "slow down".to_string())));
    }

    #[tokio::test]
    async fn test_fail_open_on_backend_error() {
        let guard = RateGuard::new(RateGuardOptions::new(1000, 0), BrokenBackend).unwrap();

        let mut responder = RecordingResponder::default();
        assert_eq!(guard.guard("k", &mut responder).await, Verdict::Proceed);
        assert!(responder.headers.is_empty());
        assert!(responder.rejected.is_none());
    }

    #[tokio::test]
    async fn test_guard_request_uses_extractor() {
        let guard = RateGuard::with_memory_store(RateGuardOptions::new(1000, 1)).unwrap();
        let by_ip = |req: &Request| req.ip.to_string();

        let mut responder = RecordingResponder::default();
        let a = Request { ip: "10.0.0.1" };
        let b = Request { ip: "10.0.0.2" };

        assert_eq!(guard.guard_request(&a, &by_ip, &mut responder).await, Verdict::Proceed);
        assert_eq!(guard.guard_request(&b, &by_ip, &mut responder).await, Verdict::Proceed);
        assert_eq!(guard.guard_request(&a, &by_ip, &mut responder).await, Verdict::Rejected);
    }

    #[test]
    fn test_default_key_prefers_client_ip() {
        let request = ClientRequest {
            ip: Some("203.0.113.7"),
            headers: HashMap::from([("x-forwarded-for", "198.51.100.1")]),
            peer: Some("10.0.0.1:5000"),
        };
        assert_eq!(DefaultKeyExtractor.extract(&request), "203.0.113.7");
    }

    #[test]
    fn test_default_key_falls_back_to_forwarded_for() {
        let request = ClientRequest {
            ip: Some(""),
            headers: HashMap::from([("x-forwarded-for", " 198.51.100.1, 10.1.1.1")]),
            peer: Some("10.0.0.1:5000"),
        };
        assert_eq!(DefaultKeyExtractor.extract(&request), "198.51.100.1");
    }

    #[test]
    fn test_default_key_falls_back_to_remote_addr() {
        let request = ClientRequest {
            peer: Some("10.0.0.1:5000"),
            ..Default::default()
        };
        assert_eq!(DefaultKeyExtractor.extract(&request), "10.0.0.1:5000");
    }

    #[test]
    fn test_default_key_unknown_client() {
        let request = ClientRequest {
            headers: HashMap::from([("x-forwarded-for", " , ")]),
            ..Default::default()
        };
        assert_eq!(DefaultKeyExtractor.extract(&request), UNKNOWN_CLIENT);
    }

    #[tokio::test]
    async fn test_guard_request_with_default_extractor() {
        let guard = RateGuard::with_memory_store(RateGuardOptions::new(1000, 1)).unwrap();
        let request = ClientRequest::default();

        let mut responder = RecordingResponder::default();
        assert_eq!(
            guard.guard_request(&request, &DefaultKeyExtractor, &mut responder).await,
            Verdict::Proceed
        );
        // requests without any address share the "unknown" bucket
        assert_eq!(
            guard.guard_request(&ClientRequest::default(), &DefaultKeyExtractor, &mut responder).await,
            Verdict::Rejected
        );
    }

    #[tokio::test]
    async fn test_invalid_options_fail_at_setup() {
        for options in [
            RateGuardOptions::new(-1, 10),
            RateGuardOptions::new(0, 10),
            RateGuardOptions::new(1000, -1),
            RateGuardOptions::new(1000, 10).status_code(42),
        ] {
            let err = RateGuard::new(options, BrokenBackend).err().unwrap();
            assert!(err.is_config());
        }
    }

    #[test]
    fn test_options_defaults_from_yaml() {
        let options: RateGuardOptions = serde_yaml::from_str("window_ms: 1000\nmax: 5\n").unwrap();
        assert_eq!(options, RateGuardOptions::new(1000, 5));
    }
}
