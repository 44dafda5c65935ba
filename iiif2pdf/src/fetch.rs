//! Rate-limited, backoff-respecting HTTP fetch coordinator.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Response, StatusCode};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_MAX_RETRIES: u32 = 3;
const SAFETY_MARGIN: Duration = Duration::from_millis(100);
const IIIF_ACCEPT: &str = concat!(
    "application/ld+json;profile=\"http://iiif.io/api/presentation/3/context.json\",",
    "application/ld+json;profile=\"http://iiif.io/api/presentation/2/context.json\";q=0.8,",
    "application/json;q=0.5",
);

#[derive(Debug)]
pub enum FetchError {
    Cancelled,
    Http(reqwest::Error),
    Status { url: String, status: StatusCode },
    InvalidUrl(String),
}
impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "fetch was cancelled"),
            Self::Http(e) => write!(f, "HTTP error: {}", e),
            Self::Status { url, status } => write!(f, "{} responded with {}", url, status),
            Self::InvalidUrl(url) => write!(f, "invalid URL: {}", url),
        }
    }
}
impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            _ => None,
        }
    }
}
impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self { Self::Http(value) }
}

/// The process-wide record of which hosts are currently being rate-limited.
///
/// Presence of a host key means concurrent requests to it are serialised
/// through its mutex. Entries are created on first observation of a
/// rate-limit signal and persist for as long as the registry (owned by the
/// [`FetchCoordinator`] that created it) lives.
#[derive(Default)]
pub struct RateLimitRegistry {
    hosts: DashMap<String, Arc<Mutex<()>>>,
}
impl RateLimitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_rate_limited(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
    }

    /// Returns the host's mutex, registering it as rate-limited if it
    /// wasn't already.
    pub fn mutex_for(&self, host: &str) -> Arc<Mutex<()>> {
        self.hosts
            .entry(host.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn known_hosts(&self) -> Vec<String> {
        self.hosts.iter().map(|e| e.key().clone()).collect()
    }
}

/// Options controlling a single fetch coordinator instance.
#[derive(Clone, Debug)]
pub struct FetchOptions {
    pub max_retries: u32,
    pub user_agent: String,
    pub timeout: Duration,
}
impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: concat!("iiif2pdf/", env!("CARGO_PKG_VERSION")).to_owned(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// The outcome of a fetch: response bytes plus whether the host was
/// reachable across CORS (used by the pipeline to decide whether an image
/// can be painted directly or must be proxied).
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

pub struct FetchCoordinator {
    client: reqwest::Client,
    registry: Arc<RateLimitRegistry>,
    credentialed_hosts: RwLock<HashSet<String>>,
    options: FetchOptions,
    cancellation: CancellationToken,
}

impl FetchCoordinator {
    pub fn new(options: FetchOptions, cancellation: CancellationToken) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(options.timeout)
            .cookie_store(true)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            registry: Arc::new(RateLimitRegistry::new()),
            credentialed_hosts: RwLock::new(HashSet::new()),
            options,
            cancellation,
        }
    }

    pub fn registry(&self) -> Arc<RateLimitRegistry> {
        self.registry.clone()
    }

    /// Fetches a manifest or other IIIF JSON resource, with the
    /// content-negotiation `Accept` header spec §4.6 prescribes.
    pub async fn fetch_manifest(&self, url: &str) -> Result<FetchedBody, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(IIIF_ACCEPT));
        self.fetch_with_headers(url, headers).await
    }

    /// Fetches an arbitrary resource (image bytes, OCR XML) with no special
    /// `Accept` preference.
    pub async fn fetch(&self, url: &str) -> Result<FetchedBody, FetchError> {
        self.fetch_with_headers(url, HeaderMap::new()).await
    }

    /// Posts a JSON body and returns the response bytes, used to hand a
    /// cover-page description to an external rendering endpoint (spec §4.9
    /// step 5). Not subject to the IIIF `Accept` negotiation or the retry
    /// machinery that reads responses might need, since a cover-page
    /// renderer is not a IIIF image/OCR source.
    pub async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<FetchedBody, FetchError> {
        if self.cancellation.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let response = tokio::select! {
            result = self.client.post(url).json(body).send() => result?,
            _ = self.cancellation.cancelled() => return Err(FetchError::Cancelled),
        };
        if !response.status().is_success() {
            return Err(FetchError::Status { url: url.to_owned(), status: response.status() });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_owned());
        let bytes = response.bytes().await?.to_vec();
        Ok(FetchedBody { bytes, content_type })
    }

    /// Fetches only the byte length of a resource (via a `HEAD` request, or
    /// a `GET` with the body discarded if `HEAD` is unsupported), for size
    /// estimation.
    pub async fn fetch_content_length(&self, url: &str) -> Result<Option<u64>, FetchError> {
        let host = host_of(url)?;
        let response = self.send_with_retries(url, &host, reqwest::Method::HEAD).await?;
        Ok(response.content_length())
    }

    async fn fetch_with_headers(&self, url: &str, headers: HeaderMap) -> Result<FetchedBody, FetchError> {
        let host = host_of(url)?;
        let response = self.send_with_retries_and_headers(url, &host, reqwest::Method::GET, headers).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_owned());
        let bytes = response.bytes().await?.to_vec();
        Ok(FetchedBody { bytes, content_type })
    }

    async fn send_with_retries(&self, url: &str, host: &str, method: reqwest::Method) -> Result<Response, FetchError> {
        self.send_with_retries_and_headers(url, host, method, HeaderMap::new()).await
    }

    async fn send_with_retries_and_headers(
        &self,
        url: &str,
        host: &str,
        method: reqwest::Method,
        headers: HeaderMap,
    ) -> Result<Response, FetchError> {
        if self.cancellation.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let rate_limited = self.registry.is_rate_limited(host);
        let host_mutex = if rate_limited { Some(self.registry.mutex_for(host)) } else { None };
        let _guard = if let Some(m) = &host_mutex {
            Some(tokio::select! {
                guard = m.lock() => guard,
                _ = self.cancellation.cancelled() => return Err(FetchError::Cancelled),
            })
        } else {
            None
        };

        let result = self.attempt_with_retries(url, host, method, headers).await;

        if rate_limited {
            tokio::select! {
                _ = tokio::time::sleep(SAFETY_MARGIN) => {},
                _ = self.cancellation.cancelled() => {},
            }
        }

        result
    }

    async fn attempt_with_retries(
        &self,
        url: &str,
        host: &str,
        method: reqwest::Method,
        headers: HeaderMap,
    ) -> Result<Response, FetchError> {
        let mut previous_wait: Option<Duration> = None;
        let mut attempt = 0;
        let mut used_credentials = self.credentialed_hosts.read().await.contains(host);

        loop {
            if self.cancellation.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            // cookie_store(true) on the client already carries credentials
            // across requests once a host sets them; `used_credentials` only
            // tracks whether we've seen a 401/403 here to avoid retrying the
            // same request forever.
            let request = self.client.request(method.clone(), url).headers(headers.clone());

            let send_result = tokio::select! {
                result = request.send() => result,
                _ = self.cancellation.cancelled() => return Err(FetchError::Cancelled),
            };

            let response = match send_result {
                Ok(r) => r,
                Err(e) => {
                    attempt += 1;
                    if attempt > self.options.max_retries {
                        return Err(FetchError::Http(e));
                    }
                    let wait = exponential_backoff(previous_wait);
                    previous_wait = Some(wait);
                    warn!(url, attempt, "fetch failed, retrying: {}", e);
                    self.sleep_cancellable(wait).await?;
                    continue;
                },
            };

            if (response.status() == StatusCode::UNAUTHORIZED || response.status() == StatusCode::FORBIDDEN)
                && !used_credentials
            {
                used_credentials = true;
                self.credentialed_hosts.write().await.insert(host.to_owned());
                debug!(url, "retrying with credentials after {}", response.status());
                continue;
            }

            if response.status().is_success() {
                return Ok(response);
            }

            attempt += 1;
            if attempt > self.options.max_retries {
                return Err(FetchError::Status { url: url.to_owned(), status: response.status() });
            }

            let wait = self.wait_for_retry(host, &response, previous_wait);
            previous_wait = Some(wait);
            self.sleep_cancellable(wait).await?;
        }
    }

    fn wait_for_retry(&self, host: &str, response: &Response, previous_wait: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after_wait(response) {
            return wait;
        }
        if let Some(wait) = rate_limit_header_wait(response) {
            self.registry.mutex_for(host);
            return wait;
        }
        exponential_backoff(previous_wait)
    }

    async fn sleep_cancellable(&self, wait: Duration) -> Result<(), FetchError> {
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = self.cancellation.cancelled() => Err(FetchError::Cancelled),
        }
    }
}

fn host_of(url: &str) -> Result<String, FetchError> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_owned()))
        .ok_or_else(|| FetchError::InvalidUrl(url.to_owned()))
}

fn exponential_backoff(previous_wait: Option<Duration>) -> Duration {
    let base = previous_wait.unwrap_or(Duration::from_millis(250));
    let doubled = base.saturating_mul(2).min(Duration::from_secs(60));
    let multiplier: f64 = rand::thread_rng().gen_range(0.5..1.5);
    doubled.mul_f64(multiplier)
}

fn retry_after_wait(response: &Response) -> Option<Duration> {
    let value = response.headers().get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs) + SAFETY_MARGIN);
    }
    parse_http_date(value).map(|when| {
        let wait = (when - chrono::Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        wait + SAFETY_MARGIN
    })
}

/// Reads the IETF draft `RateLimit-*` headers (and the `x-` / `rate-limit`
/// spelling variants) and derives a wait duration per spec §4.6.
///
/// `secsPerQuota` is the time one unit of quota represents if `limit`
/// requests were spread evenly across the `reset` window. With quota still
/// remaining, wait long enough for `2·remaining` such units to elapse
/// before trying again; with none remaining, there is nothing left to
/// extrapolate from, so wait out the whole reset window instead (spec §8
/// scenario 5: `limit=60, remaining=0, reset=30` waits ~30s, not 0.5s).
fn rate_limit_header_wait(response: &Response) -> Option<Duration> {
    let headers = response.headers();
    let limit = first_header_u64(headers, &["ratelimit-limit", "x-ratelimit-limit", "x-rate-limit-limit"])?;
    let remaining = first_header_u64(headers, &["ratelimit-remaining", "x-ratelimit-remaining", "x-rate-limit-remaining"])?;
    let reset = first_header_u64(headers, &["ratelimit-reset", "x-ratelimit-reset", "x-rate-limit-reset"])?;

    if limit <= remaining {
        return Some(SAFETY_MARGIN);
    }
    let wait_secs = if remaining > 0 {
        let secs_per_quota = reset as f64 / limit as f64;
        2.0 * remaining as f64 * secs_per_quota
    } else {
        reset as f64
    };
    Some(Duration::from_secs_f64(wait_secs.max(0.0)) + SAFETY_MARGIN)
}

fn first_header_u64(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
    for name in names {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            if let Ok(n) = value.parse::<u64>() {
                return Some(n);
            }
        }
    }
    None
}

/// Parses an HTTP-date `Retry-After` value. Accepts the RFC 7231
/// `IMF-fixdate` form (`Sun, 06 Nov 1994 08:49:37 GMT`) that every
/// real-world server emits; the obsolete RFC 850 and asctime forms are not
/// supported since no IIIF server is known to send them.
fn parse_http_date(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, "%a, %d %b %Y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_starts_empty_and_records_hosts() {
        let registry = RateLimitRegistry::new();
        assert!(!registry.is_rate_limited("example.org"));
        registry.mutex_for("example.org");
        assert!(registry.is_rate_limited("example.org"));
    }

    #[test]
    fn host_of_extracts_authority() {
        assert_eq!(host_of("https://iiif.example.org/manifest.json").unwrap(), "iiif.example.org");
        assert!(host_of("not a url").is_err());
    }

    fn response_with_headers(pairs: &[(&str, &str)]) -> Response {
        let mut builder = http::Response::builder().status(429);
        for (name, value) in pairs {
            builder = builder.header(*name, *value);
        }
        Response::from(builder.body(String::new()).unwrap())
    }

    /// Spec §8 scenario 5: `Limit: 60, Remaining: 0, Reset: 30` must wait
    /// ~30.1s before the next attempt, not `reset / limit` (0.5s) — with
    /// no quota left, there is nothing to extrapolate a per-unit rate from.
    #[test]
    fn zero_remaining_waits_out_the_full_reset_window() {
        let response = response_with_headers(&[
            ("ratelimit-limit", "60"),
            ("ratelimit-remaining", "0"),
            ("ratelimit-reset", "30"),
        ]);
        let wait = rate_limit_header_wait(&response).unwrap();
        assert!(wait >= Duration::from_secs_f64(30.1), "expected >= 30.1s, got {:?}", wait);
        assert!(wait < Duration::from_secs_f64(30.2), "expected close to 30.1s, got {:?}", wait);
    }

    #[test]
    fn nonzero_remaining_scales_wait_by_quota_fraction() {
        let response = response_with_headers(&[
            ("x-ratelimit-limit", "60"),
            ("x-ratelimit-remaining", "10"),
            ("x-ratelimit-reset", "30"),
        ]);
        // secsPerQuota = 30 / 60 = 0.5; wait = 2 * 10 * 0.5 = 10s, plus margin.
        let wait = rate_limit_header_wait(&response).unwrap();
        assert!(wait >= Duration::from_secs_f64(10.1) && wait < Duration::from_secs_f64(10.2));
    }

    #[test]
    fn remaining_at_or_above_limit_only_waits_the_safety_margin() {
        let response = response_with_headers(&[
            ("ratelimit-limit", "60"),
            ("ratelimit-remaining", "60"),
            ("ratelimit-reset", "30"),
        ]);
        assert_eq!(rate_limit_header_wait(&response).unwrap(), SAFETY_MARGIN);
    }
}
