//! HTTP client for the remote API
//!
//! Thin wrapper over `reqwest` that classifies every response into an [`ApiResult`]
//! and extracts the quota headers the throttle feeds on.

use crate::Result;
use chrono::{DateTime, Utc};
use core::time::Duration;
use ohno::IntoAppError;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK, RETRY_AFTER};
use serde::de::DeserializeOwned;
use url::Url;

/// Retries after a network error or a 5xx response, on top of the first request.
pub const DEFAULT_TRANSIENT_RETRIES: u32 = 3;

/// Delay before the first transient retry; it doubles with every further retry.
pub const DEFAULT_TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The quota bucket shared by every endpoint the harvester uses, except search.
const CORE_RESOURCE: &str = "core";

/// Snapshot of the `core` quota bucket, from response headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Result of a remote API call
#[derive(Debug)]
pub enum ApiResult<T> {
    /// Request succeeded - contains data and optional rate limit info
    Success(T, Option<RateLimitInfo>),

    /// The remote rejected the call because the quota is exhausted, with the `core`
    /// snapshot when the rejection reported one
    RateLimited(Option<RateLimitInfo>),

    /// The requested resource was not found (404)
    NotFound(Option<RateLimitInfo>),

    /// Request failed for a reason other than quota exhaustion
    Failed(ohno::AppError, Option<RateLimitInfo>),
}

impl<T> ApiResult<T> {
    /// The quota snapshot observed with this result, if any.
    #[must_use]
    pub const fn rate_limit(&self) -> Option<RateLimitInfo> {
        match self {
            Self::Success(_, rate_limit)
            | Self::RateLimited(rate_limit)
            | Self::NotFound(rate_limit)
            | Self::Failed(_, rate_limit) => *rate_limit,
        }
    }

    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// Transform the success payload, keeping every other variant as is.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResult<U> {
        match self {
            Self::Success(data, rate_limit) => ApiResult::Success(f(data), rate_limit),
            Self::RateLimited(rate_limit) => ApiResult::RateLimited(rate_limit),
            Self::NotFound(rate_limit) => ApiResult::NotFound(rate_limit),
            Self::Failed(e, rate_limit) => ApiResult::Failed(e, rate_limit),
        }
    }
}

/// Unwrap an `ApiResult::Success` or return the other variants from the enclosing function
macro_rules! unwrap_or_return {
    ($expr:expr) => {
        match $expr {
            ApiResult::Success(data, rate_limit) => (data, rate_limit),
            ApiResult::RateLimited(rate_limit) => return ApiResult::RateLimited(rate_limit),
            ApiResult::NotFound(rate_limit) => return ApiResult::NotFound(rate_limit),
            ApiResult::Failed(e, rate_limit) => return ApiResult::Failed(e, rate_limit),
        }
    };
}

pub(crate) use unwrap_or_return;

/// A successful response body along with its pagination links.
#[derive(Debug)]
pub struct Fetched<T> {
    pub body: T,
    pub has_next: bool,
    pub last_page: Option<u32>,
}

/// Remote API client
#[derive(Debug, Clone)]
#[expect(clippy::struct_field_names, reason = "client field stores the underlying HTTP client")]
pub struct Client {
    client: reqwest::Client,
    base_url: String,
    transient_retries: u32,
    transient_retry_delay: Duration,
}

impl Client {
    /// Create a new client authenticating with `token` against `base_url`
    pub fn new(token: &str, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut auth_val = HeaderValue::from_str(&format!("token {token}")).into_app_err("building authorization header")?;
        auth_val.set_sensitive(true);

        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, auth_val);
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        let client = reqwest::Client::builder()
            .user_agent("review-harvest")
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .into_app_err("building HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transient_retries: DEFAULT_TRANSIENT_RETRIES,
            transient_retry_delay: DEFAULT_TRANSIENT_RETRY_DELAY,
        })
    }

    /// Repeat requests that fail at the network level or with a 5xx status up to `retries`
    /// times, waiting `base_delay` before the first retry and doubling the wait each time.
    ///
    /// Quota rejections are never repeated here; they surface as [`ApiResult::RateLimited`].
    #[must_use]
    pub const fn with_transient_retries(mut self, retries: u32, base_delay: Duration) -> Self {
        self.transient_retries = retries;
        self.transient_retry_delay = base_delay;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a URL for `path` (relative to the base URL) with the given query parameters.
    pub fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .into_app_err_with(|| format!("building URL for '{path}'"))?;
        if !query.is_empty() {
            let _ = url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// GET `url`, classify the response, and decode its JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ApiResult<Fetched<T>> {
        let (resp, rate_limit) = unwrap_or_return!(self.api_call(url).await);

        let link = resp.headers().get(LINK).and_then(|h| h.to_str().ok()).map(str::to_owned);
        let has_next = link.as_deref().is_some_and(|l| link_target(l, "next").is_some());
        let last_page = link.as_deref().and_then(|l| link_target(l, "last")).and_then(|u| page_param(&u));

        match resp.json::<T>().await {
            Ok(body) => ApiResult::Success(Fetched { body, has_next, last_page }, rate_limit),
            Err(e) => ApiResult::Failed(e.into(), rate_limit),
        }
    }

    /// Make an API call and classify the result
    pub async fn api_call(&self, url: Url) -> ApiResult<reqwest::Response> {
        log::trace!(target: super::LOG_TARGET, "GET {url}");

        let resp = match self.send_with_retry(url).await {
            Ok(r) => r,
            Err(e) => return ApiResult::Failed(e.into(), None),
        };

        // Extract rate limit info from response headers before checking status
        let rate_limit = extract_rate_limit_from_headers(resp.headers());
        let status = resp.status();

        if status.is_success() {
            return ApiResult::Success(resp, rate_limit);
        }

        if is_quota_rejection(status, resp.headers()) {
            return ApiResult::RateLimited(rate_limit);
        }

        if status == StatusCode::NOT_FOUND {
            return ApiResult::NotFound(rate_limit);
        }

        match resp.error_for_status() {
            Ok(resp) => ApiResult::Failed(ohno::app_err!("unexpected HTTP status {}", resp.status()), rate_limit),
            Err(e) => ApiResult::Failed(e.into(), rate_limit),
        }
    }

    async fn send_with_retry(&self, url: Url) -> reqwest::Result<reqwest::Response> {
        let mut delay = self.transient_retry_delay;

        for retry in 1..=self.transient_retries {
            let result = self.client.get(url.clone()).send().await;
            let reason = match &result {
                Err(e) if !e.is_builder() => format!("{e}"),
                Ok(resp) if resp.status().is_server_error() => format!("HTTP status {}", resp.status()),
                _ => return result,
            };

            log::debug!(
                target: super::LOG_TARGET,
                "GET {url} failed with {reason}, retrying in {}ms (retry {retry}/{})",
                delay.as_millis(),
                self.transient_retries
            );
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }

        self.client.get(url).send().await
    }
}

/// Whether a failed response means the quota is exhausted, as opposed to a permission problem.
fn is_quota_rejection(status: StatusCode, headers: &HeaderMap) -> bool {
    match status {
        StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::FORBIDDEN => remaining_from_headers(headers) == Some(0) || headers.contains_key(RETRY_AFTER),
        _ => false,
    }
}

fn remaining_from_headers(headers: &HeaderMap) -> Option<u32> {
    headers.get("x-ratelimit-remaining")?.to_str().ok()?.parse::<u32>().ok()
}

/// Extract the `core` quota snapshot from API response headers
///
/// Responses metered against another bucket (search answers with its own small,
/// fast-resetting quota) yield nothing. A missing resource header means `core`.
fn extract_rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let resource = headers.get("x-ratelimit-resource").and_then(|h| h.to_str().ok());
    if resource.is_some_and(|r| r != CORE_RESOURCE) {
        return None;
    }

    let remaining = remaining_from_headers(headers)?;
    let reset_timestamp = headers.get("x-ratelimit-reset")?.to_str().ok()?.parse::<i64>().ok()?;
    let reset_at = DateTime::from_timestamp(reset_timestamp, 0)?;

    Some(RateLimitInfo { remaining, reset_at })
}

/// Find the URL tagged with `rel` in an RFC 8288 `Link` header.
fn link_target(link: &str, rel: &str) -> Option<Url> {
    let wanted = format!(r#"rel="{rel}""#);
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == wanted) {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

fn page_param(url: &Url) -> Option<u32> {
    url.query_pairs().find(|(k, _)| k == "page").and_then(|(_, v)| v.parse().ok())
}
