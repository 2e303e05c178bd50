use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use tracing::{debug, instrument};

use crate::cache::TtlCache;
use crate::error::{WrapError, WrapResult};
use crate::models::{BenchmarkSelector, HistogramEnvelope, ProfileEnvelope, RawProfile, SpeedHistogram};

/// Upstream profile service.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// `credential` is forwarded verbatim. Absent profiles surface as
    /// `ProfileNotFound`, everything else as `UpstreamUnavailable`.
    async fn fetch_profile(&self, username: &str, credential: Option<&str>)
        -> WrapResult<RawProfile>;
}

/// Upstream speed-distribution service.
#[async_trait]
pub trait HistogramSource: Send + Sync {
    async fn fetch_histogram(&self, selector: BenchmarkSelector) -> WrapResult<SpeedHistogram>;
}

/// HTTP client for the public typing-site API.
pub struct MonkeytypeClient {
    base_url: Url,
    client: reqwest::Client,
}

impl MonkeytypeClient {
    pub fn new(base_url: &str, timeout: Duration) -> WrapResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| WrapError::InvalidConfig(format!("invalid upstream url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(WrapError::InvalidConfig(format!(
                "upstream url cannot be a base: {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WrapError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self { base_url, client })
    }

    fn endpoint(&self, segments: &[&str]) -> WrapResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| WrapError::InvalidConfig("upstream url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn headers(credential: Option<&str>) -> WrapResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = credential {
            let value = HeaderValue::from_str(&format!("ApeKey {key}")).map_err(|_| {
                WrapError::InputInvalid("credential contains invalid header characters".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

/// Maps a non-success profile status onto the caller-visible taxonomy.
pub fn classify_profile_status(status: StatusCode, username: &str) -> Option<WrapError> {
    if status.is_success() {
        None
    } else if status == StatusCode::NOT_FOUND {
        Some(WrapError::ProfileNotFound {
            username: username.to_string(),
        })
    } else {
        Some(WrapError::UpstreamUnavailable(format!(
            "profile service returned {status}"
        )))
    }
}

#[async_trait]
impl ProfileSource for MonkeytypeClient {
    #[instrument(name = "upstream_fetch_profile", skip(self, credential), fields(authenticated = credential.is_some()))]
    async fn fetch_profile(
        &self,
        username: &str,
        credential: Option<&str>,
    ) -> WrapResult<RawProfile> {
        let url = self.endpoint(&["users", username, "profile"])?;
        let resp = self
            .client
            .get(url)
            .headers(Self::headers(credential)?)
            .send()
            .await
            .map_err(|e| WrapError::UpstreamUnavailable(format!("profile request failed: {e}")))?;

        if let Some(err) = classify_profile_status(resp.status(), username) {
            return Err(err);
        }

        let envelope: ProfileEnvelope = resp
            .json()
            .await
            .map_err(|e| WrapError::UpstreamUnavailable(format!("profile decode failed: {e}")))?;
        envelope.data.ok_or_else(|| WrapError::ProfileNotFound {
            username: username.to_string(),
        })
    }
}

#[async_trait]
impl HistogramSource for MonkeytypeClient {
    #[instrument(name = "upstream_fetch_histogram", skip(self, selector), fields(selector = %selector.cache_key()))]
    async fn fetch_histogram(&self, selector: BenchmarkSelector) -> WrapResult<SpeedHistogram> {
        let mut url = self.endpoint(&["public", "speedHistogram"])?;
        url.query_pairs_mut()
            .append_pair("language", selector.language)
            .append_pair("mode", selector.mode)
            .append_pair("mode2", selector.mode2);

        let resp = self
            .client
            .get(url)
            .headers(Self::headers(None)?)
            .send()
            .await
            .map_err(|e| WrapError::UpstreamUnavailable(format!("histogram request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(WrapError::UpstreamUnavailable(format!(
                "histogram service returned {}",
                resp.status()
            )));
        }

        let envelope: HistogramEnvelope = resp
            .json()
            .await
            .map_err(|e| WrapError::UpstreamUnavailable(format!("histogram decode failed: {e}")))?;
        Ok(SpeedHistogram::from_wire(envelope.data.unwrap_or_default()))
    }
}

/// Caches anonymous profile lookups by lowercase username. Credentialed
/// lookups always go upstream and are never stored.
pub struct CachedProfileSource {
    inner: Arc<dyn ProfileSource>,
    cache: TtlCache<String, RawProfile>,
}

impl CachedProfileSource {
    pub fn new(inner: Arc<dyn ProfileSource>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }
}

#[async_trait]
impl ProfileSource for CachedProfileSource {
    async fn fetch_profile(
        &self,
        username: &str,
        credential: Option<&str>,
    ) -> WrapResult<RawProfile> {
        if credential.is_some() {
            return self.inner.fetch_profile(username, credential).await;
        }
        let key = username.to_lowercase();
        if let Some(hit) = self.cache.get(&key).await {
            debug!(username, "profile cache hit");
            return Ok(hit);
        }
        let profile = self.inner.fetch_profile(username, None).await?;
        self.cache.insert(key, profile.clone()).await;
        Ok(profile)
    }
}

pub struct CachedHistogramSource {
    inner: Arc<dyn HistogramSource>,
    cache: TtlCache<String, SpeedHistogram>,
}

impl CachedHistogramSource {
    pub fn new(inner: Arc<dyn HistogramSource>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::with_capacity(ttl, 8),
        }
    }
}

#[async_trait]
impl HistogramSource for CachedHistogramSource {
    async fn fetch_histogram(&self, selector: BenchmarkSelector) -> WrapResult<SpeedHistogram> {
        let key = selector.cache_key();
        if let Some(hit) = self.cache.get(&key).await {
            debug!(selector = %key, "histogram cache hit");
            return Ok(hit);
        }
        let histogram = self.inner.fetch_histogram(selector).await?;
        self.cache.insert(key, histogram.clone()).await;
        Ok(histogram)
    }
}
