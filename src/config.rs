use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::deck::SlideOrder;
use crate::error::WrapResult;

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.monkeytype.com";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,
    pub profile_cache_ttl: Duration,
    pub histogram_cache_ttl: Duration,
    pub slide_order: SlideOrder,
    pub log_json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            upstream_timeout: Duration::from_millis(10_000),
            profile_cache_ttl: Duration::from_millis(60_000),
            histogram_cache_ttl: Duration::from_millis(3_600_000),
            slide_order: SlideOrder::canonical(),
            log_json: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> WrapResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Unparsable values fall back to defaults, except the slide order,
    /// which must be valid when set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> WrapResult<Self> {
        let defaults = Self::default();
        let slide_order = match lookup("WRAP_SLIDE_ORDER").filter(|v| !v.trim().is_empty()) {
            Some(raw) => SlideOrder::parse(&raw)?,
            None => defaults.slide_order,
        };
        let bind = lookup("WRAP_BIND")
            .and_then(|v| v.trim().parse::<SocketAddr>().ok())
            .unwrap_or(defaults.bind);
        let upstream_base_url = lookup("WRAP_UPSTREAM_BASE_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.upstream_base_url);

        Ok(Self {
            bind,
            upstream_base_url,
            upstream_timeout: duration_ms(&lookup, "WRAP_UPSTREAM_TIMEOUT_MS")
                .unwrap_or(defaults.upstream_timeout),
            profile_cache_ttl: duration_ms(&lookup, "WRAP_PROFILE_CACHE_TTL_MS")
                .unwrap_or(defaults.profile_cache_ttl),
            histogram_cache_ttl: duration_ms(&lookup, "WRAP_HISTOGRAM_CACHE_TTL_MS")
                .unwrap_or(defaults.histogram_cache_ttl),
            slide_order,
            log_json: lookup("WRAP_LOG_JSON")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.log_json),
        })
    }
}

fn duration_ms(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<Duration> {
    lookup(name)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}
