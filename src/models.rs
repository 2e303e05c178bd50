use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deck::DeckState;

/// Short and long benchmark durations, in seconds.
pub const SHORT_DURATION: u32 = 15;
pub const LONG_DURATION: u32 = 60;

// Upstream wire types. Every field is optional at every level; reads go
// through the accessor methods below, which never fail.

/// `{ "message": ..., "data": { ...profile... } }`
#[derive(Debug, Deserialize, Default)]
pub struct ProfileEnvelope {
    #[serde(default)]
    pub data: Option<RawProfile>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub added_at: Option<f64>,
    #[serde(default)]
    pub discord_id: Option<String>,
    #[serde(default)]
    pub discord_avatar: Option<String>,
    #[serde(default)]
    pub typing_stats: Option<TypingStats>,
    #[serde(default)]
    pub personal_bests: Option<PersonalBests>,
    #[serde(default)]
    pub xp: Option<f64>,
    #[serde(default)]
    pub streak: Option<u64>,
    #[serde(default)]
    pub max_streak: Option<u64>,
    #[serde(default)]
    pub details: Option<ProfileDetails>,
    #[serde(default)]
    pub inventory: Option<Inventory>,
    /// Shape varies between upstream versions; read defensively.
    #[serde(default)]
    pub all_time_lbs: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TypingStats {
    #[serde(default)]
    pub completed_tests: Option<u64>,
    #[serde(default)]
    pub started_tests: Option<u64>,
    /// Seconds.
    #[serde(default)]
    pub time_typing: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PersonalBests {
    /// Keyed by duration in seconds ("15", "60", ...), best attempt first.
    #[serde(default)]
    pub time: Option<HashMap<String, Option<Vec<PersonalBestEntry>>>>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct PersonalBestEntry {
    #[serde(default)]
    pub wpm: Option<f64>,
    #[serde(default)]
    pub acc: Option<f64>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl PersonalBestEntry {
    pub fn speed(&self) -> f64 {
        self.wpm.filter(|w| w.is_finite() && *w > 0.0).unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDetails {
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub keyboard: Option<String>,
    #[serde(default)]
    pub social_profiles: Option<SocialProfiles>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct SocialProfiles {
    #[serde(default)]
    pub website: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Inventory {
    /// Only counted; badge objects are passed over untyped.
    #[serde(default)]
    pub badges: Option<Vec<serde_json::Value>>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl RawProfile {
    /// First (highest ranked) personal best recorded for `duration` seconds.
    pub fn best_entry(&self, duration: u32) -> Option<&PersonalBestEntry> {
        self.personal_bests
            .as_ref()?
            .time
            .as_ref()?
            .get(&duration.to_string())?
            .as_ref()?
            .first()
    }

    pub fn discord_identity(&self) -> Option<(&str, &str)> {
        Some((
            non_empty(self.discord_id.as_ref())?,
            non_empty(self.discord_avatar.as_ref())?,
        ))
    }

    pub fn keyboard(&self) -> Option<&str> {
        non_empty(self.details.as_ref()?.keyboard.as_ref())
    }

    pub fn bio(&self) -> Option<&str> {
        non_empty(self.details.as_ref()?.bio.as_ref())
    }

    pub fn website(&self) -> Option<&str> {
        non_empty(
            self.details
                .as_ref()?
                .social_profiles
                .as_ref()?
                .website
                .as_ref(),
        )
    }

    pub fn typing_stats(&self) -> TypingStats {
        self.typing_stats.clone().unwrap_or_default()
    }

    pub fn badge_count(&self) -> usize {
        self.inventory
            .as_ref()
            .and_then(|inv| inv.badges.as_ref())
            .map_or(0, Vec::len)
    }
}

/// `{ "data": { "<bucket>": <count>, ... } }`
#[derive(Debug, Deserialize, Default)]
pub struct HistogramEnvelope {
    #[serde(default)]
    pub data: Option<BTreeMap<String, serde_json::Value>>,
}

/// Fixed mode/duration/language the distribution is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BenchmarkSelector {
    pub language: &'static str,
    pub mode: &'static str,
    pub mode2: &'static str,
}

impl BenchmarkSelector {
    pub const ENGLISH_TIME_60: Self = Self {
        language: "english",
        mode: "time",
        mode2: "60",
    };

    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.language, self.mode, self.mode2)
    }
}

/// User counts per speed bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeedHistogram {
    buckets: BTreeMap<u32, u64>,
}

impl SpeedHistogram {
    /// Builds the histogram from the upstream map, dropping keys that are not
    /// non-negative integers and counts that are not non-negative integers.
    pub fn from_wire(raw: BTreeMap<String, serde_json::Value>) -> Self {
        let mut buckets = BTreeMap::new();
        for (key, value) in raw {
            let bucket = key.trim().parse::<u32>().ok();
            let count = value.as_u64();
            match (bucket, count) {
                (Some(bucket), Some(count)) => add_count(&mut buckets, bucket, count),
                _ => tracing::debug!(bucket = %key, value = %value, "skipping malformed histogram entry"),
            }
        }
        Self { buckets }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.buckets
            .values()
            .fold(0u64, |acc, c| acc.saturating_add(*c))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.buckets.iter().map(|(b, c)| (*b, *c))
    }
}

/// Keys that collide after trimming are merged; the sum saturates.
fn add_count(buckets: &mut BTreeMap<u32, u64>, bucket: u32, count: u64) {
    let slot = buckets.entry(bucket).or_insert(0);
    *slot = slot.saturating_add(count);
}

impl FromIterator<(u32, u64)> for SpeedHistogram {
    fn from_iter<I: IntoIterator<Item = (u32, u64)>>(iter: I) -> Self {
        let mut buckets = BTreeMap::new();
        for (bucket, count) in iter {
            add_count(&mut buckets, bucket, count);
        }
        Self { buckets }
    }
}

/// Fully defaulted output of the aggregation pipeline. Immutable once built.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ViewModel {
    pub name: String,
    pub uid: String,
    pub joined: Option<DateTime<Utc>>,
    pub avatar_url: String,
    pub keyboard: String,
    pub bio: String,
    pub website: Option<String>,

    pub completed_tests: u64,
    pub started_tests: u64,
    pub time_typing: f64,

    pub best_short: f64,
    pub best_long: f64,
    pub hero_moment: HeroMoment,

    /// Raw upstream value; `summary.xp_display` holds the floored figure.
    pub xp: f64,
    pub streak: u64,
    pub max_streak: u64,
    pub badge_count: usize,
    pub leaderboard: Vec<LeaderboardPlacement>,

    /// 0 means unranked.
    pub percentile: f64,
    pub summary: WrapSummary,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HeroMoment {
    pub timestamp: DateTime<Utc>,
    pub speed: f64,
    pub accuracy: f64,
    pub duration: Option<u32>,
    /// Set when no personal best exists; the timestamp is then the run time
    /// and carries no meaning.
    pub is_synthetic: bool,
    pub display_date: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WrapSummary {
    pub top_speed: f64,
    pub top_speed_rounded: u64,
    pub hours_typed: f64,
    pub top_percent: Option<u32>,
    pub xp_display: u64,
    pub wrap_year: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LeaderboardPlacement {
    pub duration: String,
    pub language: String,
    pub rank: u64,
}

/// API Response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StatsQuery {
    pub username: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct WrapQuery {
    pub username: Option<String>,
    pub key: Option<String>,
    /// Raw deep-link value; clamped by the deck, never rejected.
    pub step: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeckQuery {
    pub step: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WrapResponse {
    pub view: ViewModel,
    pub deck: DeckState,
}
