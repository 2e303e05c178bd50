use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Utc};
use regex::Regex;

use crate::models::{
    HeroMoment, LeaderboardPlacement, PersonalBestEntry, RawProfile, SpeedHistogram, ViewModel,
    WrapSummary, LONG_DURATION, SHORT_DURATION,
};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 20, 12, 0, 0).unwrap()
    }

    fn profile(json: &str) -> RawProfile {
        serde_json::from_str(json).unwrap()
    }

    fn histogram(pairs: &[(u32, u64)]) -> SpeedHistogram {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_percentile_zero_target_is_unranked() {
        let h = histogram(&[(10, 5), (20, 5)]);
        assert_eq!(percentile(0.0, Some(&h)), 0.0);
        assert_eq!(percentile(0.0, None), 0.0);
    }

    #[test]
    fn test_percentile_empty_or_missing_histogram() {
        assert_eq!(percentile(80.0, Some(&SpeedHistogram::default())), 0.0);
        assert_eq!(percentile(80.0, None), 0.0);
        // all buckets present but zero users
        assert_eq!(percentile(80.0, Some(&histogram(&[(10, 0), (20, 0)]))), 0.0);
    }

    #[test]
    fn test_percentile_equal_bucket_is_not_slower() {
        let h = histogram(&[(60, 200), (70, 150), (90, 50)]);
        // 70 is not strictly below 70
        let p = percentile(70.0, Some(&h));
        assert!((p - 100.0 * 200.0 / 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_stays_in_range() {
        let h = histogram(&[(10, 3), (50, 9), (120, 1)]);
        for target in [0.5, 10.0, 49.9, 50.0, 50.1, 119.0, 121.0, 400.0] {
            let p = percentile(target, Some(&h));
            assert!((0.0..=100.0).contains(&p), "target {target} gave {p}");
        }
        assert!(percentile(119.0, Some(&h)) < 100.0);
    }

    #[test]
    fn test_percentile_end_to_end_example() {
        let h = histogram(&[(60, 200), (70, 150), (90, 50), (100, 10)]);
        let p = percentile(95.0, Some(&h));
        assert!((p - 97.5609756).abs() < 1e-4);
    }

    #[test]
    fn test_hero_prefers_strictly_faster_short() {
        let p = profile(
            r#"{"personalBests":{"time":{
                "15":[{"wpm":120,"acc":96,"timestamp":1735689600000}],
                "60":[{"wpm":110,"acc":98,"timestamp":1704067200000}]}}}"#,
        );
        let hero = select_hero_moment(&p, now());
        assert_eq!(hero.speed, 120.0);
        assert_eq!(hero.duration, Some(15));
        assert!(!hero.is_synthetic);
        assert_eq!(hero.timestamp.timestamp_millis(), 1_735_689_600_000);
    }

    #[test]
    fn test_hero_tie_prefers_long() {
        let p = profile(
            r#"{"personalBests":{"time":{
                "15":[{"wpm":100,"acc":90}],
                "60":[{"wpm":100,"acc":99}]}}}"#,
        );
        let hero = select_hero_moment(&p, now());
        assert_eq!(hero.duration, Some(60));
        assert_eq!(hero.accuracy, 99.0);
    }

    #[test]
    fn test_hero_only_short_present() {
        let p = profile(r#"{"personalBests":{"time":{"15":[{"wpm":80,"acc":93}]}}}"#);
        let hero = select_hero_moment(&p, now());
        assert_eq!(hero.duration, Some(15));
        assert_eq!(hero.speed, 80.0);
    }

    #[test]
    fn test_hero_synthetic_when_no_bests() {
        let hero = select_hero_moment(&RawProfile::default(), now());
        assert!(hero.is_synthetic);
        assert_eq!(hero.speed, 0.0);
        assert_eq!(hero.accuracy, 0.0);
        assert_eq!(hero.duration, None);
        assert_eq!(hero.timestamp, now());
        assert_eq!(hero.display_date, "December 20");
    }

    #[test]
    fn test_avatar_from_discord_identity() {
        let p = profile(r#"{"discordId":"123","discordAvatar":"abc"}"#);
        let url = resolve_avatar(&p);
        assert!(url.contains("123"));
        assert!(url.contains("abc"));
        assert_eq!(url, "https://cdn.discordapp.com/avatars/123/abc");
    }

    #[test]
    fn test_avatar_default_when_incomplete() {
        assert_eq!(resolve_avatar(&RawProfile::default()), DEFAULT_AVATAR_URL);
        let only_id = profile(r#"{"discordId":"123"}"#);
        assert_eq!(resolve_avatar(&only_id), DEFAULT_AVATAR_URL);
    }

    // Bio parsing is a heuristic; these cases illustrate it rather than pin it down.
    #[test]
    fn test_keyboard_from_bio() {
        assert_eq!(
            extract_keyboard_from_bio("I use keyboard: Model F").as_deref(),
            Some("Model F")
        );
        assert_eq!(
            extract_keyboard_from_bio("KEYBOARD  hhkb-pro 2!").as_deref(),
            Some("hhkb-pro 2")
        );
        assert_eq!(extract_keyboard_from_bio("I like cats"), None);
        assert_eq!(extract_keyboard_from_bio("keyboard:   "), None);
    }

    #[test]
    fn test_keyboard_resolution_order() {
        let explicit = profile(r#"{"details":{"keyboard":"Keychron Q1","bio":"keyboard: other"}}"#);
        assert_eq!(resolve_keyboard(&explicit), "Keychron Q1");

        let from_bio = profile(r#"{"details":{"bio":"main keyboard Wooting 60HE"}}"#);
        assert_eq!(resolve_keyboard(&from_bio), "Wooting 60HE");

        let nothing = profile(r#"{"details":{"bio":"no hints here"}}"#);
        assert_eq!(resolve_keyboard(&nothing), UNKNOWN_KEYBOARD);
    }

    #[test]
    fn test_leaderboard_placements_read_defensively() {
        let p = profile(
            r#"{"allTimeLbs":{"time":{
                "60":{"english":{"rank":42,"count":1000}},
                "15":{"english":7,"german":{"rank":null}},
                "bogus":"x"}}}"#,
        );
        let placements = leaderboard_placements(&p);
        assert_eq!(
            placements,
            vec![
                LeaderboardPlacement {
                    duration: "15".into(),
                    language: "english".into(),
                    rank: 7
                },
                LeaderboardPlacement {
                    duration: "60".into(),
                    language: "english".into(),
                    rank: 42
                },
            ]
        );
        assert!(leaderboard_placements(&RawProfile::default()).is_empty());
    }

    #[test]
    fn test_build_end_to_end() {
        let p = profile(
            r#"{"name":"kiwi","uid":"u1","addedAt":1609459200000,
                "typingStats":{"completedTests":500,"startedTests":650,"timeTyping":36000},
                "personalBests":{"time":{"60":[{"wpm":95,"acc":97,"timestamp":1730000000000}]}},
                "xp":12345.8,"streak":3,"maxStreak":21,
                "inventory":{"badges":[{"id":1},{"id":2,"selected":true}]}}"#,
        );
        let h = histogram(&[(60, 200), (70, 150), (90, 50), (100, 10)]);
        let view = WrapProjector::new(&p, Some(&h)).build(now());

        assert_eq!(view.name, "kiwi");
        assert_eq!(view.completed_tests, 500);
        assert_eq!(view.started_tests, 650);
        assert_eq!(view.best_long, 95.0);
        assert_eq!(view.best_short, 0.0);
        assert!((view.percentile - 97.56).abs() < 0.01);
        assert_eq!(view.summary.top_speed, 95.0);
        assert_eq!(view.summary.top_speed_rounded, 95);
        assert_eq!(view.summary.hours_typed, 10.0);
        assert_eq!(view.summary.top_percent, Some(2));
        assert_eq!(view.summary.xp_display, 12345);
        assert_eq!(view.summary.wrap_year, 2025);
        assert_eq!(view.xp, 12345.8);
        assert_eq!(view.max_streak, 21);
        assert_eq!(view.badge_count, 2);
        assert_eq!(view.avatar_url, DEFAULT_AVATAR_URL);
        assert_eq!(view.keyboard, UNKNOWN_KEYBOARD);
        assert_eq!(view.bio, DEFAULT_BIO);
        assert_eq!(view.website, None);
        assert!(view.joined.is_some());
        assert_eq!(view.hero_moment.duration, Some(60));
    }

    #[test]
    fn test_build_on_empty_profile_is_total() {
        let view = WrapProjector::new(&RawProfile::default(), None).build(now());
        assert_eq!(view.name, "");
        assert_eq!(view.completed_tests, 0);
        assert_eq!(view.time_typing, 0.0);
        assert_eq!(view.percentile, 0.0);
        assert_eq!(view.summary.top_percent, None);
        assert_eq!(view.summary.hours_typed, 0.0);
        assert!(view.hero_moment.is_synthetic);
        assert!(view.joined.is_none());
        assert!(!view.avatar_url.is_empty());
    }
}

pub const DEFAULT_AVATAR_URL: &str = "https://monkeytype.com/images/logo/logo-square.png";
pub const UNKNOWN_KEYBOARD: &str = "Unknown Keyboard";
pub const DEFAULT_BIO: &str = "Just typing.";

const AVATAR_CDN: &str = "https://cdn.discordapp.com/avatars";

// "keyboard", then separators, then a run of word characters, spaces and hyphens.
static BIO_KEYBOARD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)keyboard[:\s]+([\w\s-]+)").ok());

/// Projects the wrap view model from one upstream profile and an optional
/// speed distribution. Total over sparse input: every read has a fallback.
pub struct WrapProjector<'a> {
    profile: &'a RawProfile,
    histogram: Option<&'a SpeedHistogram>,
}

impl<'a> WrapProjector<'a> {
    pub fn new(profile: &'a RawProfile, histogram: Option<&'a SpeedHistogram>) -> Self {
        Self { profile, histogram }
    }

    /// `now` only feeds the synthetic hero moment and the wrap year.
    pub fn build(&self, now: DateTime<Utc>) -> ViewModel {
        let profile = self.profile;
        let stats = profile.typing_stats();

        let best_short = best_speed(profile, SHORT_DURATION);
        let best_long = best_speed(profile, LONG_DURATION);
        let percentile = percentile(best_long, self.histogram);

        let time_typing = stats
            .time_typing
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(0.0);
        let xp = profile.xp.filter(|x| x.is_finite()).unwrap_or(0.0);

        let top_speed = best_short.max(best_long);
        let summary = WrapSummary {
            top_speed,
            top_speed_rounded: top_speed.round() as u64,
            hours_typed: hours_typed(time_typing),
            top_percent: top_percent(percentile),
            xp_display: xp.max(0.0).floor() as u64,
            wrap_year: now.year(),
        };

        ViewModel {
            name: profile.name.clone().unwrap_or_default(),
            uid: profile.uid.clone().unwrap_or_default(),
            joined: profile.added_at.and_then(from_epoch_millis),
            avatar_url: resolve_avatar(profile),
            keyboard: resolve_keyboard(profile),
            bio: profile.bio().unwrap_or(DEFAULT_BIO).to_string(),
            website: profile.website().map(str::to_string),
            completed_tests: stats.completed_tests.unwrap_or(0),
            started_tests: stats.started_tests.unwrap_or(0),
            time_typing,
            best_short,
            best_long,
            hero_moment: select_hero_moment(profile, now),
            xp,
            streak: profile.streak.unwrap_or(0),
            max_streak: profile.max_streak.unwrap_or(0),
            badge_count: profile.badge_count(),
            leaderboard: leaderboard_placements(profile),
            percentile,
            summary,
        }
    }
}

pub fn best_speed(profile: &RawProfile, duration: u32) -> f64 {
    profile
        .best_entry(duration)
        .map_or(0.0, PersonalBestEntry::speed)
}

/// Share of the population strictly slower than `target`, in `[0, 100]`.
///
/// A bucket equal to `target` counts as not slower. Returns 0 (unranked) for
/// a zero target or a missing, empty or zero-population histogram.
pub fn percentile(target: f64, histogram: Option<&SpeedHistogram>) -> f64 {
    let Some(histogram) = histogram else {
        return 0.0;
    };
    if !(target.is_finite() && target > 0.0) || histogram.is_empty() {
        return 0.0;
    }

    let total_users = histogram.total();
    if total_users == 0 {
        return 0.0;
    }
    let users_slower = histogram
        .iter()
        .filter(|(bucket, _)| f64::from(*bucket) < target)
        .fold(0u64, |acc, (_, count)| acc.saturating_add(count));

    (users_slower as f64 / total_users as f64 * 100.0).clamp(0.0, 100.0)
}

pub fn resolve_avatar(profile: &RawProfile) -> String {
    match profile.discord_identity() {
        Some((id, avatar)) => format!("{AVATAR_CDN}/{id}/{avatar}"),
        None => DEFAULT_AVATAR_URL.to_string(),
    }
}

/// Lossy free-text match; not a structured source.
pub fn extract_keyboard_from_bio(bio: &str) -> Option<String> {
    let re = BIO_KEYBOARD.as_ref()?;
    let name = re.captures(bio)?.get(1)?.as_str().trim();
    (!name.is_empty()).then(|| name.to_string())
}

pub fn resolve_keyboard(profile: &RawProfile) -> String {
    profile
        .keyboard()
        .map(str::to_string)
        .or_else(|| profile.bio().and_then(extract_keyboard_from_bio))
        .unwrap_or_else(|| UNKNOWN_KEYBOARD.to_string())
}

/// The faster of the two benchmark bests; ties and double misses go to the
/// long duration. Falls back to a synthetic zero record stamped `now`.
pub fn select_hero_moment(profile: &RawProfile, now: DateTime<Utc>) -> HeroMoment {
    let short = profile.best_entry(SHORT_DURATION);
    let long = profile.best_entry(LONG_DURATION);
    let short_speed = short.map_or(0.0, PersonalBestEntry::speed);
    let long_speed = long.map_or(0.0, PersonalBestEntry::speed);

    let chosen = if short_speed > long_speed {
        short.map(|e| (SHORT_DURATION, e))
    } else {
        long.map(|e| (LONG_DURATION, e))
            .or_else(|| short.map(|e| (SHORT_DURATION, e)))
    };

    match chosen {
        Some((duration, entry)) => {
            let timestamp = entry.timestamp.and_then(from_epoch_millis).unwrap_or(now);
            HeroMoment {
                timestamp,
                speed: entry.speed(),
                accuracy: entry.acc.filter(|a| a.is_finite()).unwrap_or(0.0),
                duration: Some(duration),
                is_synthetic: false,
                display_date: display_date(timestamp),
            }
        }
        None => HeroMoment {
            timestamp: now,
            speed: 0.0,
            accuracy: 0.0,
            duration: None,
            is_synthetic: true,
            display_date: display_date(now),
        },
    }
}

/// Placements under `allTimeLbs.time.<duration>.<language>`, accepting either
/// `{ "rank": n }` or a bare number. Anything else is skipped.
pub fn leaderboard_placements(profile: &RawProfile) -> Vec<LeaderboardPlacement> {
    let Some(by_duration) = profile
        .all_time_lbs
        .as_ref()
        .and_then(|lbs| lbs.get("time"))
        .and_then(|time| time.as_object())
    else {
        return Vec::new();
    };

    let mut placements = Vec::new();
    for (duration, languages) in by_duration {
        let Some(languages) = languages.as_object() else {
            continue;
        };
        for (language, entry) in languages {
            let rank = entry
                .as_u64()
                .or_else(|| entry.get("rank").and_then(|r| r.as_u64()));
            if let Some(rank) = rank {
                placements.push(LeaderboardPlacement {
                    duration: duration.clone(),
                    language: language.clone(),
                    rank,
                });
            }
        }
    }

    placements.sort_by(|a, b| {
        let a_secs = a.duration.parse::<u32>().unwrap_or(u32::MAX);
        let b_secs = b.duration.parse::<u32>().unwrap_or(u32::MAX);
        a_secs
            .cmp(&b_secs)
            .then_with(|| a.language.cmp(&b.language))
    });
    placements
}

fn hours_typed(seconds: f64) -> f64 {
    (seconds / 3600.0 * 10.0).round() / 10.0
}

fn top_percent(percentile: f64) -> Option<u32> {
    if percentile <= 0.0 {
        return None;
    }
    Some((100.0 - percentile.round()).max(1.0) as u32)
}

fn from_epoch_millis(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis(ms as i64)
}

fn display_date(at: DateTime<Utc>) -> String {
    at.format("%B %-d").to_string()
}
