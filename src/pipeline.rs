use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::error::{WrapError, WrapResult};
use crate::models::{BenchmarkSelector, ViewModel};
use crate::projections::WrapProjector;
use crate::upstream::{HistogramSource, ProfileSource};

/// Fetches the profile and the speed distribution concurrently and projects
/// them into a [`ViewModel`]. Holds no per-request state.
#[derive(Clone)]
pub struct AggregationPipeline {
    profiles: Arc<dyn ProfileSource>,
    histograms: Arc<dyn HistogramSource>,
    selector: BenchmarkSelector,
}

impl AggregationPipeline {
    pub fn new(profiles: Arc<dyn ProfileSource>, histograms: Arc<dyn HistogramSource>) -> Self {
        Self {
            profiles,
            histograms,
            selector: BenchmarkSelector::ENGLISH_TIME_60,
        }
    }

    pub async fn run(&self, username: &str, credential: Option<&str>) -> WrapResult<ViewModel> {
        self.run_at(username, credential, Utc::now()).await
    }

    #[instrument(name = "aggregation_run", skip(self, credential, now))]
    pub async fn run_at(
        &self,
        username: &str,
        credential: Option<&str>,
        now: DateTime<Utc>,
    ) -> WrapResult<ViewModel> {
        let username = validate_username(username)?;
        let credential = credential.filter(|c| !c.is_empty());

        let (profile, histogram) = tokio::join!(
            self.profiles.fetch_profile(username, credential),
            self.histograms.fetch_histogram(self.selector),
        );

        let profile = profile?;
        let histogram = match histogram {
            Ok(h) => Some(h),
            Err(err) => {
                warn!(error = %err, "histogram degraded; percentile left unranked");
                None
            }
        };

        let view = WrapProjector::new(&profile, histogram.as_ref()).build(now);
        info!(
            percentile = view.percentile,
            hero_synthetic = view.hero_moment.is_synthetic,
            "wrap aggregated"
        );
        Ok(view)
    }
}

/// Rejects blank usernames; returns the trimmed name.
pub fn validate_username(raw: &str) -> WrapResult<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(WrapError::InputInvalid("username is required".to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawProfile, SpeedHistogram};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubProfiles {
        profile: Option<RawProfile>,
        unavailable: bool,
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl ProfileSource for StubProfiles {
        async fn fetch_profile(
            &self,
            username: &str,
            credential: Option<&str>,
        ) -> WrapResult<RawProfile> {
            self.seen
                .lock()
                .unwrap()
                .push((username.to_string(), credential.map(str::to_string)));
            if self.unavailable {
                return Err(WrapError::UpstreamUnavailable("503".into()));
            }
            self.profile.clone().ok_or_else(|| WrapError::ProfileNotFound {
                username: username.to_string(),
            })
        }
    }

    struct StubHistograms(Option<SpeedHistogram>);

    #[async_trait]
    impl HistogramSource for StubHistograms {
        async fn fetch_histogram(&self, selector: BenchmarkSelector) -> WrapResult<SpeedHistogram> {
            assert_eq!(selector, BenchmarkSelector::ENGLISH_TIME_60);
            self.0
                .clone()
                .ok_or_else(|| WrapError::UpstreamUnavailable("histogram down".into()))
        }
    }

    fn ranked_profile() -> RawProfile {
        serde_json::from_str(
            r#"{"name":"kiwi","typingStats":{"completedTests":500,"timeTyping":36000},
                "personalBests":{"time":{"60":[{"wpm":95,"acc":97}]}}}"#,
        )
        .unwrap()
    }

    fn histogram() -> SpeedHistogram {
        [(60, 200), (70, 150), (90, 50), (100, 10)].into_iter().collect()
    }

    fn pipeline(profiles: StubProfiles, histograms: StubHistograms) -> (AggregationPipeline, Arc<StubProfiles>) {
        let profiles = Arc::new(profiles);
        (
            AggregationPipeline::new(profiles.clone(), Arc::new(histograms)),
            profiles,
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_run_ranks_against_histogram() {
        let (p, _) = pipeline(
            StubProfiles {
                profile: Some(ranked_profile()),
                ..Default::default()
            },
            StubHistograms(Some(histogram())),
        );
        let view = p.run_at("kiwi", None, now()).await.unwrap();
        assert!((view.percentile - 97.56).abs() < 0.01);
        assert_eq!(view.summary.hours_typed, 10.0);
        assert_eq!(view.summary.top_speed_rounded, 95);
    }

    #[tokio::test]
    async fn test_histogram_failure_degrades_to_unranked() {
        let (p, _) = pipeline(
            StubProfiles {
                profile: Some(ranked_profile()),
                ..Default::default()
            },
            StubHistograms(None),
        );
        let view = p.run_at("kiwi", None, now()).await.unwrap();
        assert_eq!(view.percentile, 0.0);
        assert_eq!(view.summary.top_percent, None);
        assert_eq!(view.completed_tests, 500);
    }

    #[tokio::test]
    async fn test_not_found_and_unavailable_are_distinct() {
        let (missing, _) = pipeline(StubProfiles::default(), StubHistograms(Some(histogram())));
        assert!(matches!(
            missing.run_at("ghost", None, now()).await,
            Err(WrapError::ProfileNotFound { .. })
        ));

        let (down, _) = pipeline(
            StubProfiles {
                unavailable: true,
                ..Default::default()
            },
            StubHistograms(Some(histogram())),
        );
        assert!(matches!(
            down.run_at("kiwi", None, now()).await,
            Err(WrapError::UpstreamUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_username_never_reaches_upstream() {
        let (p, profiles) = pipeline(StubProfiles::default(), StubHistograms(None));
        assert!(matches!(
            p.run_at("   ", None, now()).await,
            Err(WrapError::InputInvalid(_))
        ));
        assert!(profiles.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_credential_forwarded_unmodified() {
        let (p, profiles) = pipeline(
            StubProfiles {
                profile: Some(ranked_profile()),
                ..Default::default()
            },
            StubHistograms(None),
        );
        p.run_at(" kiwi ", Some(" ape key "), now()).await.unwrap();
        p.run_at("kiwi", Some(""), now()).await.unwrap();
        p.run_at("kiwi", Some("   "), now()).await.unwrap();
        let seen = profiles.seen.lock().unwrap();
        assert_eq!(seen[0], ("kiwi".to_string(), Some(" ape key ".to_string())));
        assert_eq!(seen[1], ("kiwi".to_string(), None));
        assert_eq!(seen[2], ("kiwi".to_string(), Some("   ".to_string())));
    }
}
