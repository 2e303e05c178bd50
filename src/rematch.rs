//! "Test vs your year": a short live typing run scored against the year's
//! best, with a link back into the deck at the slide it was launched from.

use reqwest::Url;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RematchRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub target_wpm: f64,
    pub chars_typed: u64,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub return_step: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RematchVerdict {
    /// No target to compare against.
    WarmUp,
    NewBest,
    /// Within 10% of the target.
    Consistent,
    Rusty,
}

impl RematchVerdict {
    pub fn comment(&self) -> &'static str {
        match self {
            RematchVerdict::WarmUp => "Not bad!",
            RematchVerdict::NewBest => "New personal best? You're flying!",
            RematchVerdict::Consistent => "Consistent! You still got it.",
            RematchVerdict::Rusty => "A bit rusty? Or just warming up.",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RematchResult {
    pub wpm: u64,
    pub target_wpm: f64,
    pub verdict: RematchVerdict,
    pub comment: &'static str,
    pub return_link: String,
}

/// Five characters per word.
pub fn live_wpm(chars_typed: u64, elapsed_ms: u64) -> u64 {
    if elapsed_ms == 0 {
        return 0;
    }
    let minutes = elapsed_ms as f64 / 60_000.0;
    ((chars_typed as f64 / 5.0) / minutes).round() as u64
}

pub fn verdict(wpm: u64, target_wpm: f64) -> RematchVerdict {
    let wpm = wpm as f64;
    if !(target_wpm.is_finite() && target_wpm > 0.0) {
        RematchVerdict::WarmUp
    } else if wpm > target_wpm {
        RematchVerdict::NewBest
    } else if wpm > target_wpm * 0.9 {
        RematchVerdict::Consistent
    } else {
        RematchVerdict::Rusty
    }
}

/// Deep link back into the deck. The step is not clamped here; the deck
/// clamps it when the link is opened.
pub fn return_link(return_step: Option<i64>, username: Option<&str>) -> String {
    let step = return_step.unwrap_or(0).to_string();
    let mut params = vec![("step", step.as_str())];
    if let Some(name) = username.map(str::trim).filter(|n| !n.is_empty()) {
        params.push(("username", name));
    }
    match Url::parse_with_params("http://localhost/wrap", &params) {
        Ok(url) => format!("{}?{}", url.path(), url.query().unwrap_or_default()),
        Err(_) => format!("/wrap?step={step}"),
    }
}

pub fn score(req: &RematchRequest) -> RematchResult {
    let wpm = live_wpm(req.chars_typed, req.elapsed_ms);
    let verdict = verdict(wpm, req.target_wpm);
    RematchResult {
        wpm,
        target_wpm: req.target_wpm,
        verdict,
        comment: verdict.comment(),
        return_link: return_link(req.return_step, req.username.as_deref()),
    }
}
