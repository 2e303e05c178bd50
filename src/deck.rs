use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{WrapError, WrapResult};


/// Identifiers of the slides the presentation layer knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlideId {
    Intro,
    Story,
    Tests,
    Time,
    Wpm,
    Percentile,
    Dedication,
    Identity,
    Summary,
}

impl SlideId {
    pub const ALL: [SlideId; 9] = [
        SlideId::Intro,
        SlideId::Story,
        SlideId::Tests,
        SlideId::Time,
        SlideId::Wpm,
        SlideId::Percentile,
        SlideId::Dedication,
        SlideId::Identity,
        SlideId::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlideId::Intro => "intro",
            SlideId::Story => "story",
            SlideId::Tests => "tests",
            SlideId::Time => "time",
            SlideId::Wpm => "wpm",
            SlideId::Percentile => "percentile",
            SlideId::Dedication => "dedication",
            SlideId::Identity => "identity",
            SlideId::Summary => "summary",
        }
    }
}

impl fmt::Display for SlideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlideId {
    type Err = WrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        SlideId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| WrapError::InvalidConfig(format!("unknown slide id `{wanted}`")))
    }
}

/// Fixed slide order for one session; always all nine slides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideOrder {
    ids: Arc<[SlideId]>,
}

impl SlideOrder {
    /// Accepts only a permutation of [`SlideId::ALL`]: every known slide
    /// exactly once, so a step index means the same count of slides in any order.
    pub fn new(ids: Vec<SlideId>) -> WrapResult<Self> {
        let mut seen = HashSet::new();
        for id in &ids {
            if !seen.insert(*id) {
                return Err(WrapError::InvalidConfig(format!(
                    "slide `{id}` appears more than once"
                )));
            }
        }
        let missing: Vec<&str> = SlideId::ALL
            .iter()
            .filter(|id| !seen.contains(id))
            .map(SlideId::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(WrapError::InvalidConfig(format!(
                "slide order is missing {}",
                missing.join(", ")
            )));
        }
        Ok(Self { ids: ids.into() })
    }

    /// intro, story, tests, time, wpm, percentile, dedication, identity, summary
    pub fn canonical() -> Self {
        Self {
            ids: SlideId::ALL.to_vec().into(),
        }
    }

    /// Comma separated ids, e.g. `intro,tests,story,summary`.
    pub fn parse(raw: &str) -> WrapResult<Self> {
        let ids = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(SlideId::from_str)
            .collect::<WrapResult<Vec<_>>>()?;
        Self::new(ids)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> &[SlideId] {
        &self.ids
    }
}

/// Position within a slide order. Single writer; callers serialize navigation.
#[derive(Debug, Clone)]
pub struct SlideDeck {
    order: SlideOrder,
    index: usize,
}

/// Serializable snapshot for the presentation layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeckState {
    pub index: usize,
    pub slide: SlideId,
    pub total: usize,
    pub slides: Vec<SlideId>,
    pub can_go_next: bool,
    pub can_go_previous: bool,
}

impl SlideDeck {
    /// Starts at `start` clamped into `[0, len - 1]`; absent means 0.
    pub fn init(order: SlideOrder, start: Option<i64>) -> Self {
        let last = order.len().saturating_sub(1);
        let index = match start {
            Some(i) if i <= 0 => 0,
            Some(i) => usize::try_from(i).map_or(last, |i| i.min(last)),
            None => 0,
        };
        Self { order, index }
    }

    /// Same as [`SlideDeck::init`] for a raw query value. Non-numeric input
    /// starts at 0; an all-digit value too large to parse clamps to the end.
    pub fn init_from_param(order: SlideOrder, raw: Option<&str>) -> Self {
        let start = raw.map(str::trim).and_then(|s| match s.parse::<i64>() {
            Ok(i) => Some(i),
            Err(_) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => Some(i64::MAX),
            Err(_) => None,
        });
        Self::init(order, start)
    }

    pub fn next(&mut self) {
        if self.can_go_next() {
            self.index += 1;
        }
    }

    pub fn previous(&mut self) {
        if self.can_go_previous() {
            self.index -= 1;
        }
    }

    pub fn current_id(&self) -> SlideId {
        self.order.ids()[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn can_go_next(&self) -> bool {
        self.index + 1 < self.order.len()
    }

    pub fn can_go_previous(&self) -> bool {
        self.index > 0
    }

    pub fn state(&self) -> DeckState {
        DeckState {
            index: self.index,
            slide: self.current_id(),
            total: self.len(),
            slides: self.order.ids().to_vec(),
            can_go_next: self.can_go_next(),
            can_go_previous: self.can_go_previous(),
        }
    }
}
