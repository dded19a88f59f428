//! Search-intent detection.
//!
//! A cheap, pure predicate deciding whether a prompt is asking for fresh
//! information (news, recent events, an explicit time window).  The
//! orchestrator uses it once, on the first iteration, to decide whether to
//! force the search tool.  Matching is two-level:
//!
//! 1. keyword hits via [`aho_corasick`] (case-insensitive)
//! 2. explicit time windows via compiled [`regex`] patterns, which also
//!    yield a [`TimeConstraint`] used to pre-fill search filters

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Phrases suggesting the user wants current information.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "news", "latest", "recent", "current", "last ", "past ", "find", "look up", "search",
];

// ---------------------------------------------------------------------------
// Time constraints
// ---------------------------------------------------------------------------

/// Coarse freshness bucket understood by search backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeHint {
    Day,
    Week,
    Month,
    Year,
}

impl TimeHint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Smallest bucket covering a span of `days`.
    pub fn from_days(days: u32) -> Self {
        match days {
            0..=1 => Self::Day,
            2..=7 => Self::Week,
            8..=30 => Self::Month,
            _ => Self::Year,
        }
    }
}

/// A time window extracted from prompt text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeConstraint {
    pub time_hint: TimeHint,
    /// Earliest date of interest.
    pub after: NaiveDate,
    /// Approximate span in days.
    pub days_ago: u32,
}

impl TimeConstraint {
    /// Fill `time_hint` and `after` into search arguments that lack them.
    /// Values the model supplied are never overwritten.
    pub fn fill_search_args(&self, args: &mut Map<String, Value>) {
        args.entry("time_hint")
            .or_insert_with(|| Value::from(self.time_hint.as_str()));
        args.entry("after")
            .or_insert_with(|| Value::from(self.after.format("%Y-%m-%d").to_string()));
    }
}

#[derive(Debug, Clone, Copy)]
enum Anchor {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
}

impl Anchor {
    fn resolve(self, today: NaiveDate) -> TimeConstraint {
        let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
        let month_start = today.with_day(1).unwrap_or(today);
        let (time_hint, after, days_ago) = match self {
            Self::Today => (TimeHint::Day, today, 1),
            Self::Yesterday => (TimeHint::Day, today - Duration::days(1), 1),
            Self::ThisWeek => (TimeHint::Week, week_start, 7),
            Self::LastWeek => (TimeHint::Week, week_start - Duration::days(7), 7),
            Self::ThisMonth => (TimeHint::Month, month_start, 30),
            Self::LastMonth => {
                let prev_end = month_start - Duration::days(1);
                (TimeHint::Month, prev_end.with_day(1).unwrap_or(prev_end), 30)
            }
        };
        TimeConstraint {
            time_hint,
            after,
            days_ago,
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Compiled keyword automaton and time-window patterns.
#[derive(Debug, Clone)]
pub struct SearchIntentDetector {
    keywords: Option<AhoCorasick>,
    anchors: Vec<(Regex, Anchor)>,
    relative: Option<Regex>,
}

impl Default for SearchIntentDetector {
    fn default() -> Self {
        Self::with_keywords(DEFAULT_KEYWORDS)
    }
}

impl SearchIntentDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a detector matching a custom keyword list.
    pub fn with_keywords(keywords: &[&str]) -> Self {
        let automaton = if keywords.is_empty() {
            None
        } else {
            match AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .build(keywords)
            {
                Ok(ac) => Some(ac),
                Err(e) => {
                    tracing::error!(error = %e, "failed to build search keyword automaton");
                    None
                }
            }
        };

        let anchor_patterns = [
            (r"\btoday\b", Anchor::Today),
            (r"\byesterday\b", Anchor::Yesterday),
            (r"\bthis\s+week\b", Anchor::ThisWeek),
            (r"\blast\s+week\b", Anchor::LastWeek),
            (r"\bthis\s+month\b", Anchor::ThisMonth),
            (r"\blast\s+month\b", Anchor::LastMonth),
        ];
        let anchors = anchor_patterns
            .into_iter()
            .filter_map(|(pattern, anchor)| compile(pattern).map(|re| (re, anchor)))
            .collect();

        Self {
            keywords: automaton,
            anchors,
            relative: compile(
                r"\b(?:last|past|in\s+the\s+last)\s+(\d{1,3})\s+(day|days|week|weeks|month|months|year|years)\b",
            ),
        }
    }

    /// Extract an explicit time window from `text`, relative to `today`.
    ///
    /// Fixed phrases ("today", "last week", ...) win over counted spans
    /// ("past 3 days").
    pub fn time_constraint(&self, text: &str, today: NaiveDate) -> Option<TimeConstraint> {
        let lowered = text.to_lowercase();

        if let Some((_, anchor)) = self.anchors.iter().find(|(re, _)| re.is_match(&lowered)) {
            return Some(anchor.resolve(today));
        }

        let caps = self.relative.as_ref()?.captures(&lowered)?;
        let n: u32 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2)?.as_str();
        let days = if unit.starts_with("day") {
            n
        } else if unit.starts_with("week") {
            n * 7
        } else if unit.starts_with("month") {
            n * 30
        } else {
            n * 365
        };

        Some(TimeConstraint {
            time_hint: TimeHint::from_days(days),
            after: today - Duration::days(i64::from(days)),
            days_ago: days,
        })
    }

    /// Whether `text` reads like a request for fresh information.
    pub fn implies_search(&self, text: &str, today: NaiveDate) -> bool {
        let keyword_hit = self
            .keywords
            .as_ref()
            .is_some_and(|ac| ac.is_match(text));
        keyword_hit || self.time_constraint(text, today).is_some()
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(pattern, error = %e, "failed to compile time pattern");
            None
        }
    }
}
