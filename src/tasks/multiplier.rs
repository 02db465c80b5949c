//! Time-based weight multipliers.
//!
//! A [`MultiplierRule`] scales the weight of every task whose name matches one
//! of its glob patterns while the current local time falls inside its window.
//! Rules are applied transiently at selection time and never persisted.

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Rule name of the built-in night posting multiplier.
pub const NIGHT_POSTING_RULE: &str = "tweet_night_multiplier";
/// Rule name of the built-in daytime engagement multiplier.
pub const DAY_ENGAGEMENT_RULE: &str = "engagement_day_multiplier";

/// Default factor applied to posting at night.
pub const DEFAULT_NIGHT_FACTOR: f64 = 0.4;
/// Default factor applied to engagement during the day.
pub const DEFAULT_DAY_FACTOR: f64 = 1.5;

/// How several matching rules combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Composition {
    /// Product of all matching factors
    #[default]
    Multiply,
    /// Last matching rule (declaration order) wins
    Override,
}

/// Inclusive range of hours of the day. `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start > 23 || end > 23 {
            return Err(AgentError::Configuration(format!(
                "hour window {}-{} out of range 0-23",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Every hour of the day
    pub fn all_day() -> Self {
        Self { start: 0, end: 23 }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            (self.start..=self.end).contains(&hour)
        } else {
            hour >= self.start || hour <= self.end
        }
    }
}

/// Time predicate: an hour window restricted to some weekdays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub hours: HourWindow,
    /// Empty means every day
    pub days: Vec<Weekday>,
}

impl TimeWindow {
    pub fn hours(hours: HourWindow) -> Self {
        Self { hours, days: Vec::new() }
    }

    pub fn with_days(mut self, days: Vec<Weekday>) -> Self {
        self.days = days;
        self
    }

    pub fn contains(&self, at: &NaiveDateTime) -> bool {
        let day_matches = self.days.is_empty() || self.days.contains(&at.weekday());
        day_matches && self.hours.contains(at.hour())
    }
}

/// Parse weekday names such as "mon" or "Saturday".
pub fn parse_weekdays(days: &[String]) -> Result<Vec<Weekday>> {
    days.iter()
        .map(|d| {
            d.trim()
                .parse::<Weekday>()
                .map_err(|_| AgentError::Configuration(format!("invalid weekday '{}'", d)))
        })
        .collect()
}

/// Scales matching task weights inside a time window
#[derive(Debug, Clone)]
pub struct MultiplierRule {
    pub name: String,
    patterns: Vec<Pattern>,
    pub window: TimeWindow,
    pub factor: f64,
}

impl MultiplierRule {
    /// Compile a rule. Patterns are globs over task names.
    pub fn new(name: impl Into<String>, tasks: &[&str], window: TimeWindow, factor: f64) -> Result<Self> {
        let name = name.into();
        check_factor(&name, factor)?;
        if tasks.is_empty() {
            return Err(AgentError::Configuration(format!(
                "multiplier rule '{}' has no task patterns",
                name
            )));
        }
        let patterns = tasks
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    AgentError::Configuration(format!("multiplier rule '{}': bad pattern '{}': {}", name, p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            patterns,
            window,
            factor,
        })
    }

    pub fn matches_task(&self, task_name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(task_name))
    }

    /// Whether this rule applies to `task_name` at `now`
    pub fn applies(&self, task_name: &str, now: &NaiveDateTime) -> bool {
        self.matches_task(task_name) && self.window.contains(now)
    }

    pub fn patterns(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.as_str()).collect()
    }
}

fn check_factor(rule: &str, factor: f64) -> Result<()> {
    if !factor.is_finite() || factor < 0.0 {
        return Err(AgentError::Configuration(format!(
            "multiplier rule '{}' has invalid factor {}",
            rule, factor
        )));
    }
    Ok(())
}

/// The two rules every agent starts with: quieter posting between 01:00 and
/// 05:59, livelier engagement between 08:00 and 20:59.
pub fn builtin_rules() -> Vec<MultiplierRule> {
    let night = MultiplierRule::new(
        NIGHT_POSTING_RULE,
        &["post-tweet"],
        TimeWindow::hours(HourWindow { start: 1, end: 5 }),
        DEFAULT_NIGHT_FACTOR,
    );
    let day = MultiplierRule::new(
        DAY_ENGAGEMENT_RULE,
        &["reply-to-tweet", "like-tweet"],
        TimeWindow::hours(HourWindow { start: 8, end: 20 }),
        DEFAULT_DAY_FACTOR,
    );
    // Both are statically valid
    [night, day].into_iter().flatten().collect()
}

/// Time-based weighting policy for one agent
#[derive(Debug, Clone)]
pub struct MultiplierPolicy {
    pub enabled: bool,
    pub composition: Composition,
    rules: Vec<MultiplierRule>,
}

impl Default for MultiplierPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl MultiplierPolicy {
    /// Policy that leaves static weights untouched
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            composition: Composition::Multiply,
            rules: Vec::new(),
        }
    }

    pub fn new(enabled: bool, composition: Composition, rules: Vec<MultiplierRule>) -> Self {
        Self {
            enabled,
            composition,
            rules,
        }
    }

    pub fn rules(&self) -> &[MultiplierRule] {
        &self.rules
    }

    pub fn push_rule(&mut self, rule: MultiplierRule) {
        self.rules.push(rule);
    }

    /// Replace the factor of the rule named `name`. Returns false if no rule
    /// has that name.
    pub fn set_factor(&mut self, name: &str, factor: f64) -> Result<bool> {
        check_factor(name, factor)?;
        let mut found = false;
        for rule in self.rules.iter_mut().filter(|r| r.name == name) {
            rule.factor = factor;
            found = true;
        }
        Ok(found)
    }

    /// Combined multiplier for `task_name` at `now`
    pub fn multiplier(&self, task_name: &str, now: &NaiveDateTime) -> f64 {
        if !self.enabled {
            return 1.0;
        }
        let matching = self.rules.iter().filter(|r| r.applies(task_name, now));
        match self.composition {
            Composition::Multiply => matching.map(|r| r.factor).product(),
            Composition::Override => matching.last().map(|r| r.factor).unwrap_or(1.0),
        }
    }

    /// Static weight scaled by the active multipliers, floored at zero
    pub fn effective_weight(&self, task_name: &str, weight: f64, now: &NaiveDateTime) -> f64 {
        let w = weight * self.multiplier(task_name, now);
        if w.is_finite() && w > 0.0 { w } else { 0.0 }
    }
}
