//! Noise filters (§3, P7): operator-authored rules that suppress known-noisy
//! structured log events from the auto-diagnose report (C8). Scoped to an
//! epic, a PRD, or global; applied in order, first match wins.

use serde::{Deserialize, Serialize};

use crate::log_tail::LogEvent;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterScope {
    Global,
    Prd(String),
    Epic(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MatchRule {
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseFilter {
    pub id: String,
    pub description: String,
    #[serde(rename = "match")]
    pub rule: MatchRule,
    pub learned_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub scope: Option<FilterScope>,
}

impl NoiseFilter {
    pub fn new(id: impl Into<String>, description: impl Into<String>, rule: MatchRule) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            rule,
            learned_at: chrono::Utc::now(),
            scope: None,
        }
    }

    pub fn applies_to(&self, scope: &FilterScope) -> bool {
        match &self.scope {
            None => true,
            Some(FilterScope::Global) => true,
            Some(s) => s == scope,
        }
    }
}

/// `true` if `rule` matches `event`. A rule with no clauses set matches
/// nothing — an empty filter is inert rather than universally suppressing.
pub fn matches(rule: &MatchRule, event: &LogEvent) -> bool {
    let mut constrained = false;

    if let Some(event_type) = &rule.event_type {
        constrained = true;
        if &event.event_type != event_type {
            return false;
        }
    }

    if let Some(contains) = &rule.contains {
        constrained = true;
        if !event.summary.contains(contains.as_str()) {
            return false;
        }
    }

    if let Some(pattern) = &rule.pattern {
        constrained = true;
        match regex::Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(&event.summary) {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }

    constrained
}

/// Apply filters in order; the first matching filter suppresses the event.
/// Returns `true` if the event is suppressed.
pub fn is_suppressed(filters: &[NoiseFilter], scope: &FilterScope, event: &LogEvent) -> bool {
    filters
        .iter()
        .filter(|f| f.applies_to(scope))
        .any(|f| matches(&f.rule, event))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, summary: &str) -> LogEvent {
        LogEvent {
            event_type: event_type.to_string(),
            summary: summary.to_string(),
            raw: serde_json::json!({}),
        }
    }

    #[test]
    fn empty_rule_matches_nothing() {
        let rule = MatchRule::default();
        assert!(!matches(&rule, &event("tool-result", "anything")));
    }

    #[test]
    fn contains_rule_matches_substring() {
        let rule = MatchRule {
            contains: Some("ENOENT".to_string()),
            ..Default::default()
        };
        assert!(matches(&rule, &event("tool-result", "Error: ENOENT no such file")));
        assert!(!matches(&rule, &event("tool-result", "Error: EACCES")));
    }

    #[test]
    fn type_and_contains_both_must_match() {
        let rule = MatchRule {
            event_type: Some("tool-result".to_string()),
            contains: Some("ENOENT".to_string()),
            pattern: None,
        };
        assert!(matches(&rule, &event("tool-result", "ENOENT")));
        assert!(!matches(&rule, &event("assistant-message", "ENOENT")));
    }

    #[test]
    fn pattern_rule_uses_regex() {
        let rule = MatchRule {
            pattern: Some(r"^npm warn .*$".to_string()),
            ..Default::default()
        };
        assert!(matches(&rule, &event("system-message", "npm warn deprecated foo@1.0.0")));
        assert!(!matches(&rule, &event("system-message", "npm error fatal")));
    }

    #[test]
    fn global_scope_applies_everywhere() {
        let filter = NoiseFilter::new("f1", "noisy npm warnings", MatchRule {
            contains: Some("npm warn".into()),
            ..Default::default()
        });
        assert!(filter.applies_to(&FilterScope::Prd("PRD-1".into())));
        assert!(filter.applies_to(&FilterScope::Epic("E1".into())));
    }

    #[test]
    fn scoped_filter_does_not_apply_to_other_scope() {
        let mut filter = NoiseFilter::new("f1", "prd specific", MatchRule {
            contains: Some("x".into()),
            ..Default::default()
        });
        filter.scope = Some(FilterScope::Prd("PRD-1".into()));
        assert!(filter.applies_to(&FilterScope::Prd("PRD-1".into())));
        assert!(!filter.applies_to(&FilterScope::Prd("PRD-2".into())));
    }

    #[test]
    fn is_suppressed_checks_filters_in_order_first_match_wins() {
        let filters = vec![
            NoiseFilter::new("f1", "a", MatchRule { contains: Some("foo".into()), ..Default::default() }),
            NoiseFilter::new("f2", "b", MatchRule { contains: Some("bar".into()), ..Default::default() }),
        ];
        assert!(is_suppressed(&filters, &FilterScope::Global, &event("x", "contains foo")));
        assert!(is_suppressed(&filters, &FilterScope::Global, &event("x", "contains bar")));
        assert!(!is_suppressed(&filters, &FilterScope::Global, &event("x", "contains baz")));
    }
}
