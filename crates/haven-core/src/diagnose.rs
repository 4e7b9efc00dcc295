//! Auto-diagnose (C8): after a child exits, scan its structured log, apply
//! the scope's noise filters, and produce a report a human can act on.

use serde::{Deserialize, Serialize};

use crate::log_tail::{parse_json_event, LogEvent, SummaryWidths};
use crate::noise_filter::{is_suppressed, FilterScope, NoiseFilter};

pub const DEFAULT_MAX_ERROR_SAMPLES: usize = 10;
pub const DEFAULT_MAX_SAMPLE_LEN: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSample {
    pub event_type: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnoseReport {
    pub total_events: usize,
    pub events_filtered: usize,
    pub error_samples: Vec<ErrorSample>,
    pub action_required: bool,
}

impl DiagnoseReport {
    /// Human-readable "action required" block naming the escalation path
    /// and, when a sample looks like recurring noise, the filter that would
    /// suppress it.
    pub fn render(&self) -> String {
        if !self.action_required {
            return format!(
                "diagnose: {} events scanned, {} filtered, no errors remaining",
                self.total_events, self.events_filtered
            );
        }

        let mut out = String::new();
        out.push_str(&format!(
            "ACTION REQUIRED: {} error event(s) remain after filtering ({} of {} events suppressed)\n",
            self.error_samples.len(),
            self.events_filtered,
            self.total_events
        ));
        for sample in &self.error_samples {
            out.push_str(&format!("  [{}] {}\n", sample.event_type, sample.summary));
        }
        out.push_str(
            "If these are expected noise, add a noise filter to suppress the pattern.\n",
        );
        out.push_str("Otherwise this is a real issue — see the run log for full detail.\n");
        out
    }
}

fn is_error_event(event: &LogEvent) -> bool {
    event.event_type == "tool-result" && !event.raw.get("stderr").map(|v| v.as_str().unwrap_or("").is_empty()).unwrap_or(true)
        || event.event_type.contains("error")
}

/// Scan newline-delimited structured events, applying `filters` scoped to
/// `scope`, and produce a summary report.
pub fn diagnose(
    raw_log: &str,
    filters: &[NoiseFilter],
    scope: &FilterScope,
    widths: &SummaryWidths,
) -> DiagnoseReport {
    let mut total_events = 0;
    let mut events_filtered = 0;
    let mut error_samples = Vec::new();

    for line in raw_log.lines() {
        let Some(event) = parse_json_event(line, widths) else {
            continue;
        };
        total_events += 1;

        if is_suppressed(filters, scope, &event) {
            events_filtered += 1;
            continue;
        }

        if is_error_event(&event) && error_samples.len() < DEFAULT_MAX_ERROR_SAMPLES {
            error_samples.push(ErrorSample {
                event_type: event.event_type.clone(),
                summary: truncate_sample(&event.summary),
            });
        }
    }

    DiagnoseReport {
        total_events,
        events_filtered,
        action_required: !error_samples.is_empty(),
        error_samples,
    }
}

fn truncate_sample(s: &str) -> String {
    if s.chars().count() <= DEFAULT_MAX_SAMPLE_LEN {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(DEFAULT_MAX_SAMPLE_LEN - 1).collect();
        format!("{truncated}\u{2026}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise_filter::MatchRule;

    #[test]
    fn clean_log_has_no_action_required() {
        let log = r#"{"type":"assistant-message","text":"hi"}
{"type":"tool-result","stdout":"ok","stderr":""}"#;
        let report = diagnose(log, &[], &FilterScope::Global, &SummaryWidths::default());
        assert_eq!(report.total_events, 2);
        assert!(!report.action_required);
        assert!(report.error_samples.is_empty());
    }

    #[test]
    fn stderr_event_surfaces_as_error_sample() {
        let log = r#"{"type":"tool-result","stdout":"","stderr":"ENOENT: file not found"}"#;
        let report = diagnose(log, &[], &FilterScope::Global, &SummaryWidths::default());
        assert!(report.action_required);
        assert_eq!(report.error_samples.len(), 1);
        assert!(report.error_samples[0].summary.contains("ENOENT"));
    }

    #[test]
    fn noise_filter_suppresses_matching_event_regardless_of_order() {
        let log = r#"{"type":"tool-result","stdout":"","stderr":"ENOENT: missing optional cache"}
{"type":"tool-result","stdout":"","stderr":"FATAL: disk full"}"#;
        let filters = vec![NoiseFilter::new(
            "f1",
            "optional cache misses are expected",
            MatchRule {
                contains: Some("missing optional cache".to_string()),
                ..Default::default()
            },
        )];
        let report = diagnose(log, &filters, &FilterScope::Global, &SummaryWidths::default());
        assert_eq!(report.events_filtered, 1);
        assert_eq!(report.error_samples.len(), 1);
        assert!(report.error_samples[0].summary.contains("disk full"));
    }

    #[test]
    fn max_error_samples_is_bounded() {
        let mut log = String::new();
        for i in 0..20 {
            log.push_str(&format!(
                r#"{{"type":"tool-result","stdout":"","stderr":"error {i}"}}"#
            ));
            log.push('\n');
        }
        let report = diagnose(&log, &[], &FilterScope::Global, &SummaryWidths::default());
        assert_eq!(report.error_samples.len(), DEFAULT_MAX_ERROR_SAMPLES);
    }

    #[test]
    fn render_clean_report_has_no_action_required_text() {
        let report = DiagnoseReport {
            total_events: 5,
            events_filtered: 1,
            error_samples: Vec::new(),
            action_required: false,
        };
        assert!(!report.render().contains("ACTION REQUIRED"));
    }

    #[test]
    fn render_dirty_report_names_escalation_path() {
        let report = DiagnoseReport {
            total_events: 5,
            events_filtered: 0,
            error_samples: vec![ErrorSample {
                event_type: "tool-result".into(),
                summary: "boom".into(),
            }],
            action_required: true,
        };
        let rendered = report.render();
        assert!(rendered.contains("ACTION REQUIRED"));
        assert!(rendered.contains("boom"));
        assert!(rendered.contains("noise filter"));
    }
}
