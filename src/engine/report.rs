//! Rendering of run results into the single text pushed per run.

use rust_decimal::Decimal;
use std::fmt;

use crate::types::{RunResult, RunStatus};

const RULE: &str = "----------------------------";

/// The aggregated run report. Entries keep signer order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    entries: Vec<String>,
}

impl Report {
    pub fn from_results(results: &[RunResult]) -> Self {
        Self {
            entries: results.iter().map(render_entry).collect(),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entries.join("\n\n"))
    }
}

/// Render one platform's block.
pub fn render_entry(result: &RunResult) -> String {
    if result.status == RunStatus::NotConfigured {
        return format!("{}: credentials not configured", result.platform);
    }

    let mut lines = vec![
        format!("{} check-in result:", result.platform),
        format!("· Time: {}", result.formatted_time()),
        format!("· Status: {}", result.status),
        format!("· Account: {}", result.username.as_deref().unwrap_or("unknown")),
    ];
    if let Some(detail) = &result.detail {
        lines.push(format!("· Detail: {detail}"));
    }
    if result.balance_tracked {
        lines.push(format!(
            "· Balance: {}",
            result
                .balance
                .map(|b| b.to_string())
                .unwrap_or_else(|| "extraction failed".to_string())
        ));
        let previous = match (result.previous_balance, result.delta()) {
            (Some(prev), Some(delta)) => format!("{prev} ({})", signed(delta)),
            (Some(prev), None) => prev.to_string(),
            (None, _) => "none".to_string(),
        };
        lines.push(format!("· Previous: {previous}"));
    }
    lines.push(RULE.to_string());

    lines.join("\n")
}

fn signed(delta: Decimal) -> String {
    if delta.is_sign_negative() && !delta.is_zero() {
        delta.to_string()
    } else {
        format!("+{delta}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn result(status: RunStatus, balance: Option<&str>, previous: Option<&str>) -> RunResult {
        RunResult {
            platform: "A".to_string(),
            status,
            username: Some("alice".to_string()),
            detail: None,
            balance: balance.map(|b| b.parse().unwrap()),
            previous_balance: previous.map(|b| b.parse().unwrap()),
            balance_tracked: true,
            timestamp: Local.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_full_entry() {
        let text = render_entry(&result(RunStatus::Succeeded, Some("150"), Some("100")));
        assert_eq!(
            text,
            "A check-in result:\n\
             · Time: 2024-05-01 08:30:00\n\
             · Status: ✅ Checked in\n\
             · Account: alice\n\
             · Balance: 150\n\
             · Previous: 100 (+50)\n\
             ----------------------------"
        );
    }

    #[test]
    fn test_missing_balance_and_previous() {
        let text = render_entry(&result(RunStatus::AlreadyDone, None, None));
        assert!(text.contains("· Status: ⏰ Already checked in today"));
        assert!(text.contains("· Balance: extraction failed"));
        assert!(text.contains("· Previous: none"));
    }

    #[test]
    fn test_negative_delta_and_detail() {
        let mut r = result(RunStatus::Succeeded, Some("12.5"), Some("20"));
        r.detail = Some("+1 GB".to_string());
        let text = render_entry(&r);
        assert!(text.contains("· Detail: +1 GB"));
        assert!(text.contains("· Previous: 20 (-7.5)"));
    }

    #[test]
    fn test_untracked_balance_has_no_balance_lines() {
        let mut r = result(RunStatus::Succeeded, None, None);
        r.balance_tracked = false;
        r.detail = Some("+50M".to_string());
        let text = render_entry(&r);
        assert!(text.contains("· Detail: +50M"));
        assert!(!text.contains("Balance"));
        assert!(!text.contains("Previous"));
        assert!(text.ends_with(RULE));
    }

    #[test]
    fn test_not_configured_is_one_line() {
        let r = RunResult::not_configured("B", None);
        assert_eq!(render_entry(&r), "B: credentials not configured");
    }

    #[test]
    fn test_report_joins_in_order() {
        let report = Report::from_results(&[
            RunResult::not_configured("X", None),
            RunResult::not_configured("Y", None),
        ]);
        assert_eq!(report.entries().len(), 2);
        assert_eq!(
            report.to_string(),
            "X: credentials not configured\n\nY: credentials not configured"
        );
        assert!(Report::default().entries().is_empty());
    }
}
