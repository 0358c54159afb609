//! Shared types for the check-in runner.
//!
//! These types form the data model used across all modules, so that
//! signers, storage, notification and the engine can depend on them
//! without depending on each other.

use chrono::{DateTime, Local};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp format used in every report entry.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Balance
// ---------------------------------------------------------------------------

/// A platform reward counter (coins, credit, remaining traffic).
///
/// Always non-negative. Serialized as a decimal string (`"150"`,
/// `"12.50"`) so the state file round-trips without precision loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Balance(Decimal);

impl Balance {
    pub fn new(value: Decimal) -> Result<Self, CheckinError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(CheckinError::InvalidBalance(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Balance {
    type Err = CheckinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value = Decimal::from_str(trimmed)
            .map_err(|_| CheckinError::InvalidBalance(trimmed.to_string()))?;
        Self::new(value)
    }
}

impl TryFrom<String> for Balance {
    type Error = CheckinError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Balance> for String {
    fn from(b: Balance) -> Self {
        b.0.to_string()
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// A username/password pair for one platform.
///
/// The password is wrapped in `SecretString` so it never shows up in
/// `Debug` output or logs.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

// ---------------------------------------------------------------------------
// Check-in outcome
// ---------------------------------------------------------------------------

/// Classification of a platform's daily action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInOutcome {
    /// Checked in during this run. `detail` carries the reward text when
    /// the site reports one.
    Succeeded { detail: Option<String> },
    /// The site says today's check-in was already done.
    AlreadyDone,
    /// The page did not look like anything we know how to read. Could be
    /// "already done" or a layout change; we don't guess.
    Unrecognized(String),
    /// The site refused the check-in.
    Failed(String),
}

impl CheckInOutcome {
    pub fn succeeded() -> Self {
        Self::Succeeded { detail: None }
    }

    pub fn succeeded_with(detail: impl Into<String>) -> Self {
        Self::Succeeded {
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Run status / result
// ---------------------------------------------------------------------------

/// Terminal status of one signer for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    NotConfigured,
    Succeeded,
    AlreadyDone,
    /// Check-in page layout not recognised (extraction failed).
    Unrecognized(String),
    AuthFailed,
    Failed(String),
    Exception(String),
}

impl RunStatus {
    /// Whether this status counts as a failure. "Already done" and
    /// "unrecognised" never do.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RunStatus::AuthFailed | RunStatus::Failed(_) | RunStatus::Exception(_)
        )
    }
}

impl From<CheckInOutcome> for RunStatus {
    fn from(outcome: CheckInOutcome) -> Self {
        match outcome {
            CheckInOutcome::Succeeded { .. } => RunStatus::Succeeded,
            CheckInOutcome::AlreadyDone => RunStatus::AlreadyDone,
            CheckInOutcome::Unrecognized(reason) => RunStatus::Unrecognized(reason),
            CheckInOutcome::Failed(reason) => RunStatus::Failed(reason),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::NotConfigured => write!(f, "⚙️ Not configured"),
            RunStatus::Succeeded => write!(f, "✅ Checked in"),
            RunStatus::AlreadyDone => write!(f, "⏰ Already checked in today"),
            RunStatus::Unrecognized(reason) => write!(f, "⚠️ Page not recognised: {reason}"),
            RunStatus::AuthFailed => write!(f, "❌ Login failed"),
            RunStatus::Failed(reason) => write!(f, "❌ Check-in failed: {reason}"),
            RunStatus::Exception(reason) => write!(f, "‼️ Exception: {reason}"),
        }
    }
}

/// Outcome of one signer for one run. Immutable once produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Platform display name (also the state-file key).
    pub platform: String,
    pub status: RunStatus,
    /// Resolved display username, falling back to the configured login.
    pub username: Option<String>,
    /// Reward text reported by the site on a fresh check-in.
    pub detail: Option<String>,
    pub balance: Option<Balance>,
    pub previous_balance: Option<Balance>,
    /// False for platforms with no balance to show (no balance lines).
    pub balance_tracked: bool,
    pub timestamp: DateTime<Local>,
}

impl RunResult {
    /// Result for a platform whose credentials are absent.
    pub fn not_configured(platform: impl Into<String>, previous: Option<Balance>) -> Self {
        Self {
            platform: platform.into(),
            status: RunStatus::NotConfigured,
            username: None,
            detail: None,
            balance: None,
            previous_balance: previous,
            balance_tracked: true,
            timestamp: Local::now(),
        }
    }

    /// Change since the previous run, when both values are known.
    pub fn delta(&self) -> Option<Decimal> {
        match (self.balance, self.previous_balance) {
            (Some(now), Some(before)) => Some(now.value() - before.value()),
            _ => None,
        }
    }

    pub fn formatted_time(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum CheckinError {
    #[error("Invalid balance value: {0:?}")]
    InvalidBalance(String),

    #[error("Site error ({platform}): {message}")]
    Site { platform: String, message: String },

    #[error("Notification rejected ({channel}): errcode {code}, {message}")]
    NotifyRejected {
        channel: String,
        code: i64,
        message: String,
    },
}

impl CheckinError {
    pub fn site(platform: &str, message: impl Into<String>) -> Self {
        Self::Site {
            platform: platform.to_string(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // -- Balance tests --

    #[test]
    fn test_balance_parses_integer_and_decimal() {
        assert_eq!("150".parse::<Balance>().unwrap().value(), dec!(150));
        assert_eq!(" 12.50 ".parse::<Balance>().unwrap().value(), dec!(12.50));
    }

    #[test]
    fn test_balance_rejects_garbage_and_negative() {
        assert!("获取失败".parse::<Balance>().is_err());
        assert!("".parse::<Balance>().is_err());
        assert!("-3".parse::<Balance>().is_err());
    }

    #[test]
    fn test_balance_keeps_scale_in_string_form() {
        let b: Balance = "12.50".parse().unwrap();
        assert_eq!(String::from(b), "12.50");
        assert_eq!(b.to_string(), "12.50");
    }

    #[test]
    fn test_balance_serializes_as_string() {
        let b: Balance = "100".parse().unwrap();
        assert_eq!(serde_json::to_string(&b).unwrap(), "\"100\"");
        let back: Balance = serde_json::from_str("\"100\"").unwrap();
        assert_eq!(back, b);
        assert!(serde_json::from_str::<Balance>("\"abc\"").is_err());
    }

    // -- Credentials tests --

    #[test]
    fn test_credentials_debug_hides_password() {
        let c = Credentials::new("alice", "hunter2");
        let dbg = format!("{c:?}");
        assert!(dbg.contains("alice"));
        assert!(!dbg.contains("hunter2"));
        assert_eq!(c.password(), "hunter2");
    }

    // -- Status tests --

    #[test]
    fn test_already_done_is_not_failure() {
        assert!(!RunStatus::AlreadyDone.is_failure());
        assert!(!RunStatus::NotConfigured.is_failure());
        assert!(!RunStatus::Unrecognized("no form".into()).is_failure());
        assert!(RunStatus::AuthFailed.is_failure());
        assert!(RunStatus::Exception("boom".into()).is_failure());
    }

    #[test]
    fn test_outcome_to_status() {
        assert_eq!(
            RunStatus::from(CheckInOutcome::succeeded_with("+1 GB")),
            RunStatus::Succeeded
        );
        assert_eq!(
            RunStatus::from(CheckInOutcome::Failed("closed".into())),
            RunStatus::Failed("closed".into())
        );
    }

    #[test]
    fn test_delta() {
        let mut r = RunResult::not_configured("A", Some("100".parse().unwrap()));
        assert_eq!(r.delta(), None);
        r.balance = Some("150".parse().unwrap());
        assert_eq!(r.delta(), Some(dec!(50)));
    }
}
