//! Mock signer and notifier for integration testing.
//!
//! Provides a deterministic `Signer` whose behaviour at each lifecycle
//! stage is scripted from test code, plus a `Notifier` that records
//! every report it is handed. Everything is in-memory.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use checkin::notify::Notifier;
use checkin::signers::{Signer, Slot};
use checkin::types::{Balance, CheckInOutcome};

/// Lifecycle stage at which a mock signer misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Authenticate,
    CheckIn,
    ReadBalance,
}

#[derive(Debug, Clone)]
enum Fault {
    Error(Stage, String),
    Panic(Stage),
}

/// Shared record of which signer methods were called, in order.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct MockSigner {
    platform: String,
    username: String,
    accepts_login: bool,
    outcome: CheckInOutcome,
    balance: Option<Balance>,
    fault: Option<Fault>,
    logged_in: bool,
    calls: CallLog,
}

impl MockSigner {
    /// A signer that logs in, checks in successfully and reports `balance`.
    pub fn new(platform: &str, balance: Option<&str>, calls: &CallLog) -> Self {
        Self {
            platform: platform.to_string(),
            username: format!("{platform}-user"),
            accepts_login: true,
            outcome: CheckInOutcome::succeeded(),
            balance: balance.map(|b| b.parse().expect("valid test balance")),
            fault: None,
            logged_in: false,
            calls: calls.clone(),
        }
    }

    pub fn with_outcome(mut self, outcome: CheckInOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Make `authenticate` return `Ok(false)`.
    pub fn rejecting_login(mut self) -> Self {
        self.accepts_login = false;
        self
    }

    pub fn failing_at(mut self, stage: Stage, msg: &str) -> Self {
        self.fault = Some(Fault::Error(stage, msg.to_string()));
        self
    }

    pub fn panicking_at(mut self, stage: Stage) -> Self {
        self.fault = Some(Fault::Panic(stage));
        self
    }

    pub fn into_slot(self) -> Slot {
        Slot::ready(Box::new(self))
    }

    fn enter(&self, stage: Stage) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{stage:?}", self.platform));
        match &self.fault {
            Some(Fault::Error(at, msg)) if *at == stage => Err(anyhow!("{msg}")),
            Some(Fault::Panic(at)) if *at == stage => {
                panic!("{} blew up during {stage:?}", self.platform)
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Signer for MockSigner {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn username(&self) -> Option<&str> {
        self.logged_in.then_some(self.username.as_str())
    }

    async fn authenticate(&mut self) -> Result<bool> {
        self.enter(Stage::Authenticate)?;
        self.logged_in = self.accepts_login;
        Ok(self.accepts_login)
    }

    async fn check_in(&mut self) -> Result<CheckInOutcome> {
        self.enter(Stage::CheckIn)?;
        Ok(self.outcome.clone())
    }

    async fn read_balance(&mut self) -> Result<Option<Balance>> {
        self.enter(Stage::ReadBalance)?;
        Ok(self.balance)
    }
}

/// Notifier that keeps every report it receives.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    fail_with: Option<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the report, then reject it.
    pub fn failing(msg: &str) -> Self {
        Self {
            fail_with: Some(msg.to_string()),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, content: &str) -> Result<()> {
        self.sent.lock().unwrap().push(content.to_string());
        match &self.fail_with {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_signer_happy_path() {
        let calls = CallLog::default();
        let mut signer = MockSigner::new("A", Some("10"), &calls);
        assert_eq!(signer.username(), None);
        assert!(signer.authenticate().await.unwrap());
        assert_eq!(signer.username(), Some("A-user"));
        assert_eq!(signer.check_in().await.unwrap(), CheckInOutcome::succeeded());
        assert_eq!(signer.read_balance().await.unwrap().unwrap().to_string(), "10");
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["A:Authenticate", "A:CheckIn", "A:ReadBalance"]
        );
    }

    #[tokio::test]
    async fn test_mock_signer_fault_only_at_its_stage() {
        let calls = CallLog::default();
        let mut signer = MockSigner::new("A", None, &calls).failing_at(Stage::CheckIn, "HTTP 502");
        assert!(signer.authenticate().await.is_ok());
        let err = signer.check_in().await.unwrap_err();
        assert!(err.to_string().contains("HTTP 502"));
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::failing("errcode 60020");
        assert!(notifier.send("report").await.is_err());
        assert_eq!(notifier.sent(), vec!["report".to_string()]);
    }
}
