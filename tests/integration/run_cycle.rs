//! End-to-end runs of the orchestrator against mock signers, a real
//! state file in a temp directory and a recording notifier.

use std::collections::HashMap;
use std::fs;

use tempfile::{tempdir, TempDir};

use checkin::config::AppConfig;
use checkin::engine::{Orchestrator, Pacing, RunSummary};
use checkin::signers::{build_slots, Slot, SignerKind};
use checkin::storage::StateStore;
use checkin::types::{CheckInOutcome, RunStatus};

use crate::mock_signer::{CallLog, MockSigner, RecordingNotifier, Stage};

/// A state file in a fresh temp directory, removed with the directory.
struct TempState {
    dir: TempDir,
}

impl TempState {
    fn new() -> Self {
        Self {
            dir: tempdir().unwrap(),
        }
    }

    fn store(&self) -> StateStore {
        StateStore::new(self.dir.path().join("last_coins.json"))
    }

    fn write(&self, json: &str) {
        fs::write(self.dir.path().join("last_coins.json"), json).unwrap();
    }

    fn read_json(&self) -> serde_json::Value {
        let raw = fs::read_to_string(self.dir.path().join("last_coins.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }
}

async fn run(state: &TempState, notifier: &RecordingNotifier, slots: Vec<Slot>) -> RunSummary {
    Orchestrator::new(&state.store(), notifier, Pacing::none())
        .run(slots)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_failure_at_every_stage_does_not_stop_later_signers() {
    let state = TempState::new();
    let notifier = RecordingNotifier::new();
    let calls = CallLog::default();

    let slots = vec![
        MockSigner::new("auth-error", None, &calls)
            .failing_at(Stage::Authenticate, "connection refused")
            .into_slot(),
        MockSigner::new("rejected", None, &calls)
            .rejecting_login()
            .into_slot(),
        MockSigner::new("checkin-panic", None, &calls)
            .panicking_at(Stage::CheckIn)
            .into_slot(),
        MockSigner::new("balance-error", Some("9"), &calls)
            .failing_at(Stage::ReadBalance, "layout changed")
            .into_slot(),
        MockSigner::new("ok", Some("42"), &calls).into_slot(),
    ];
    let summary = run(&state, &notifier, slots).await;

    let statuses: Vec<_> = summary.results.iter().map(|r| r.status.clone()).collect();
    assert!(matches!(&statuses[0], RunStatus::Exception(m) if m.contains("connection refused")));
    assert_eq!(statuses[1], RunStatus::AuthFailed);
    assert!(matches!(&statuses[2], RunStatus::Exception(m) if m.contains("blew up")));
    // A failed balance read only loses the balance.
    assert_eq!(statuses[3], RunStatus::Succeeded);
    assert_eq!(summary.results[3].balance, None);
    assert_eq!(statuses[4], RunStatus::Succeeded);
    assert_eq!(summary.results[4].username.as_deref(), Some("ok-user"));

    // The rejected login never reaches check-in.
    let calls = calls.lock().unwrap().clone();
    assert!(!calls.iter().any(|c| c == "rejected:CheckIn"));
    assert!(calls.contains(&"ok:ReadBalance".to_string()));

    assert_eq!(notifier.sent().len(), 1);
    assert!(summary.notified);
    assert_eq!(state.read_json(), serde_json::json!({"ok": "42"}));
}

#[tokio::test]
async fn test_no_credentials_reports_every_platform_unconfigured() {
    let state = TempState::new();
    let notifier = RecordingNotifier::new();

    let slots = build_slots(&AppConfig::default(), &|_| None).unwrap();
    let summary = run(&state, &notifier, slots).await;

    assert_eq!(summary.results.len(), SignerKind::ALL.len());
    assert!(summary
        .results
        .iter()
        .all(|r| r.status == RunStatus::NotConfigured));

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    let entries: Vec<_> = sent[0].split("\n\n").collect();
    assert_eq!(entries.len(), SignerKind::ALL.len());
    for (entry, kind) in entries.iter().zip(SignerKind::ALL) {
        assert_eq!(*entry, format!("{}: credentials not configured", kind.platform()));
    }
}

#[tokio::test]
async fn test_balances_merge_into_existing_state() {
    let state = TempState::new();
    state.write(r#"{"A": "100"}"#);
    let notifier = RecordingNotifier::new();
    let calls = CallLog::default();

    let summary = run(
        &state,
        &notifier,
        vec![
            MockSigner::new("A", Some("150"), &calls).into_slot(),
            MockSigner::new("B", Some("5"), &calls).into_slot(),
        ],
    )
    .await;

    assert_eq!(state.read_json(), serde_json::json!({"A": "150", "B": "5"}));
    let a = &summary.results[0];
    assert_eq!(a.previous_balance.map(|b| b.to_string()).as_deref(), Some("100"));
    assert!(notifier.sent()[0].contains("· Previous: 100 (+50)"));
    assert!(notifier.sent()[0].contains("· Previous: none"));
}

#[tokio::test]
async fn test_already_done_without_balance_is_not_a_failure() {
    let state = TempState::new();
    state.write(r#"{"A": "7"}"#);
    let notifier = RecordingNotifier::new();
    let calls = CallLog::default();

    let summary = run(
        &state,
        &notifier,
        vec![MockSigner::new("A", None, &calls)
            .with_outcome(CheckInOutcome::AlreadyDone)
            .into_slot()],
    )
    .await;

    let result = &summary.results[0];
    assert_eq!(result.status, RunStatus::AlreadyDone);
    assert!(!result.status.is_failure());
    assert_eq!(summary.failures(), 0);
    // The balance was still attempted.
    assert!(calls.lock().unwrap().contains(&"A:ReadBalance".to_string()));
    // No fresh value, so the stored one is kept.
    assert_eq!(state.read_json(), serde_json::json!({"A": "7"}));
    assert!(notifier.sent()[0].contains("Already checked in today"));
}

#[tokio::test]
async fn test_corrupt_state_is_replaced_by_fresh_write() {
    let state = TempState::new();
    state.write("{\"A\": 1");
    let notifier = RecordingNotifier::new();
    let calls = CallLog::default();

    let summary = run(
        &state,
        &notifier,
        vec![MockSigner::new("B", Some("3"), &calls).into_slot()],
    )
    .await;

    assert_eq!(summary.results[0].previous_balance, None);
    assert_eq!(state.read_json(), serde_json::json!({"B": "3"}));
}

#[tokio::test]
async fn test_notifier_rejection_keeps_run_successful() {
    let state = TempState::new();
    let notifier = RecordingNotifier::failing("errcode 40014, invalid access_token");
    let calls = CallLog::default();

    let summary = run(
        &state,
        &notifier,
        vec![MockSigner::new("A", Some("1"), &calls).into_slot()],
    )
    .await;

    assert!(!summary.notified);
    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(state.read_json(), serde_json::json!({"A": "1"}));
}

#[tokio::test]
async fn test_unrecognised_page_is_reported_but_not_failed() {
    let state = TempState::new();
    let notifier = RecordingNotifier::new();
    let calls = CallLog::default();

    let summary = run(
        &state,
        &notifier,
        vec![MockSigner::new("A", Some("12"), &calls)
            .with_outcome(CheckInOutcome::Unrecognized("no sign form".into()))
            .into_slot()],
    )
    .await;

    assert_eq!(summary.failures(), 0);
    assert!(notifier.sent()[0].contains("Page not recognised: no sign form"));
    assert_eq!(state.read_json(), serde_json::json!({"A": "12"}));
}

#[tokio::test(start_paused = true)]
async fn test_pacing_only_between_signers() {
    let state = TempState::new();
    let notifier = RecordingNotifier::new();
    let calls = CallLog::default();

    let start = tokio::time::Instant::now();
    Orchestrator::new(&state.store(), &notifier, Pacing::between(2, 2))
        .run(vec![
            MockSigner::new("A", None, &calls).into_slot(),
            MockSigner::new("B", None, &calls).into_slot(),
            MockSigner::new("C", None, &calls).into_slot(),
        ])
        .await
        .unwrap();

    // Two gaps for three signers.
    assert_eq!(start.elapsed().as_secs(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_no_pause_after_last_configured_signer() {
    let state = TempState::new();
    let notifier = RecordingNotifier::new();
    let calls = CallLog::default();

    let start = tokio::time::Instant::now();
    Orchestrator::new(&state.store(), &notifier, Pacing::between(2, 2))
        .run(vec![
            MockSigner::new("A", None, &calls).into_slot(),
            MockSigner::new("B", None, &calls).into_slot(),
            Slot::unconfigured("C"),
        ])
        .await
        .unwrap();
    // One gap: A to B. Nothing runs after B.
    assert_eq!(start.elapsed().as_secs(), 2);

    let start = tokio::time::Instant::now();
    Orchestrator::new(&state.store(), &notifier, Pacing::between(2, 2))
        .run(vec![
            MockSigner::new("A", None, &calls).into_slot(),
            Slot::unconfigured("B"),
        ])
        .await
        .unwrap();
    assert_eq!(start.elapsed().as_secs(), 0);
}

#[tokio::test]
async fn test_each_account_keeps_its_own_state_entry() {
    let state = TempState::new();
    state.write(r#"{"MEFRP": "10", "MEFRP (bob)": "20"}"#);
    let notifier = RecordingNotifier::new();
    let calls = CallLog::default();

    let summary = run(
        &state,
        &notifier,
        vec![
            Slot::labelled("MEFRP", Box::new(MockSigner::new("MEFRP", Some("11"), &calls))),
            Slot::labelled(
                "MEFRP (bob)",
                Box::new(MockSigner::new("MEFRP", Some("25"), &calls)),
            ),
        ],
    )
    .await;

    assert_eq!(summary.results[0].platform, "MEFRP");
    assert_eq!(summary.results[1].platform, "MEFRP (bob)");
    assert_eq!(
        state.read_json(),
        serde_json::json!({"MEFRP": "11", "MEFRP (bob)": "25"})
    );
    let sent = &notifier.sent()[0];
    assert!(sent.contains("MEFRP check-in result:"));
    assert!(sent.contains("MEFRP (bob) check-in result:"));
    assert!(sent.contains("· Previous: 20 (+5)"));
}

#[tokio::test]
async fn test_mismatched_account_lists_are_reported_unconfigured() {
    let state = TempState::new();
    let notifier = RecordingNotifier::new();
    let env: HashMap<&str, &str> = [("Mez", "alice|bob"), ("Mem", "only-one")].into();

    let slots = build_slots(&AppConfig::default(), &|key| {
        env.get(key).map(|v| v.to_string())
    })
    .unwrap();
    let summary = run(&state, &notifier, slots).await;

    let mefrp = summary
        .results
        .iter()
        .find(|r| r.platform == "MEFRP")
        .unwrap();
    assert_eq!(mefrp.status, RunStatus::NotConfigured);
    assert!(notifier.sent()[0].contains("MEFRP: credentials not configured"));
}
