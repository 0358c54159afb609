//! Orchestrator: drives every slot through one check-in run.
//!
//! Strictly sequential: load balances once, run each signer's
//! authenticate → check-in → read-balance lifecycle in declaration order,
//! pause between signers, fold the new balances back into the store and
//! push one report. A failing or panicking signer only affects its own
//! entry.

use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};

use super::pacing::Pacing;
use super::report::Report;
use crate::notify::Notifier;
use crate::signers::{Signer, Slot};
use crate::storage::{merge_balances, BalanceMap, StateStore};
use crate::types::{Balance, CheckInOutcome, RunResult, RunStatus};

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub results: Vec<RunResult>,
    pub report: Report,
    /// Whether the notifier accepted the report.
    pub notified: bool,
}

impl RunSummary {
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_failure()).count()
    }
}

pub struct Orchestrator<'a> {
    store: &'a StateStore,
    notifier: &'a dyn Notifier,
    pacing: Pacing,
}

/// What a signer's lifecycle yielded before it is stamped into a `RunResult`.
struct Attempt {
    status: RunStatus,
    detail: Option<String>,
    balance: Option<Balance>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a StateStore, notifier: &'a dyn Notifier, pacing: Pacing) -> Self {
        Self {
            store,
            notifier,
            pacing,
        }
    }

    /// Run every slot once and push the report.
    ///
    /// Only a failure to persist balances is returned as `Err`, and only
    /// after the report has been pushed.
    pub async fn run(&self, slots: Vec<Slot>) -> Result<RunSummary> {
        let mut balances = self.store.load();
        info!(
            slots = slots.len(),
            known_balances = balances.len(),
            "Starting check-in run"
        );

        // No pause after the last configured slot: nothing left to space out.
        let last_configured = slots.iter().rposition(|s| s.signer.is_some());
        let mut results = Vec::with_capacity(slots.len());
        for (idx, slot) in slots.into_iter().enumerate() {
            let ran_signer = slot.signer.is_some();
            let result = self.run_slot(slot, &balances).await;
            info!(
                platform = %result.platform,
                status = %result.status,
                balance = ?result.balance.map(|b| b.to_string()),
                "Signer finished"
            );
            results.push(result);

            if ran_signer && Some(idx) != last_configured {
                self.pacing.pause().await;
            }
        }

        let updated = merge_balances(&mut balances, &results);
        let saved = self.persist(&balances, updated);

        let report = Report::from_results(&results);
        let notified = self.notify(&report).await;

        saved?;
        Ok(RunSummary {
            results,
            report,
            notified,
        })
    }

    async fn run_slot(&self, slot: Slot, balances: &BalanceMap) -> RunResult {
        let previous = balances.get(&slot.platform).copied();
        let Some(mut signer) = slot.signer else {
            return RunResult::not_configured(slot.platform, previous);
        };

        info!(platform = %slot.platform, "Running signer");
        let attempt = match AssertUnwindSafe(lifecycle(signer.as_mut()))
            .catch_unwind()
            .await
        {
            Ok(Ok(attempt)) => attempt,
            Ok(Err(e)) => {
                error!(platform = %slot.platform, error = %format!("{e:#}"), "Signer failed");
                Attempt {
                    status: RunStatus::Exception(format!("{e:#}")),
                    detail: None,
                    balance: None,
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(platform = %slot.platform, panic = %message, "Signer panicked");
                Attempt {
                    status: RunStatus::Exception(message),
                    detail: None,
                    balance: None,
                }
            }
        };

        RunResult {
            platform: slot.platform,
            status: attempt.status,
            username: signer.username().map(str::to_string),
            detail: attempt.detail,
            balance: attempt.balance,
            previous_balance: previous,
            balance_tracked: signer.tracks_balance(),
            timestamp: chrono::Local::now(),
        }
    }

    fn persist(&self, balances: &BalanceMap, updated: usize) -> Result<()> {
        match self.store.save(balances) {
            Ok(()) => {
                info!(path = %self.store.path().display(), updated, "Balances saved");
                Ok(())
            }
            Err(e) => {
                error!(path = %self.store.path().display(), error = %format!("{e:#}"), "Failed to save balances");
                Err(e)
            }
        }
    }

    async fn notify(&self, report: &Report) -> bool {
        match self.notifier.send(&report.to_string()).await {
            Ok(()) => {
                info!(channel = self.notifier.name(), "Notification sent");
                true
            }
            Err(e) => {
                warn!(channel = self.notifier.name(), error = %format!("{e:#}"), "Notification failed");
                false
            }
        }
    }
}

async fn lifecycle(signer: &mut dyn Signer) -> Result<Attempt> {
    if !signer.authenticate().await? {
        return Ok(Attempt {
            status: RunStatus::AuthFailed,
            detail: None,
            balance: None,
        });
    }

    let outcome = signer.check_in().await?;
    let detail = match &outcome {
        CheckInOutcome::Succeeded { detail } => detail.clone(),
        _ => None,
    };

    // Read even after "already done" or a refused check-in.
    let balance = if !signer.tracks_balance() {
        None
    } else {
        match signer.read_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(platform = signer.platform(), error = %format!("{e:#}"), "Balance read failed");
                None
            }
        }
    };

    Ok(Attempt {
        status: outcome.into(),
        detail,
        balance,
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}
