//! Outbound notification.
//!
//! Defines the `Notifier` trait and provides:
//! - `WeComNotifier`: WeCom (企业微信) app message, token then send
//! - `LogNotifier`: writes the report to the log when no push channel
//!   is configured

pub mod wecom;

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{info, warn};

use crate::config::NotifierConfig;
use wecom::WeComNotifier;

/// Abstraction over a push channel that delivers one text report.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `content`. An `Err` means the message was not delivered.
    async fn send(&self, content: &str) -> Result<()>;

    /// Channel name for logging.
    fn name(&self) -> &'static str;
}

/// Fallback channel: the report only goes to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, content: &str) -> Result<()> {
        info!(channel = self.name(), "Report:\n{content}");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Pick the notifier for this run.
///
/// Falls back to `LogNotifier` when push is disabled or any of the WeCom
/// variables is missing.
pub fn build_notifier(
    cfg: &NotifierConfig,
    timeout_secs: u64,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Box<dyn Notifier>> {
    if !cfg.enabled {
        info!("Push notification disabled, report goes to the log only");
        return Ok(Box::new(LogNotifier));
    }

    let resolve = |env: &str| lookup(env).filter(|v| !v.trim().is_empty());
    match (
        resolve(&cfg.corp_id_env),
        resolve(&cfg.secret_env),
        resolve(&cfg.agent_id_env),
    ) {
        (Some(corp_id), Some(secret), Some(agent_id)) => Ok(Box::new(WeComNotifier::new(
            corp_id,
            secret,
            agent_id,
            cfg,
            timeout_secs,
        )?)),
        _ => {
            warn!(
                corp_id_env = %cfg.corp_id_env,
                secret_env = %cfg.secret_env,
                agent_id_env = %cfg.agent_id_env,
                "WeCom settings incomplete, report goes to the log only"
            );
            Ok(Box::new(LogNotifier))
        }
    }
}
