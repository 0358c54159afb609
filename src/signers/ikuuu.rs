//! ikuuu VPN portal signer.
//!
//! SSPanel-style site: form login at `/auth/login` and check-in at
//! `/user/checkin`, both answering `{"ret": 1|0, "msg": ...}`. The
//! balance is the remaining traffic (GB) shown on the `/user` dashboard.
//! The site moves domains from time to time, so `base_url` is usually
//! set in config.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::{fetch_text, html, http_session, Signer, SignerKind, SiteSettings};
use crate::types::{Balance, CheckInOutcome, Credentials};

pub const BASE_URL: &str = "https://ikuuu.one";

#[derive(Debug, Deserialize)]
struct PanelReply {
    #[serde(default)]
    ret: i64,
    #[serde(default)]
    msg: String,
}

fn classify_checkin(reply: PanelReply) -> CheckInOutcome {
    if reply.ret == 1 {
        return if reply.msg.is_empty() {
            CheckInOutcome::succeeded()
        } else {
            CheckInOutcome::succeeded_with(reply.msg)
        };
    }
    if reply.msg.contains("已经签到") {
        return CheckInOutcome::AlreadyDone;
    }
    if reply.msg.is_empty() {
        CheckInOutcome::Failed("unknown error".to_string())
    } else {
        CheckInOutcome::Failed(reply.msg)
    }
}

/// Remaining traffic from the dashboard card titled "剩余流量".
///
/// The card is the heading's grandparent (`card` > `card-header` > `h4`)
/// and carries the figure in its `span.counter`.
fn remaining_traffic(page: &str) -> Option<String> {
    static HEADING: OnceLock<Selector> = OnceLock::new();
    static COUNTER: OnceLock<Selector> = OnceLock::new();
    let doc = Html::parse_document(page);
    let heading = doc
        .select(html::selector(&HEADING, "h4"))
        .find(|h4| html::text_of(*h4) == "剩余流量")?;
    let card = html::ancestor(heading, 2)?;
    let counter = card.select(html::selector(&COUNTER, "span.counter")).next()?;
    let value = html::text_of(counter);
    (!value.is_empty()).then_some(value)
}

pub struct IkuuuSigner {
    http: Client,
    site: SiteSettings,
    credentials: Credentials,
    logged_user: Option<String>,
}

impl IkuuuSigner {
    pub fn new(credentials: Credentials, site: SiteSettings) -> Result<Self> {
        let http = http_session(SignerKind::Ikuuu.platform(), site.timeout)?;
        Ok(Self {
            http,
            site,
            credentials,
            logged_user: None,
        })
    }
}

#[async_trait]
impl Signer for IkuuuSigner {
    fn platform(&self) -> &str {
        SignerKind::Ikuuu.platform()
    }

    fn username(&self) -> Option<&str> {
        self.logged_user.as_deref()
    }

    async fn authenticate(&mut self) -> Result<bool> {
        let resp = self
            .http
            .post(self.site.url("/auth/login"))
            .form(&[
                ("email", self.credentials.username.as_str()),
                ("passwd", self.credentials.password()),
            ])
            .send()
            .await
            .context("ikuuu login request failed")?;

        if !resp.status().is_success() {
            warn!(platform = self.platform(), status = %resp.status(), "Login rejected");
            return Ok(false);
        }
        let reply: PanelReply = resp.json().await.context("Failed to parse ikuuu login")?;
        if reply.ret != 1 {
            warn!(platform = self.platform(), msg = %reply.msg, "Login rejected");
            return Ok(false);
        }

        self.logged_user = Some(self.credentials.username.clone());
        info!(platform = self.platform(), "Logged in");
        Ok(true)
    }

    async fn check_in(&mut self) -> Result<CheckInOutcome> {
        let resp = self
            .http
            .post(self.site.url("/user/checkin"))
            .send()
            .await
            .context("ikuuu check-in request failed")?;
        let reply: PanelReply = resp.json().await.context("Failed to parse ikuuu check-in")?;
        debug!(platform = self.platform(), ret = reply.ret, msg = %reply.msg, "Check-in reply");
        Ok(classify_checkin(reply))
    }

    async fn read_balance(&mut self) -> Result<Option<Balance>> {
        let page = fetch_text(&self.http, &self.site.url("/user")).await?;
        Ok(remaining_traffic(&page).and_then(|raw| raw.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(raw: &str) -> PanelReply {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_checkin_success() {
        let outcome = classify_checkin(reply(r#"{"ret":1,"msg":"你获得了 512 MB流量"}"#));
        assert_eq!(outcome, CheckInOutcome::succeeded_with("你获得了 512 MB流量"));
    }

    #[test]
    fn test_checkin_already_done() {
        let outcome = classify_checkin(reply(r#"{"ret":0,"msg":"您似乎已经签到过了..."}"#));
        assert_eq!(outcome, CheckInOutcome::AlreadyDone);
    }

    #[test]
    fn test_checkin_failure() {
        let outcome = classify_checkin(reply(r#"{"ret":0,"msg":"请先登录"}"#));
        assert_eq!(outcome, CheckInOutcome::Failed("请先登录".to_string()));
        let outcome = classify_checkin(reply(r#"{}"#));
        assert_eq!(outcome, CheckInOutcome::Failed("unknown error".to_string()));
    }

    #[test]
    fn test_remaining_traffic() {
        let html = r#"
            <div class="card card-statistic-2">
              <div class="card-header"><h4>剩余流量</h4></div>
              <div class="card-body"><span class="counter">86.17</span> GB</div>
            </div>"#;
        assert_eq!(remaining_traffic(html).as_deref(), Some("86.17"));
        let balance: Balance = remaining_traffic(html).unwrap().parse().unwrap();
        assert_eq!(balance.to_string(), "86.17");
    }

    #[test]
    fn test_remaining_traffic_missing() {
        assert_eq!(remaining_traffic("<h4>会员时长</h4><span class=\"counter\">3</span>"), None);
    }

    #[test]
    fn test_remaining_traffic_reads_its_own_card() {
        // An empty traffic card must not borrow the next card's counter.
        let html = r#"
            <div class="card">
              <div class="card-header"><h4>剩余流量</h4></div>
              <div class="card-body">--</div>
            </div>
            <div class="card">
              <div class="card-header"><h4>在线设备</h4></div>
              <div class="card-body"><span class="counter">2</span></div>
            </div>"#;
        assert_eq!(remaining_traffic(html), None);
    }
}
