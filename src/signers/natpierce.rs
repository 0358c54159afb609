//! 皎月连 (natpierce.cn) signer.
//!
//! Intranet-tunnel service whose free tier is extended by checking in
//! once the current service period runs out. Login is a form POST
//! answering `{"code": 200, "url": ...}`; the sign page either shows a
//! `#qiandao` button or says the service has not expired yet. What the
//! account holds is an expiry date rather than a number, so there is no
//! balance; the expiry goes into the check-in detail instead.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ORIGIN, REFERER};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::{fetch_text, html, http_session, Signer, SignerKind, SiteSettings};
use crate::types::{Balance, CheckInOutcome, Credentials};

pub const BASE_URL: &str = "https://www.natpierce.cn";

const LOGIN_PATH: &str = "pc/login/login.html";
const HOME_PATH: &str = "pc/index/index.html";
const SIGN_PAGE_PATH: &str = "pc/sign/index.html";
const SIGN_PATH: &str = "pc/sign/qiandao_bf.html";

#[derive(Debug, Deserialize)]
struct SiteReply {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    url: Option<String>,
}

/// What the sign page offers today.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SignPage {
    /// The check-in button is live.
    Ready,
    /// Service period still running; nothing to do.
    NotDue,
    /// Button present but already used.
    Done,
    Unknown(String),
}

fn inspect_sign_page(page: &str) -> SignPage {
    static PANEL: OnceLock<Selector> = OnceLock::new();
    static BUTTON: OnceLock<Selector> = OnceLock::new();
    let doc = Html::parse_document(page);

    // The service notice sits in a `div` next to the `.d_qd` panel.
    if let Some(panel) = doc.select(html::selector(&PANEL, ".d_qd")).next() {
        let notice = panel
            .parent()
            .into_iter()
            .flat_map(|parent| parent.children())
            .filter_map(ElementRef::wrap)
            .filter(|el| *el != panel && el.value().name() == "div")
            .any(|el| html::text_of(el).contains("服务尚未到期"));
        if notice {
            return SignPage::NotDue;
        }
    }

    let Some(button) = doc.select(html::selector(&BUTTON, "#qiandao")).next() else {
        return SignPage::Unknown("sign button not found".to_string());
    };
    let label = html::text_of(button);
    if label.contains("已签到") {
        SignPage::Done
    } else if label.contains("签到") {
        SignPage::Ready
    } else {
        SignPage::Unknown(format!("sign button reads {label:?}"))
    }
}

/// Account summary from the `.d_hao` block (one `label：value` per line).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AccountInfo {
    username: Option<String>,
    expires: Option<String>,
    next_sign: Option<String>,
}

impl AccountInfo {
    fn scrape(page: &str) -> Option<Self> {
        static INFO: OnceLock<Selector> = OnceLock::new();
        let doc = Html::parse_document(page);
        let block = doc.select(html::selector(&INFO, ".d_hao")).next()?;
        let lines: Vec<String> = block
            .text()
            .map(html::collapse)
            .filter(|line| !line.is_empty())
            .collect();
        let field = |label: &str| {
            lines
                .iter()
                .find_map(|line| line.split_once(label).map(|(_, v)| v.trim().to_string()))
                .filter(|v| !v.is_empty())
        };

        let info = Self {
            username: field("用户名："),
            expires: field("服务到期时间："),
            next_sign: field("下次可签到时间："),
        };
        (info != Self::default()).then_some(info)
    }

    fn summary(&self) -> Option<String> {
        let parts: Vec<String> = [
            self.expires.as_ref().map(|e| format!("service until {e}")),
            self.next_sign.as_ref().map(|n| format!("next check-in {n}")),
        ]
        .into_iter()
        .flatten()
        .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

fn classify_sign_reply(body: &str) -> CheckInOutcome {
    match serde_json::from_str::<SiteReply>(body) {
        Ok(reply) if reply.code == 200 => CheckInOutcome::succeeded(),
        Ok(reply) if reply.message.is_empty() => {
            CheckInOutcome::Failed(format!("code {}", reply.code))
        }
        Ok(reply) => CheckInOutcome::Failed(reply.message),
        Err(_) => CheckInOutcome::Unrecognized("check-in reply is not JSON".to_string()),
    }
}

pub struct NatpierceSigner {
    http: Client,
    site: SiteSettings,
    credentials: Credentials,
    logged_user: Option<String>,
}

impl NatpierceSigner {
    pub fn new(credentials: Credentials, site: SiteSettings) -> Result<Self> {
        let http = http_session(SignerKind::Natpierce.platform(), site.timeout)?;
        Ok(Self {
            http,
            site,
            credentials,
            logged_user: None,
        })
    }

    /// Re-read the sign page for the account summary. Best effort.
    async fn account_info(&mut self) -> Option<AccountInfo> {
        let page = match fetch_text(&self.http, &self.site.url(SIGN_PAGE_PATH)).await {
            Ok(page) => page,
            Err(e) => {
                debug!(error = %format!("{e:#}"), "Account summary unavailable");
                return None;
            }
        };
        let info = AccountInfo::scrape(&page)?;
        if let Some(name) = &info.username {
            self.logged_user = Some(name.clone());
        }
        Some(info)
    }
}

#[async_trait]
impl Signer for NatpierceSigner {
    fn platform(&self) -> &str {
        SignerKind::Natpierce.platform()
    }

    fn username(&self) -> Option<&str> {
        self.logged_user.as_deref()
    }

    fn tracks_balance(&self) -> bool {
        false
    }

    async fn authenticate(&mut self) -> Result<bool> {
        let login_url = self.site.url(LOGIN_PATH);
        let resp = self
            .http
            .post(&login_url)
            .header(ORIGIN, self.site.base_url.as_str())
            .header(REFERER, login_url.as_str())
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&[
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password()),
            ])
            .send()
            .await
            .context("natpierce login request failed")?;
        if !resp.status().is_success() {
            warn!(platform = self.platform(), status = %resp.status(), "Login rejected");
            return Ok(false);
        }
        let reply: SiteReply = resp.json().await.context("Failed to parse natpierce login")?;
        if reply.code != 200 {
            warn!(platform = self.platform(), code = reply.code, msg = %reply.message, "Login rejected");
            return Ok(false);
        }

        let landing = reply.url.unwrap_or_else(|| self.site.url(HOME_PATH));
        fetch_text(&self.http, &landing)
            .await
            .context("Failed to open page after login")?;

        self.logged_user = Some(self.credentials.username.clone());
        info!(platform = self.platform(), "Logged in");
        Ok(true)
    }

    async fn check_in(&mut self) -> Result<CheckInOutcome> {
        let page = fetch_text(&self.http, &self.site.url(SIGN_PAGE_PATH)).await?;
        match inspect_sign_page(&page) {
            SignPage::Ready => {}
            SignPage::NotDue | SignPage::Done => {
                // Still pick up the display name for the report.
                self.account_info().await;
                return Ok(CheckInOutcome::AlreadyDone);
            }
            SignPage::Unknown(reason) => return Ok(CheckInOutcome::Unrecognized(reason)),
        }

        let body = self
            .http
            .post(self.site.url(SIGN_PATH))
            .header(ORIGIN, self.site.base_url.as_str())
            .header(REFERER, self.site.url(SIGN_PAGE_PATH))
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .context("natpierce check-in request failed")?
            .text()
            .await
            .context("Failed to read natpierce check-in reply")?;
        debug!(platform = self.platform(), bytes = body.len(), "Check-in reply");

        let outcome = classify_sign_reply(&body);
        if !matches!(outcome, CheckInOutcome::Succeeded { .. }) {
            return Ok(outcome);
        }
        Ok(match self.account_info().await.and_then(|i| i.summary()) {
            Some(summary) => CheckInOutcome::succeeded_with(summary),
            None => outcome,
        })
    }

    async fn read_balance(&mut self) -> Result<Option<Balance>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGN_PAGE: &str = r#"
        <div class="sign_box">
          <div class="d_qd"><button id="qiandao">立即签到</button></div>
          <div>服务已到期，请签到续期</div>
        </div>
        <div class="d_hao">
          用户名：&nbsp;tunnel_user<br>
          服务到期时间：2024-05-08 10:00:00<br/>
          下次可签到时间：2024-05-08 10:00:00
        </div>"#;

    #[test]
    fn test_sign_page_ready() {
        assert_eq!(inspect_sign_page(SIGN_PAGE), SignPage::Ready);
    }

    #[test]
    fn test_sign_page_not_due() {
        let page = r#"
            <div>
              <div class="d_qd"><button id="qiandao">签到</button></div>
              <div>服务尚未到期，到期后可签到</div>
            </div>"#;
        assert_eq!(inspect_sign_page(page), SignPage::NotDue);
    }

    #[test]
    fn test_sign_page_done_and_unknown() {
        assert_eq!(
            inspect_sign_page(r#"<a id="qiandao">今日已签到</a>"#),
            SignPage::Done
        );
        assert!(matches!(
            inspect_sign_page("<p>维护中</p>"),
            SignPage::Unknown(reason) if reason == "sign button not found"
        ));
        assert!(matches!(
            inspect_sign_page(r#"<a id="qiandao">续费</a>"#),
            SignPage::Unknown(_)
        ));
    }

    #[test]
    fn test_account_info() {
        let info = AccountInfo::scrape(SIGN_PAGE).unwrap();
        assert_eq!(info.username.as_deref(), Some("tunnel_user"));
        assert_eq!(info.expires.as_deref(), Some("2024-05-08 10:00:00"));
        assert_eq!(
            info.summary().as_deref(),
            Some("service until 2024-05-08 10:00:00, next check-in 2024-05-08 10:00:00")
        );
        assert_eq!(AccountInfo::scrape("<div class=\"d_hao\"></div>"), None);
        assert_eq!(AccountInfo::default().summary(), None);
    }

    #[test]
    fn test_sign_reply_classification() {
        assert_eq!(
            classify_sign_reply(r#"{"code":200,"message":"ok"}"#),
            CheckInOutcome::succeeded()
        );
        assert_eq!(
            classify_sign_reply(r#"{"code":400,"message":"服务尚未到期"}"#),
            CheckInOutcome::Failed("服务尚未到期".to_string())
        );
        assert_eq!(
            classify_sign_reply(r#"{"code":500}"#),
            CheckInOutcome::Failed("code 500".to_string())
        );
        assert!(matches!(
            classify_sign_reply("<html>error</html>"),
            CheckInOutcome::Unrecognized(_)
        ));
    }
}
