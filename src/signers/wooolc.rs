//! 传世单机社区 (wooolc.com) signer.
//!
//! Discuz forum with the k_misign check-in plugin. Login goes through
//! the AJAX login endpoint; the check-in is a POST of
//! `operation=qiandao` carrying the sign page's formhash. The balance is
//! the "传世币" credit on the credit settings page.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::discuz::{self, LoginForm};
use super::{fetch_text, html, http_session, Signer, SignerKind, SiteSettings};
use crate::types::{Balance, CheckInOutcome, Credentials};

pub const BASE_URL: &str = "https://www.wooolc.com";

const SIGN_PATH: &str = "plugin.php?id=k_misign:sign";
const CREDIT_PATH: &str = "home.php?mod=spacecp&ac=credit";
const CREDIT_LABEL: &str = "传世币";

/// What the AJAX login endpoint answered.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoginReply {
    Accepted { redirect: Option<String> },
    Rejected(String),
}

fn parse_login_reply(body: &str) -> LoginReply {
    static REDIRECT: OnceLock<Regex> = OnceLock::new();
    let payload = discuz::ajax_payload(body).unwrap_or_else(|| body.to_string());

    if payload.contains("succeedhandle_") {
        let re = REDIRECT.get_or_init(|| {
            Regex::new(r"window\.location\.href\s*=\s*'(.*?)'").expect("static regex")
        });
        let redirect = re.captures(&payload).map(|c| c[1].to_string());
        return LoginReply::Accepted { redirect };
    }

    let reason = discuz::ajax_error(&payload)
        .or_else(|| Some(html::fragment_text(&payload)).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "unknown login error".to_string());
    LoginReply::Rejected(reason)
}

/// Marker text the sign page shows once today's check-in is done.
fn says_already_signed(text: &str) -> bool {
    text.contains("已签到") || text.contains("已经签到") || text.contains("今日已签")
}

/// Decide from the sign page whether there is anything to submit.
///
/// `Ok(formhash)` means the sign form is present. Otherwise the page
/// either says it is already done, or is something we don't recognise.
fn inspect_sign_page(html: &str) -> Result<String, CheckInOutcome> {
    if let Some(hash) = discuz::formhash(html) {
        return Ok(hash);
    }
    if says_already_signed(html) {
        return Err(CheckInOutcome::AlreadyDone);
    }
    Err(CheckInOutcome::Unrecognized(
        "sign form not found on check-in page".to_string(),
    ))
}

/// Classify the plugin's reply to the `qiandao` POST.
fn classify_sign_reply(body: &str) -> CheckInOutcome {
    match discuz::ajax_payload(body) {
        Some(payload) if payload.trim().is_empty() => CheckInOutcome::succeeded(),
        Some(payload) if says_already_signed(&payload) => CheckInOutcome::AlreadyDone,
        Some(payload) => CheckInOutcome::Unrecognized(html::fragment_text(&payload)),
        None if says_already_signed(body) => CheckInOutcome::AlreadyDone,
        None => CheckInOutcome::Unrecognized("unexpected check-in reply".to_string()),
    }
}

pub struct WooolcSigner {
    http: Client,
    site: SiteSettings,
    credentials: Credentials,
    logged_user: Option<String>,
}

impl WooolcSigner {
    pub fn new(credentials: Credentials, site: SiteSettings) -> Result<Self> {
        let http = http_session(SignerKind::Wooolc.platform(), site.timeout)?;
        Ok(Self {
            http,
            site,
            credentials,
            logged_user: None,
        })
    }
}

#[async_trait]
impl Signer for WooolcSigner {
    fn platform(&self) -> &str {
        SignerKind::Wooolc.platform()
    }

    fn username(&self) -> Option<&str> {
        self.logged_user.as_deref()
    }

    async fn authenticate(&mut self) -> Result<bool> {
        let page = discuz::fetch_login_page(&self.http, &self.site.base_url).await?;

        let formhash = discuz::formhash(&page).context("formhash missing from login page")?;
        let loginhash = discuz::loginhash(&page).context("loginhash missing from login page")?;
        let referer =
            html::input_value(&page, "referer").unwrap_or_else(|| self.site.url("forum.php"));
        let loginfield =
            html::selected_option(&page, "loginfield").unwrap_or_else(|| "username".to_string());

        let form = LoginForm {
            formhash: &formhash,
            referer: &referer,
            username: &self.credentials.username,
            password: self.credentials.password(),
            loginfield: Some(&loginfield),
        };
        let url = discuz::login_url(&self.site.base_url, &loginhash);
        let body = discuz::submit_login(&self.http, &url, &form).await?;

        match parse_login_reply(&body) {
            LoginReply::Accepted { redirect } => {
                if let Some(target) = redirect {
                    // Landing on the redirect target finalises the auth cookies.
                    if let Err(e) = fetch_text(&self.http, &target).await {
                        debug!(error = %e, "Post-login redirect failed");
                    }
                }
                self.logged_user = Some(self.credentials.username.clone());
                info!(platform = self.platform(), "Logged in");
                Ok(true)
            }
            LoginReply::Rejected(reason) => {
                warn!(platform = self.platform(), reason = %reason, "Login rejected");
                Ok(false)
            }
        }
    }

    async fn check_in(&mut self) -> Result<CheckInOutcome> {
        let page = fetch_text(&self.http, &self.site.url(SIGN_PATH)).await?;
        let formhash = match inspect_sign_page(&page) {
            Ok(hash) => hash,
            Err(outcome) => return Ok(outcome),
        };

        let resp = self
            .http
            .post(self.site.url(SIGN_PATH))
            .form(&[
                ("operation", "qiandao"),
                ("formhash", formhash.as_str()),
                ("format", "empty"),
            ])
            .send()
            .await
            .context("Check-in request failed")?;
        let body = resp.text().await.context("Failed to read check-in reply")?;

        Ok(classify_sign_reply(&body))
    }

    async fn read_balance(&mut self) -> Result<Option<Balance>> {
        let page = fetch_text(&self.http, &self.site.url(CREDIT_PATH)).await?;
        Ok(discuz::labelled_number(&page, CREDIT_LABEL).and_then(|raw| raw.parse().ok()))
    }
}
