//! 热血侠网游单机 (rexuexia.com) signer.
//!
//! Plain-HTTP Discuz forum. The login reply is not informative, so the
//! login is confirmed by the avatar title on the credit page, which also
//! carries the gold balance.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::Selector;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::discuz::{self, LoginForm};
use super::{fetch_text, html, http_session, Signer, SignerKind, SiteSettings};
use crate::types::{Balance, CheckInOutcome, Credentials};

pub const BASE_URL: &str = "http://www.rexuexia.com";

const LOGIN_HASH: &str = "LDefault";
const CREDIT_PATH: &str = "home.php?mod=spacecp&ac=credit&op=base";

/// Username from a titled anchor inside the `deanavartop` avatar box.
fn avatar_user(page: &str) -> Option<String> {
    static AVATAR: OnceLock<Selector> = OnceLock::new();
    html::first_attr(page, html::selector(&AVATAR, "div.deanavartop a[title]"), "title")
}

/// Gold amount from the `xi1` credit list item (`金币: 88 枚`).
fn extract_gold(page: &str) -> Option<String> {
    static XI1: OnceLock<Selector> = OnceLock::new();
    let text = html::first_text(page, html::selector(&XI1, "li.xi1"))?;
    text.split("金币:")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
}

pub struct RexuexiaSigner {
    http: Client,
    site: SiteSettings,
    credentials: Credentials,
    logged_user: Option<String>,
    /// Credit page fetched while confirming the login.
    credit_page: Option<String>,
}

impl RexuexiaSigner {
    pub fn new(credentials: Credentials, site: SiteSettings) -> Result<Self> {
        let http = http_session(SignerKind::Rexuexia.platform(), site.timeout)?;
        Ok(Self {
            http,
            site,
            credentials,
            logged_user: None,
            credit_page: None,
        })
    }
}

#[async_trait]
impl Signer for RexuexiaSigner {
    fn platform(&self) -> &str {
        SignerKind::Rexuexia.platform()
    }

    fn username(&self) -> Option<&str> {
        self.logged_user.as_deref()
    }

    async fn authenticate(&mut self) -> Result<bool> {
        let page = discuz::fetch_login_page(&self.http, &self.site.base_url).await?;
        let formhash = discuz::formhash(&page).context("formhash missing from login page")?;
        let referer = format!("{}/", self.site.base_url);

        let form = LoginForm {
            formhash: &formhash,
            referer: &referer,
            username: &self.credentials.username,
            password: self.credentials.password(),
            loginfield: None,
        };
        let url = discuz::login_url(&self.site.base_url, LOGIN_HASH);
        let reply = discuz::submit_login(&self.http, &url, &form).await?;
        debug!(platform = self.platform(), bytes = reply.len(), "Login reply received");

        let credit = fetch_text(&self.http, &self.site.url(CREDIT_PATH)).await?;
        match avatar_user(&credit) {
            Some(user) => {
                info!(platform = self.platform(), user = %user, "Logged in");
                self.logged_user = Some(user);
                self.credit_page = Some(credit);
                Ok(true)
            }
            None => {
                warn!(platform = self.platform(), "No avatar on credit page after login");
                Ok(false)
            }
        }
    }

    async fn check_in(&mut self) -> Result<CheckInOutcome> {
        Ok(CheckInOutcome::succeeded_with("daily login reward"))
    }

    async fn read_balance(&mut self) -> Result<Option<Balance>> {
        // The page seen at login predates the reward; fetch a fresh copy
        // and fall back to the cached one only if that fails.
        let page = match fetch_text(&self.http, &self.site.url(CREDIT_PATH)).await {
            Ok(page) => page,
            Err(e) => match self.credit_page.take() {
                Some(cached) => {
                    debug!(error = %e, "Using credit page cached at login");
                    cached
                }
                None => return Err(e),
            },
        };
        Ok(extract_gold(&page).and_then(|raw| raw.parse().ok()))
    }
}
