//! 游戏藏宝湾 (iopq.net) signer.
//!
//! Discuz forum where the daily reward is credited on login, so the
//! check-in step itself is the login. The site serves GBK pages;
//! reqwest decodes them from the response charset.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};

use super::discuz::{self, LoginForm};
use super::{fetch_text, http_session, Signer, SignerKind, SiteSettings};
use crate::types::{Balance, CheckInOutcome, Credentials};

pub const BASE_URL: &str = "https://www.iopq.net";

/// Fixed login hash the site's own login form posts with.
const LOGIN_HASH: &str = "LNmQo";
const REFERER_PATH: &str = "thread-17134279-1-1.html";
const CREDIT_PATH: &str = "home.php?mod=spacecp&ac=credit&showcredit=1";
const CREDIT_LABEL: &str = "金币";

pub struct IopqSigner {
    http: Client,
    site: SiteSettings,
    credentials: Credentials,
    logged_user: Option<String>,
}

impl IopqSigner {
    pub fn new(credentials: Credentials, site: SiteSettings) -> Result<Self> {
        let http = http_session(SignerKind::Iopq.platform(), site.timeout)?;
        Ok(Self {
            http,
            site,
            credentials,
            logged_user: None,
        })
    }
}

/// Resolve the display name from a login reply, if the login succeeded.
fn logged_in_user(reply: &str, fallback: &str) -> Option<String> {
    if !reply.contains("欢迎您回来") {
        return None;
    }
    Some(discuz::welcome_back_user(reply).unwrap_or_else(|| fallback.to_string()))
}

#[async_trait]
impl Signer for IopqSigner {
    fn platform(&self) -> &str {
        SignerKind::Iopq.platform()
    }

    fn username(&self) -> Option<&str> {
        self.logged_user.as_deref()
    }

    async fn authenticate(&mut self) -> Result<bool> {
        let page = discuz::fetch_login_page(&self.http, &self.site.base_url).await?;
        let formhash = discuz::formhash(&page).context("formhash missing from login page")?;
        let referer = self.site.url(REFERER_PATH);

        let form = LoginForm {
            formhash: &formhash,
            referer: &referer,
            username: &self.credentials.username,
            password: self.credentials.password(),
            loginfield: None,
        };
        let url = discuz::login_url(&self.site.base_url, LOGIN_HASH);
        let reply = discuz::submit_login(&self.http, &url, &form).await?;

        match logged_in_user(&reply, &self.credentials.username) {
            Some(user) => {
                info!(platform = self.platform(), user = %user, "Logged in");
                self.logged_user = Some(user);
                Ok(true)
            }
            None => {
                warn!(platform = self.platform(), "Login rejected");
                Ok(false)
            }
        }
    }

    async fn check_in(&mut self) -> Result<CheckInOutcome> {
        // The reward is granted by the login itself.
        Ok(CheckInOutcome::succeeded_with("daily login reward"))
    }

    async fn read_balance(&mut self) -> Result<Option<Balance>> {
        let page = fetch_text(&self.http, &self.site.url(CREDIT_PATH)).await?;
        Ok(discuz::labelled_number(&page, CREDIT_LABEL).and_then(|raw| raw.parse().ok()))
    }
}
