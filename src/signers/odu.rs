//! 零度网游单机 (0du.net) signer.
//!
//! Discuz forum that expects the password pre-hashed to an MD5 hex
//! digest in the login form. Like iopq, logging in is what credits the
//! daily reward. The balance sits in the `nexmemberinfosthrees` block of
//! the member's space page.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use tracing::{info, warn};

use super::discuz::{self, LoginForm};
use super::{fetch_text, html, http_session, Signer, SignerKind, SiteSettings};
use crate::types::{Balance, CheckInOutcome, Credentials};

pub const BASE_URL: &str = "https://www.0du.net";

const LOGIN_HASH: &str = "LrtAc";
const SPACE_PATH: &str = "home.php?mod=space";

/// The site hashes the password client-side before submitting it.
fn hash_password(password: &str) -> String {
    format!("{:x}", md5::compute(password.as_bytes()))
}

/// First `<p>` inside the `nexmemberinfosthrees` list item.
fn extract_gold(page: &str) -> Option<String> {
    static BLOCK: OnceLock<Selector> = OnceLock::new();
    static PARAGRAPH: OnceLock<Selector> = OnceLock::new();
    let doc = Html::parse_document(page);
    let block = doc
        .select(html::selector(&BLOCK, "li.nexmemberinfosthrees"))
        .next()?;
    let gold = html::text_of(block.select(html::selector(&PARAGRAPH, "p")).next()?);
    (!gold.is_empty()).then_some(gold)
}

pub struct OduSigner {
    http: Client,
    site: SiteSettings,
    credentials: Credentials,
    logged_user: Option<String>,
}

impl OduSigner {
    pub fn new(credentials: Credentials, site: SiteSettings) -> Result<Self> {
        let http = http_session(SignerKind::Odu.platform(), site.timeout)?;
        Ok(Self {
            http,
            site,
            credentials,
            logged_user: None,
        })
    }
}

#[async_trait]
impl Signer for OduSigner {
    fn platform(&self) -> &str {
        SignerKind::Odu.platform()
    }

    fn username(&self) -> Option<&str> {
        self.logged_user.as_deref()
    }

    async fn authenticate(&mut self) -> Result<bool> {
        let page = discuz::fetch_login_page(&self.http, &self.site.base_url).await?;
        let formhash = discuz::formhash(&page).context("formhash missing from login page")?;
        let referer = self.site.url("forum.php");
        let hashed = hash_password(self.credentials.password());

        let form = LoginForm {
            formhash: &formhash,
            referer: &referer,
            username: &self.credentials.username,
            password: &hashed,
            loginfield: None,
        };
        let url = discuz::login_url(&self.site.base_url, LOGIN_HASH);
        let reply = discuz::submit_login(&self.http, &url, &form).await?;

        // Unlike iopq, a greeting without a name is not trusted here.
        match discuz::welcome_back_user(&reply) {
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
        Ok(CheckInOutcome::succeeded_with("daily login reward"))
    }

    async fn read_balance(&mut self) -> Result<Option<Balance>> {
        let page = fetch_text(&self.http, &self.site.url(SPACE_PATH)).await?;
        let raw = extract_gold(&page);
        if raw.is_none() {
            warn!(platform = self.platform(), "Gold block not found on space page");
        }
        Ok(raw.and_then(|r| r.parse().ok()))
    }
}
