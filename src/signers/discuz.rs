//! Helpers shared by the Discuz!-based forum signers.
//!
//! Discuz sites all share the same login form (`formhash`, `referer`,
//! `loginhash`), the same AJAX envelope (`<root><![CDATA[...]]></root>`)
//! and the same "欢迎您回来，NAME，" greeting. Only the pieces that more
//! than one site uses live here.

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use tracing::debug;

use super::{fetch_text, html};

/// Cookie lifetime requested at login (30 days), as the web form does.
pub const COOKIE_TIME: &str = "2592000";

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

// ---------------------------------------------------------------------------
// Page scraping
// ---------------------------------------------------------------------------

/// The anti-CSRF token every Discuz form carries.
pub fn formhash(page: &str) -> Option<String> {
    html::input_value(page, "formhash")
}

/// The per-page login hash embedded in the login form's action URL.
pub fn loginhash(page: &str) -> Option<String> {
    static LOGINHASH: OnceLock<Regex> = OnceLock::new();
    cached(&LOGINHASH, r"loginhash=(\w+)")
        .captures(page)
        .map(|c| c[1].to_string())
}

/// Username from the "欢迎您回来，NAME，" greeting in a login response.
pub fn welcome_back_user(text: &str) -> Option<String> {
    static WELCOME: OnceLock<Regex> = OnceLock::new();
    cached(&WELCOME, r"欢迎您回来，(.+?)，")
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|u| !u.is_empty())
}

/// Contents of the `<![CDATA[...]]>` block in an `inajax=1` response.
pub fn ajax_payload(xml: &str) -> Option<String> {
    static CDATA: OnceLock<Regex> = OnceLock::new();
    cached(&CDATA, r"(?s)<!\[CDATA\[(.*?)\]\]>")
        .captures(xml)
        .map(|c| c[1].to_string())
}

/// Text of the `<error>` element some Discuz plugins put in AJAX replies.
pub fn ajax_error(text: &str) -> Option<String> {
    static ERROR: OnceLock<Regex> = OnceLock::new();
    cached(&ERROR, r"(?s)<error>(.*?)</error>")
        .captures(text)
        .map(|c| c[1].trim().to_string())
}

/// A labelled integer such as `金币: 123` or `传世币：45`.
///
/// Credit lists put one credit per `<li>`, so the label and its number
/// must sit in the same list item.
pub fn labelled_number(page: &str, label: &str) -> Option<String> {
    static LI: OnceLock<Selector> = OnceLock::new();
    let doc = Html::parse_document(page);
    doc.select(html::selector(&LI, "li"))
        .find_map(|li| number_after(&html::text_of(li), label))
}

fn number_after(text: &str, label: &str) -> Option<String> {
    text.match_indices(label).find_map(|(at, _)| {
        let rest = text[at + label.len()..].trim_start();
        let rest = rest
            .strip_prefix(':')
            .or_else(|| rest.strip_prefix('：'))?
            .trim_start();
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        (!digits.is_empty()).then_some(digits)
    })
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// The standard Discuz member login form.
#[derive(Debug, Clone)]
pub struct LoginForm<'a> {
    pub formhash: &'a str,
    pub referer: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    /// `Some("username")` on sites that show the login-field selector.
    pub loginfield: Option<&'a str>,
}

impl LoginForm<'_> {
    fn fields(&self) -> Vec<(&str, &str)> {
        let mut fields = vec![
            ("formhash", self.formhash),
            ("referer", self.referer),
            ("username", self.username),
            ("password", self.password),
            ("questionid", "0"),
            ("answer", ""),
            ("cookietime", COOKIE_TIME),
            ("loginsubmit", "true"),
        ];
        if let Some(field) = self.loginfield {
            fields.push(("loginfield", field));
        }
        fields
    }
}

/// URL of the AJAX login endpoint for a given login hash.
pub fn login_url(base_url: &str, loginhash: &str) -> String {
    format!(
        "{base_url}/member.php?mod=logging&action=login&loginsubmit=yes&loginhash={}&inajax=1",
        urlencoding::encode(loginhash)
    )
}

/// Fetch the login page and return its HTML.
pub async fn fetch_login_page(http: &Client, base_url: &str) -> Result<String> {
    let url = format!("{base_url}/member.php?mod=logging&action=login");
    fetch_text(http, &url).await
}

/// Submit the login form and return the raw response body.
pub async fn submit_login(http: &Client, url: &str, form: &LoginForm<'_>) -> Result<String> {
    debug!(url, username = form.username, "Submitting Discuz login");
    let resp = http
        .post(url)
        .form(&form.fields())
        .send()
        .await
        .context("Login request failed")?;
    resp.text().await.context("Failed to read login response")
}
