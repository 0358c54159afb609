//! 天翼云盘 (cloud.189.cn) signer.
//!
//! Login runs through the carrier's unified auth box. An entry page
//! links to the auth page, which links to the login form. The form
//! embeds an RSA public key, and both username and password are
//! submitted RSA-encrypted to `loginSubmit.do`. The check-in is a single
//! GET against the mobile client API; a fresh check-in then tries the
//! daily prize draws. Storage bonuses are one-off grants, so there is no
//! balance to track.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use reqwest::header::{REFERER, USER_AGENT};
use reqwest::{Client, Url};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use scraper::Selector;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::{fetch_text, html, http_session, Signer, SignerKind, SiteSettings};
use crate::types::{Balance, CheckInOutcome, Credentials};

pub const BASE_URL: &str = "https://m.cloud.189.cn";

const ENTRY_PATH: &str = "udb/udb_login.jsp?pageId=1&pageKey=default&clientType=wap\
     &redirectURL=https://m.cloud.189.cn/zhuanti/2021/shakeLottery/index.html";
const LOGIN_SUBMIT_URL: &str = "https://open.e.189.cn/api/logbox/oauth2/loginSubmit.do";
const LOGIN_REFERER: &str = "https://open.e.189.cn/";
const SIGN_URL: &str = "https://api.cloud.189.cn/mkt/userSign.action";
const SIGN_REFERER: &str = "https://m.cloud.189.cn/zhuanti/2016/sign/index.jsp?albumBackupOpened=1";
const DRAW_PATHS: [&str; 2] = [
    "v2/drawPrizeMarketDetails.action?taskId=TASK_SIGNIN&activityId=ACT_SIGNIN",
    "v2/drawPrizeMarketDetails.action?taskId=TASK_SIGNIN_PHOTOS&activityId=ACT_SIGNIN",
];

/// The Android client's webview; the sign API rejects desktop agents.
const MOBILE_UA: &str = "Mozilla/5.0 (Linux; Android 5.1.1; SM-G930K Build/NRD90M; wv) \
     AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/74.0.3729.136 Mobile \
     Safari/537.36 Ecloud/8.6.3 Android/22 clientId/355325117317828 clientModel/SM-G930K \
     imsi/460071114317824 clientChannelId/qq proVersion/1.0.6";

fn capture(cell: &'static OnceLock<Regex>, pattern: &str, text: &str) -> Option<String> {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
        .captures(text)
        .map(|c| c[1].to_string())
}

// ---------------------------------------------------------------------------
// Login page scraping
// ---------------------------------------------------------------------------

/// First absolute URL in the entry page (a script redirect).
fn first_url(page: &str) -> Option<String> {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r#"https?://[^\s'"]+"#).expect("static regex"))
        .find(page)
        .map(|m| m.as_str().to_string())
}

/// Target of the "account login" tab on the auth page.
fn login_link(page: &str) -> Option<String> {
    static LINK: OnceLock<Selector> = OnceLock::new();
    html::first_attr(page, html::selector(&LINK, "a#j-tab-login-link[href]"), "href")
}

/// Values the login form page carries, partly as inputs and partly as
/// script variables.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoginForm {
    captcha_token: String,
    lt: String,
    return_url: String,
    param_id: String,
    rsa_key: String,
}

impl LoginForm {
    fn scrape(page: &str) -> Result<Self> {
        static CAPTCHA: OnceLock<Regex> = OnceLock::new();
        static LT: OnceLock<Regex> = OnceLock::new();
        static RETURN_URL: OnceLock<Regex> = OnceLock::new();
        static PARAM_ID: OnceLock<Regex> = OnceLock::new();

        let captcha_token = html::input_value(page, "captchaToken")
            .or_else(|| capture(&CAPTCHA, r"captchaToken' value='(.+?)'", page))
            .context("captchaToken missing from login page")?;
        Ok(Self {
            captcha_token,
            lt: capture(&LT, r#"lt = "(.+?)""#, page).context("lt missing from login page")?,
            return_url: capture(&RETURN_URL, r"returnUrl\s*=\s*'(.+?)'", page)
                .context("returnUrl missing from login page")?,
            param_id: capture(&PARAM_ID, r#"paramId = "(.+?)""#, page)
                .context("paramId missing from login page")?,
            rsa_key: html::input_value(page, "j_rsaKey")
                .context("j_rsaKey missing from login page")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Field encryption
// ---------------------------------------------------------------------------

/// Decode the page's base64 SubjectPublicKeyInfo.
fn public_key(encoded: &str) -> Result<RsaPublicKey> {
    let der = STANDARD
        .decode(encoded.trim())
        .context("RSA key is not valid base64")?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| anyhow!("Invalid RSA public key: {e}"))
}

/// `{RSA}` followed by the lowercase hex of the PKCS#1 v1.5 ciphertext.
fn encrypt_field(key: &RsaPublicKey, value: &str) -> Result<String> {
    let cipher = key
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, value.as_bytes())
        .map_err(|e| anyhow!("RSA encryption failed: {e}"))?;
    let hex: String = cipher.iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!("{{RSA}}{hex}"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginReply {
    #[serde(default)]
    result: Option<i64>,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    to_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Check-in replies
// ---------------------------------------------------------------------------

fn classify_sign(reply: &Value) -> CheckInOutcome {
    if let Some(code) = reply.get("errorCode").and_then(Value::as_str) {
        let msg = reply.get("errorMsg").and_then(Value::as_str).unwrap_or(code);
        return CheckInOutcome::Failed(msg.to_string());
    }
    let fresh = match reply.get("isSign") {
        Some(Value::Bool(signed)) => !signed,
        Some(Value::String(signed)) => signed == "false",
        _ => return CheckInOutcome::Unrecognized("unexpected check-in reply".to_string()),
    };
    if !fresh {
        return CheckInOutcome::AlreadyDone;
    }
    match reply.get("netdiskBonus") {
        Some(Value::Number(mb)) => CheckInOutcome::succeeded_with(format!("+{mb}M space")),
        Some(Value::String(mb)) => CheckInOutcome::succeeded_with(format!("+{mb}M space")),
        _ => CheckInOutcome::succeeded(),
    }
}

/// Prize name from a draw reply. `None` when nothing was won (the reply
/// then carries an `errorCode` such as `User_Not_Chance`).
fn prize_name(reply: &Value) -> Option<String> {
    reply
        .get("prizeName")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/// `138****0000`, as the mobile app shows phone logins.
fn masked(username: &str) -> String {
    let chars: Vec<char> = username.chars().collect();
    if chars.len() < 8 {
        return username.to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

pub struct TyypSigner {
    http: Client,
    site: SiteSettings,
    credentials: Credentials,
    logged_user: Option<String>,
}

impl TyypSigner {
    pub fn new(credentials: Credentials, site: SiteSettings) -> Result<Self> {
        let http = http_session(SignerKind::Tyyp.platform(), site.timeout)?;
        Ok(Self {
            http,
            site,
            credentials,
            logged_user: None,
        })
    }

    /// GET a mobile-API URL and decode the JSON reply.
    async fn mobile_json(&self, url: &str) -> Result<Value> {
        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, MOBILE_UA)
            .header(REFERER, SIGN_REFERER)
            .send()
            .await
            .with_context(|| format!("Request failed: {url}"))?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse reply: {url}"))
    }

    /// One prize draw. Failures only cost the prize.
    async fn draw(&self, path: &str) -> Option<String> {
        match self.mobile_json(&self.site.url(path)).await {
            Ok(reply) => {
                let prize = prize_name(&reply);
                if prize.is_none() {
                    debug!(
                        platform = self.platform(),
                        error_code = ?reply.get("errorCode"),
                        "No prize drawn"
                    );
                }
                prize
            }
            Err(e) => {
                warn!(platform = self.platform(), error = %format!("{e:#}"), "Prize draw failed");
                None
            }
        }
    }
}

#[async_trait]
impl Signer for TyypSigner {
    fn platform(&self) -> &str {
        SignerKind::Tyyp.platform()
    }

    fn username(&self) -> Option<&str> {
        self.logged_user.as_deref()
    }

    fn tracks_balance(&self) -> bool {
        false
    }

    async fn authenticate(&mut self) -> Result<bool> {
        let entry = fetch_text(&self.http, &self.site.url(ENTRY_PATH)).await?;
        let auth_url = first_url(&entry).context("No redirect on login entry page")?;
        let auth_page = fetch_text(&self.http, &auth_url).await?;
        let link = login_link(&auth_page).context("Login link missing from auth page")?;
        let form_url = Url::parse(&auth_url)
            .and_then(|base| base.join(&link))
            .context("Invalid login link")?;
        let form_page = fetch_text(&self.http, form_url.as_str()).await?;
        let form = LoginForm::scrape(&form_page)?;

        let key = public_key(&form.rsa_key)?;
        let user_field = encrypt_field(&key, &self.credentials.username)?;
        let pass_field = encrypt_field(&key, self.credentials.password())?;

        let reply: LoginReply = self
            .http
            .post(LOGIN_SUBMIT_URL)
            .header(REFERER, LOGIN_REFERER)
            .header("lt", form.lt.as_str())
            .form(&[
                ("appKey", "cloud"),
                ("accountType", "01"),
                ("userName", user_field.as_str()),
                ("password", pass_field.as_str()),
                ("validateCode", ""),
                ("captchaToken", form.captcha_token.as_str()),
                ("returnUrl", form.return_url.as_str()),
                ("mailSuffix", "@189.cn"),
                ("paramId", form.param_id.as_str()),
            ])
            .send()
            .await
            .context("Login request failed")?
            .json()
            .await
            .context("Failed to parse login reply")?;

        if reply.result != Some(0) {
            warn!(platform = self.platform(), result = ?reply.result, msg = %reply.msg, "Login rejected");
            return Ok(false);
        }
        // Landing on the redirect target sets the cloud session cookies.
        if let Some(target) = reply.to_url.as_deref() {
            fetch_text(&self.http, target)
                .await
                .context("Failed to follow login redirect")?;
        }

        let user = masked(&self.credentials.username);
        info!(platform = self.platform(), user = %user, "Logged in");
        self.logged_user = Some(user);
        Ok(true)
    }

    async fn check_in(&mut self) -> Result<CheckInOutcome> {
        let url = format!(
            "{SIGN_URL}?rand={}&clientType=TELEANDROID&version=8.6.3&model=SM-G930K",
            chrono::Utc::now().timestamp_millis()
        );
        let reply = self.mobile_json(&url).await?;
        debug!(platform = self.platform(), reply = %reply, "Check-in reply");

        let detail = match classify_sign(&reply) {
            CheckInOutcome::Succeeded { detail } => detail,
            other => return Ok(other),
        };

        let mut parts: Vec<String> = detail.into_iter().collect();
        for path in DRAW_PATHS {
            if let Some(prize) = self.draw(path).await {
                parts.push(format!("draw: {prize}"));
            }
        }
        Ok(if parts.is_empty() {
            CheckInOutcome::succeeded()
        } else {
            CheckInOutcome::succeeded_with(parts.join(", "))
        })
    }

    async fn read_balance(&mut self) -> Result<Option<Balance>> {
        Ok(None)
    }
}
