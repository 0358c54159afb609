//! MEFRP (mefrp.com) signer.
//!
//! JSON API: `/api/public/login` returns a bearer token, the sign
//! endpoint answers `code 200` on success and `code 403` with "已签到"
//! when today's check-in is already done. The balance is the remaining
//! traffic, reported in MB by the API and tracked here in GB.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{http_session, Signer, SignerKind, SiteSettings};
use crate::types::{Balance, CheckInOutcome, CheckinError, Credentials};

pub const BASE_URL: &str = "https://api.mefrp.com";

const WEB_ORIGIN: &str = "https://www.mefrp.com/";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// Envelope every endpoint replies with.
#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignData {
    #[serde(default)]
    extra_traffic: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    username: Option<String>,
    /// Remaining traffic in MB.
    #[serde(default)]
    traffic: Option<Decimal>,
}

fn classify_sign(reply: ApiReply<SignData>) -> CheckInOutcome {
    match reply.code {
        200 => match reply.data.and_then(|d| d.extra_traffic) {
            Some(gained) => CheckInOutcome::succeeded_with(format!("+{} GB", plain(&gained))),
            None => CheckInOutcome::succeeded(),
        },
        403 if reply.message.contains("已签到") => CheckInOutcome::AlreadyDone,
        _ if reply.message.is_empty() => CheckInOutcome::Failed(format!("code {}", reply.code)),
        _ => CheckInOutcome::Failed(reply.message),
    }
}

/// Render a JSON scalar without quotes.
fn plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// MB → GB, two decimal places.
fn mb_to_gb(mb: Decimal) -> Decimal {
    (mb / Decimal::from(1024)).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub struct MefrpSigner {
    http: Client,
    site: SiteSettings,
    credentials: Credentials,
    token: Option<String>,
    display_name: Option<String>,
}

impl MefrpSigner {
    pub fn new(credentials: Credentials, site: SiteSettings) -> Result<Self> {
        let http = http_session(SignerKind::Mefrp.platform(), site.timeout)?;
        Ok(Self {
            http,
            site,
            credentials,
            token: None,
            display_name: None,
        })
    }

    fn bearer(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| CheckinError::site(self.platform(), "not logged in").into())
    }

    async fn get_api<T: DeserializeOwned>(&self, path: &str) -> Result<ApiReply<T>> {
        let resp = self
            .http
            .get(self.site.url(path))
            .bearer_auth(self.bearer()?)
            .header(reqwest::header::REFERER, WEB_ORIGIN)
            .send()
            .await
            .with_context(|| format!("MEFRP request failed: {path}"))?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse MEFRP reply: {path}"))
    }
}

#[async_trait]
impl Signer for MefrpSigner {
    fn platform(&self) -> &str {
        SignerKind::Mefrp.platform()
    }

    fn username(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    async fn authenticate(&mut self) -> Result<bool> {
        let body = json!({
            "username": self.credentials.username,
            "password": self.credentials.password(),
        });
        let resp = self
            .http
            .post(self.site.url("/api/public/login"))
            .header(reqwest::header::REFERER, WEB_ORIGIN)
            .json(&body)
            .send()
            .await
            .context("MEFRP login request failed")?;
        let reply: ApiReply<LoginData> = resp.json().await.context("Failed to parse MEFRP login")?;

        match (reply.code, reply.data) {
            (200, Some(data)) => {
                self.token = Some(data.token);
                self.display_name = Some(self.credentials.username.clone());
                info!(platform = self.platform(), "Logged in");
                Ok(true)
            }
            (code, _) => {
                warn!(platform = self.platform(), code, message = %reply.message, "Login rejected");
                Ok(false)
            }
        }
    }

    async fn check_in(&mut self) -> Result<CheckInOutcome> {
        let reply: ApiReply<SignData> = self.get_api("/api/auth/user/sign").await?;
        debug!(platform = self.platform(), code = reply.code, "Sign reply");
        Ok(classify_sign(reply))
    }

    async fn read_balance(&mut self) -> Result<Option<Balance>> {
        let reply: ApiReply<UserInfo> = self.get_api("/api/auth/user/info").await?;
        if reply.code != 200 {
            warn!(platform = self.platform(), code = reply.code, "User info unavailable");
            return Ok(None);
        }
        let Some(info) = reply.data else {
            return Ok(None);
        };
        if let Some(name) = info.username.filter(|n| !n.is_empty()) {
            self.display_name = Some(name);
        }
        Ok(info.traffic.and_then(|mb| Balance::new(mb_to_gb(mb)).ok()))
    }
}
