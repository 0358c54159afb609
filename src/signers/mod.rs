//! Site signers.
//!
//! Defines the `Signer` trait and provides implementations for:
//! - 传世单机社区 (wooolc): Discuz forum, k_misign plugin check-in
//! - 游戏藏宝湾 (iopq): Discuz forum, reward granted on login
//! - 零度网游单机 (0du): Discuz forum, MD5-hashed login
//! - 热血侠网游单机 (rexuexia): Discuz forum, reward granted on login
//! - MEFRP: JSON API with bearer token
//! - ikuuu: SSPanel-style VPN portal
//! - 天翼云盘 (tyyp): cloud storage, RSA-encrypted login, no balance
//! - 皎月连 (natpierce): tunnel service, check-in extends expiry, no balance
//!
//! Every site-specific heuristic (selectors, token scraping, password
//! hashing) stays inside its own module. The engine only sees the trait.

pub mod discuz;
pub mod html;
pub mod ikuuu;
pub mod iopq;
pub mod mefrp;
pub mod natpierce;
pub mod odu;
pub mod rexuexia;
pub mod tyyp;
pub mod wooolc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::types::{Balance, CheckInOutcome, Credentials};

/// Desktop browser user agent sent by every signer session.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Abstraction over one platform's daily check-in.
///
/// A signer is built once per run from configuration, authenticates at
/// most once, and is dropped at the end of the run together with its
/// session.
#[async_trait]
pub trait Signer: Send {
    /// Platform display name. Also the state-file key.
    fn platform(&self) -> &str;

    /// Display username, known once `authenticate` has succeeded.
    fn username(&self) -> Option<&str>;

    /// Log in. `Ok(false)` means the site rejected the credentials.
    async fn authenticate(&mut self) -> Result<bool>;

    /// Perform the daily action and classify what happened.
    async fn check_in(&mut self) -> Result<CheckInOutcome>;

    /// Best-effort read of the current balance. `Ok(None)` when the
    /// account page could not be parsed.
    async fn read_balance(&mut self) -> Result<Option<Balance>>;

    /// Whether this platform has a balance at all. When false,
    /// `read_balance` is never called and the report omits balance lines.
    fn tracks_balance(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Every supported platform, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignerKind {
    Wooolc,
    Iopq,
    Odu,
    Rexuexia,
    Mefrp,
    Ikuuu,
    Tyyp,
    Natpierce,
}

impl SignerKind {
    /// Declaration order. Drives both execution and report order.
    pub const ALL: [SignerKind; 8] = [
        SignerKind::Wooolc,
        SignerKind::Iopq,
        SignerKind::Odu,
        SignerKind::Rexuexia,
        SignerKind::Mefrp,
        SignerKind::Ikuuu,
        SignerKind::Tyyp,
        SignerKind::Natpierce,
    ];

    /// Display name. Kept identical across releases: it keys the state file.
    pub fn platform(&self) -> &'static str {
        match self {
            SignerKind::Wooolc => "传世单机社区",
            SignerKind::Iopq => "游戏藏宝湾",
            SignerKind::Odu => "零度网游单机",
            SignerKind::Rexuexia => "热血侠网游单机",
            SignerKind::Mefrp => "MEFRP",
            SignerKind::Ikuuu => "ikuuu",
            SignerKind::Tyyp => "天翼云盘",
            SignerKind::Natpierce => "皎月连",
        }
    }

    /// Site root used when the config does not override it.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            SignerKind::Wooolc => wooolc::BASE_URL,
            SignerKind::Iopq => iopq::BASE_URL,
            SignerKind::Odu => odu::BASE_URL,
            SignerKind::Rexuexia => rexuexia::BASE_URL,
            SignerKind::Mefrp => mefrp::BASE_URL,
            SignerKind::Ikuuu => ikuuu::BASE_URL,
            SignerKind::Tyyp => tyyp::BASE_URL,
            SignerKind::Natpierce => natpierce::BASE_URL,
        }
    }
}

impl fmt::Display for SignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.platform())
    }
}

/// Connection settings handed to every signer constructor.
#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub base_url: String,
    pub timeout: Duration,
}

impl SiteSettings {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Join a site-relative path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Build the cookie-carrying HTTP session a signer owns for one run.
pub fn http_session(platform: &str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .cookie_store(true)
        .user_agent(USER_AGENT)
        .build()
        .with_context(|| format!("Failed to build HTTP client for {platform}"))
}

/// GET a page and return its body, failing on non-2xx.
pub async fn fetch_text(http: &Client, url: &str) -> Result<String> {
    let resp = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request failed: {url}"))?;
    if !resp.status().is_success() {
        anyhow::bail!("HTTP {} from {url}", resp.status());
    }
    resp.text()
        .await
        .with_context(|| format!("Failed to read body: {url}"))
}

/// Construct the signer for `kind`.
pub fn build_signer(
    kind: SignerKind,
    credentials: Credentials,
    settings: SiteSettings,
) -> Result<Box<dyn Signer>> {
    let signer: Box<dyn Signer> = match kind {
        SignerKind::Wooolc => Box::new(wooolc::WooolcSigner::new(credentials, settings)?),
        SignerKind::Iopq => Box::new(iopq::IopqSigner::new(credentials, settings)?),
        SignerKind::Odu => Box::new(odu::OduSigner::new(credentials, settings)?),
        SignerKind::Rexuexia => Box::new(rexuexia::RexuexiaSigner::new(credentials, settings)?),
        SignerKind::Mefrp => Box::new(mefrp::MefrpSigner::new(credentials, settings)?),
        SignerKind::Ikuuu => Box::new(ikuuu::IkuuuSigner::new(credentials, settings)?),
        SignerKind::Tyyp => Box::new(tyyp::TyypSigner::new(credentials, settings)?),
        SignerKind::Natpierce => {
            Box::new(natpierce::NatpierceSigner::new(credentials, settings)?)
        }
    };
    Ok(signer)
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// One entry in the run plan: a platform plus its signer, if configured.
pub struct Slot {
    pub platform: String,
    pub signer: Option<Box<dyn Signer>>,
}

impl Slot {
    pub fn ready(signer: Box<dyn Signer>) -> Self {
        Self {
            platform: signer.platform().to_string(),
            signer: Some(signer),
        }
    }

    /// A configured slot under an explicit label (report line and
    /// state-file key).
    pub fn labelled(label: impl Into<String>, signer: Box<dyn Signer>) -> Self {
        Self {
            platform: label.into(),
            signer: Some(signer),
        }
    }

    pub fn unconfigured(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            signer: None,
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("platform", &self.platform)
            .field("configured", &self.signer.is_some())
            .finish()
    }
}

/// Label for the `index`-th account of a platform.
///
/// The first account keeps the bare platform name, so a single-account
/// setup reads and writes the same state-file key as it always has.
/// Further accounts are told apart by their login.
pub fn account_label(kind: SignerKind, index: usize, username: &str) -> String {
    if index == 0 {
        kind.platform().to_string()
    } else {
        format!("{} ({username})", kind.platform())
    }
}

/// Build the ordered run plan from configuration.
///
/// Disabled platforms are left out entirely. Enabled platforms without
/// credentials get an unconfigured slot so the report still mentions
/// them. A platform with several accounts gets one slot per account, in
/// the order the accounts are listed.
pub fn build_slots(cfg: &AppConfig, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Vec<Slot>> {
    let timeout = Duration::from_secs(cfg.run.http_timeout_secs);
    let mut slots = Vec::new();

    for kind in SignerKind::ALL {
        let platform_cfg = cfg.platforms.get(kind);
        if !platform_cfg.enabled {
            debug!(platform = %kind, "Platform disabled, skipping");
            continue;
        }

        let accounts = platform_cfg.accounts(lookup);
        if accounts.is_empty() {
            info!(
                platform = %kind,
                username_env = %platform_cfg.username_env,
                password_env = %platform_cfg.password_env,
                "No credentials configured"
            );
            slots.push(Slot::unconfigured(kind.platform()));
            continue;
        }

        let base_url = platform_cfg
            .base_url
            .clone()
            .unwrap_or_else(|| kind.default_base_url().to_string());
        debug!(platform = %kind, accounts = accounts.len(), "Building signers");
        for (index, credentials) in accounts.into_iter().enumerate() {
            let label = account_label(kind, index, &credentials.username);
            let signer = build_signer(kind, credentials, SiteSettings::new(&base_url, timeout))?;
            slots.push(Slot::labelled(label, signer));
        }
    }

    Ok(slots)
}
