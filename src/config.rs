//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Credentials and notifier secrets are referenced by env-var name in the
//! config and resolved at runtime, so the file itself holds no secrets.
//! Every field has a default: a missing file is a valid (default) config.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::signers::SignerKind;
use crate::storage::DEFAULT_STATE_FILE;
use crate::types::Credentials;

/// Default config file path, overridable via `CHECKIN_CONFIG`.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub run: RunConfig,
    pub logging: LoggingConfig,
    pub notifier: NotifierConfig,
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunConfig {
    /// Where last-known balances are persisted between runs.
    pub state_file: String,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            state_file: DEFAULT_STATE_FILE.to_string(),
            min_delay_secs: 1,
            max_delay_secs: 3,
            http_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "checkin=info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotifierConfig {
    pub enabled: bool,
    /// First line of every pushed message.
    pub title: String,
    pub corp_id_env: String,
    pub secret_env: String,
    pub agent_id_env: String,
    /// Recipient group; `@all` broadcasts to everyone in the app's scope.
    pub to_user: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            title: "【全平台签到汇总】".to_string(),
            corp_id_env: "WECOM_CORPID".to_string(),
            secret_env: "WECOM_SECRET".to_string(),
            agent_id_env: "WECOM_AGENTID".to_string(),
            to_user: "@all".to_string(),
        }
    }
}

/// Per-platform settings, one field per supported platform.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlatformsConfig {
    pub wooolc: PlatformConfig,
    pub iopq: PlatformConfig,
    pub odu: PlatformConfig,
    pub rexuexia: PlatformConfig,
    pub mefrp: PlatformConfig,
    pub ikuuu: PlatformConfig,
    pub tyyp: PlatformConfig,
    pub natpierce: PlatformConfig,
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            wooolc: PlatformConfig::with_env("WOOOLCZ", "WOOOLM"),
            iopq: PlatformConfig::with_env("WYDJZ", "WYDJM1"),
            odu: PlatformConfig::with_env("WYDJZ", "WYDJM"),
            rexuexia: PlatformConfig::with_env("WYDJZ", "WYDJM"),
            mefrp: PlatformConfig::with_env("Mez", "Mem"),
            ikuuu: PlatformConfig::with_env("IKUUU_USER", "IKUUU_PASS"),
            tyyp: PlatformConfig {
                separator: "&".to_string(),
                ..PlatformConfig::with_env("ty_username", "ty_password")
            },
            natpierce: PlatformConfig::with_env("JYLZ", "JYLM"),
        }
    }
}

impl PlatformsConfig {
    pub fn get(&self, kind: SignerKind) -> &PlatformConfig {
        match kind {
            SignerKind::Wooolc => &self.wooolc,
            SignerKind::Iopq => &self.iopq,
            SignerKind::Odu => &self.odu,
            SignerKind::Rexuexia => &self.rexuexia,
            SignerKind::Mefrp => &self.mefrp,
            SignerKind::Ikuuu => &self.ikuuu,
            SignerKind::Tyyp => &self.tyyp,
            SignerKind::Natpierce => &self.natpierce,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub username_env: String,
    pub password_env: String,
    /// Overrides the platform's built-in site root.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Splits several accounts packed into one variable (`a|b`).
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_true() -> bool {
    true
}

fn default_separator() -> String {
    "|".to_string()
}

impl PlatformConfig {
    fn with_env(username_env: &str, password_env: &str) -> Self {
        Self {
            enabled: true,
            username_env: username_env.to_string(),
            password_env: password_env.to_string(),
            base_url: None,
            separator: default_separator(),
        }
    }

    /// Resolve this platform's accounts through `lookup`.
    ///
    /// Both variables may hold several values joined by `separator`,
    /// paired up by position. Blank pairs are skipped. An unset variable
    /// or differing counts yield no accounts, and the platform is then
    /// reported as not configured.
    pub fn accounts(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Vec<Credentials> {
        let (Some(usernames), Some(passwords)) = (
            non_blank(lookup(&self.username_env)),
            non_blank(lookup(&self.password_env)),
        ) else {
            return Vec::new();
        };

        let usernames = self.split(&usernames);
        let passwords = self.split(&passwords);
        if usernames.len() != passwords.len() {
            warn!(
                username_env = %self.username_env,
                password_env = %self.password_env,
                usernames = usernames.len(),
                passwords = passwords.len(),
                "Account and password counts differ, ignoring both"
            );
            return Vec::new();
        }

        usernames
            .into_iter()
            .zip(passwords)
            .map(|(user, pass)| (user.trim(), pass.trim()))
            .filter(|(user, pass)| !user.is_empty() && !pass.is_empty())
            .map(|(user, pass)| Credentials::new(user, pass))
            .collect()
    }

    fn split<'v>(&self, value: &'v str) -> Vec<&'v str> {
        if self.separator.is_empty() {
            vec![value]
        } else {
            value.split(self.separator.as_str()).collect()
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; an unreadable or malformed
    /// file is an error.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            info!(path, "No config file found, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Option<String> {
        std::env::var(env_name).ok()
    }
}
