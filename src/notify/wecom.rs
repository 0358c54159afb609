//! WeCom (企业微信) application message push.
//!
//! Two calls per report: exchange corp id + app secret for a short-lived
//! access token, then post a text message to the recipient group with
//! that token. Both replies carry an `errcode` that must be 0. The token
//! is fetched fresh for every send.
//!
//! API docs: https://developer.work.weixin.qq.com/document/path/90236

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::Notifier;
use crate::config::NotifierConfig;
use crate::types::CheckinError;

const BASE_URL: &str = "https://qyapi.weixin.qq.com/cgi-bin";
const CHANNEL: &str = "wecom";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    touser: &'a str,
    msgtype: &'static str,
    agentid: &'a str,
    text: TextBody<'a>,
    safe: u8,
}

fn rejected(code: i64, message: String) -> CheckinError {
    CheckinError::NotifyRejected {
        channel: CHANNEL.to_string(),
        code,
        message,
    }
}

fn token_from(reply: TokenReply) -> Result<String> {
    if reply.errcode != 0 {
        return Err(rejected(reply.errcode, reply.errmsg).into());
    }
    reply
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| rejected(0, "reply carried no access_token".to_string()).into())
}

fn check_sent(reply: SendReply) -> Result<()> {
    if reply.errcode != 0 {
        return Err(rejected(reply.errcode, reply.errmsg).into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct WeComNotifier {
    http: Client,
    corp_id: String,
    secret: SecretString,
    agent_id: String,
    to_user: String,
    title: String,
}

impl WeComNotifier {
    pub fn new(
        corp_id: String,
        secret: String,
        agent_id: String,
        cfg: &NotifierConfig,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client for WeCom")?;

        Ok(Self {
            http,
            corp_id,
            secret: SecretString::new(secret),
            agent_id,
            to_user: cfg.to_user.clone(),
            title: cfg.title.clone(),
        })
    }

    /// The text actually pushed: title line, then the report.
    fn compose(&self, content: &str) -> String {
        if self.title.is_empty() {
            content.to_string()
        } else {
            format!("{}\n{content}", self.title)
        }
    }

    async fn access_token(&self) -> Result<String> {
        let url = format!(
            "{BASE_URL}/gettoken?corpid={}&corpsecret={}",
            urlencoding::encode(&self.corp_id),
            urlencoding::encode(self.secret.expose_secret()),
        );
        let reply: TokenReply = self
            .http
            .get(&url)
            .send()
            .await
            .context("WeCom token request failed")?
            .json()
            .await
            .context("Failed to parse WeCom token reply")?;
        token_from(reply)
    }
}

#[async_trait]
impl Notifier for WeComNotifier {
    async fn send(&self, content: &str) -> Result<()> {
        let token = self.access_token().await?;
        debug!("WeCom access token acquired");

        let text = self.compose(content);
        let message = TextMessage {
            touser: &self.to_user,
            msgtype: "text",
            agentid: &self.agent_id,
            text: TextBody { content: &text },
            safe: 0,
        };
        let url = format!(
            "{BASE_URL}/message/send?access_token={}",
            urlencoding::encode(&token)
        );

        let reply: SendReply = self
            .http
            .post(&url)
            .json(&message)
            .send()
            .await
            .context("WeCom send request failed")?
            .json()
            .await
            .context("Failed to parse WeCom send reply")?;
        check_sent(reply)?;

        info!(channel = CHANNEL, to = %self.to_user, chars = text.chars().count(), "Report pushed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        CHANNEL
    }
}
