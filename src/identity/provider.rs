use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};

use super::principal::{Identity, Principal};
use crate::error::{AppError, AppResult};

/// Lifetime requested for a fresh delegation.
pub const DEFAULT_DELEGATION_TTL: Duration = Duration::from_secs(8 * 60 * 60);

/// Runs the external authentication ceremony. May take as long as the user
/// takes; a cancelled ceremony is an `Auth` error with code `login_cancelled`.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self) -> AppResult<Identity>;
}

/// What the user must do to approve the login on the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum PollReply {
    Pending,
    Approved { principal: Principal, delegation: String, expires_at: DateTime<Utc> },
    Denied {
        #[serde(default)]
        reason: Option<String>,
    },
    Expired,
}

pub type ChallengePrompt = Arc<dyn Fn(&Challenge) + Send + Sync>;

/// Device-authorization ceremony against the identity provider: request a
/// challenge, show it to the user, then poll until it is approved, denied
/// or expires.
pub struct HttpAuthProvider {
    client: reqwest::Client,
    base: Url,
    poll_interval: Duration,
    prompt: ChallengePrompt,
}

impl HttpAuthProvider {
    pub fn new(client: reqwest::Client, provider: &Url, prompt: ChallengePrompt) -> Self {
        let mut base = provider.clone();
        base.set_fragment(None);
        Self { client, base, poll_interval: Duration::from_secs(2), prompt }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> AppResult<serde_json::Value> {
        let url = self.base.join(path).map_err(|e| AppError::internal("bad_provider_url".to_string(), e.to_string()))?;
        let resp = self.client.post(url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::auth("login_failed".to_string(), format!("identity provider HTTP {}: {}", status, text.trim())));
        }
        Ok(resp.json::<serde_json::Value>().await?)
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn authenticate(&self) -> AppResult<Identity> {
        let v = self
            .post_json("device/authorize", serde_json::json!({ "max_time_to_live_ns": DEFAULT_DELEGATION_TTL.as_nanos() as u64 }))
            .await?;
        let challenge: Challenge = serde_json::from_value(v)?;
        let interval = challenge.interval_secs.map(Duration::from_secs).unwrap_or(self.poll_interval);
        (self.prompt)(&challenge);
        info!(target: "academic_chain::identity", "auth.challenge url={} code={}", challenge.verification_url, challenge.user_code);

        loop {
            tokio::time::sleep(interval).await;
            let v = self.post_json("device/token", serde_json::json!({ "device_code": challenge.device_code })).await?;
            match serde_json::from_value::<PollReply>(v)? {
                PollReply::Pending => {
                    debug!(target: "academic_chain::identity", "auth.poll pending");
                    continue;
                }
                PollReply::Approved { principal, delegation, expires_at } => {
                    return Ok(Identity { principal, delegation, expires_at });
                }
                PollReply::Denied { reason } => {
                    return Err(AppError::auth("login_cancelled".to_string(), reason.unwrap_or_else(|| "login was cancelled".to_string())));
                }
                PollReply::Expired => {
                    return Err(AppError::auth("login_expired", "login challenge expired before approval"));
                }
            }
        }
    }
}

/// Provider with preset outcomes, for offline sessions and tests. Outcomes
/// are consumed in order; once exhausted the fallback (if any) is returned.
pub struct StaticAuthProvider {
    outcomes: Mutex<VecDeque<AppResult<Identity>>>,
    fallback: Option<Identity>,
    calls: AtomicUsize,
}

impl StaticAuthProvider {
    pub fn approving(identity: Identity) -> Self {
        Self { outcomes: Mutex::new(VecDeque::new()), fallback: Some(identity), calls: AtomicUsize::new(0) }
    }

    pub fn scripted(outcomes: Vec<AppResult<Identity>>) -> Self {
        Self { outcomes: Mutex::new(outcomes.into()), fallback: None, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn authenticate(&self) -> AppResult<Identity> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.outcomes.lock().pop_front() {
            return next;
        }
        match &self.fallback {
            Some(id) => Ok(id.clone()),
            None => Err(AppError::auth("login_cancelled", "no identity available")),
        }
    }
}
