use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use super::factory::{Connector, TrustAnchor};
use super::{Backend, Paper, Review, SubmitPaperArgs, SubmitReviewArgs, UserProfile, UserRole};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::identity::{Identity, Principal};

/// Header a replica uses to present its root key with each reply.
pub const ROOT_KEY_HEADER: &str = "x-replica-root-key";

pub struct HttpConnector {
    client: reqwest::Client,
    host: Url,
    endpoint: Url,
}

impl HttpConnector {
    pub fn new(client: reqwest::Client, host: &Url, canister_id: &str) -> AppResult<Self> {
        let endpoint = host
            .join(&format!("/api/{}/", canister_id))
            .map_err(|e| AppError::user("invalid_config".to_string(), format!("invalid canister id '{}': {}", canister_id, e)))?;
        Ok(Self { client, host: host.clone(), endpoint })
    }

    pub fn from_config(cfg: &Config) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(cfg.request_timeout)
            .build()?;
        Self::new(client, &cfg.host, &cfg.canister_id)
    }

    pub fn client(&self) -> reqwest::Client { self.client.clone() }
}

#[async_trait]
impl Connector for HttpConnector {
    fn connect(&self, identity: Option<&Identity>, trust: Arc<TrustAnchor>) -> Arc<dyn Backend> {
        Arc::new(HttpBackend {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            delegation: identity.map(|i| i.delegation.clone()),
            trust,
        })
    }

    async fn fetch_root_key(&self) -> AppResult<String> {
        let url = self.host.join("/api/v2/status").map_err(|e| AppError::internal("bad_host_url".to_string(), e.to_string()))?;
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::transport("replica_unreachable".to_string(), format!("status endpoint returned HTTP {}", resp.status())));
        }
        let v: Value = resp.json().await?;
        v.get("root_key")
            .and_then(|k| k.as_str())
            .filter(|k| !k.is_empty())
            .map(|k| k.to_string())
            .ok_or_else(|| AppError::decode("root_key_missing", "replica status carried no root key"))
    }
}

/// JSON-over-HTTP binding of the remote interface:
/// `POST {host}/api/{canister}/{method}` with `{"args": [...]}`, answered by
/// `{"status":"ok","reply":...}` or `{"status":"error","error":"..."}`.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: Url,
    delegation: Option<String>,
    trust: Arc<TrustAnchor>,
}

impl HttpBackend {
    async fn call<T: DeserializeOwned>(&self, method: &str, args: Value) -> AppResult<T> {
        let url = self.endpoint.join(method).map_err(|e| AppError::internal("bad_method_url".to_string(), e.to_string()))?;
        let mut req = self.client.post(url).json(&json!({ "args": args }));
        if let Some(tok) = &self.delegation {
            req = req.bearer_auth(tok);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let presented = resp
            .headers()
            .get(ROOT_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::from_remote_status(status.as_u16(), &text));
        }
        self.trust.verify(presented.as_deref())?;
        let val: Value = resp.json().await?;
        debug!(target: "academic_chain::actor", "remote.call method={} status={}", method, val.get("status").and_then(|s| s.as_str()).unwrap_or("?"));
        decode_reply(val)
    }
}

fn decode_reply<T: DeserializeOwned>(val: Value) -> AppResult<T> {
    if val.get("status").and_then(|s| s.as_str()) == Some("ok") {
        let reply = val.get("reply").cloned().unwrap_or(Value::Null);
        return Ok(serde_json::from_value(reply)?);
    }
    let msg = val
        .get("error")
        .and_then(|e| e.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("remote error: {}", val));
    Err(AppError::rejected("remote_rejected".to_string(), msg))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn assign_caller_user_role(&self, user: &Principal, role: UserRole) -> AppResult<()> {
        self.call("assignCallerUserRole", json!([user, role])).await
    }
    async fn get_all_papers(&self) -> AppResult<Vec<Paper>> {
        self.call("getAllPapers", json!([])).await
    }
    async fn get_caller_user_profile(&self) -> AppResult<Option<UserProfile>> {
        self.call("getCallerUserProfile", json!([])).await
    }
    async fn get_caller_user_role(&self) -> AppResult<UserRole> {
        self.call("getCallerUserRole", json!([])).await
    }
    async fn get_paper(&self, paper_id: &str) -> AppResult<Option<Paper>> {
        self.call("getPaper", json!([paper_id])).await
    }
    async fn get_reviews_for_paper(&self, paper_id: &str) -> AppResult<Vec<Review>> {
        self.call("getReviewsForPaper", json!([paper_id])).await
    }
    async fn get_user_profile(&self, user: &Principal) -> AppResult<Option<UserProfile>> {
        self.call("getUserProfile", json!([user])).await
    }
    async fn get_user_token_balance(&self) -> AppResult<u64> {
        self.call("getUserTokenBalance", json!([])).await
    }
    async fn initialize_access_control(&self) -> AppResult<()> {
        self.call("initializeAccessControl", json!([])).await
    }
    async fn is_caller_admin(&self) -> AppResult<bool> {
        self.call("isCallerAdmin", json!([])).await
    }
    async fn save_caller_user_profile(&self, profile: &UserProfile) -> AppResult<()> {
        self.call("saveCallerUserProfile", json!([profile])).await
    }
    async fn submit_paper(&self, args: &SubmitPaperArgs) -> AppResult<()> {
        self.call(
            "submitPaper",
            json!([args.id, args.title, args.abstract_text, args.file_reference, args.external_link, args.citations]),
        )
        .await
    }
    async fn submit_review(&self, args: &SubmitReviewArgs) -> AppResult<()> {
        self.call("submitReview", json!([args.id, args.paper_id, args.rating, args.feedback])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_scoped_to_canister() {
        let host = Url::parse("http://127.0.0.1:4943").unwrap();
        let c = HttpConnector::new(reqwest::Client::new(), &host, "aaaaa-aa").unwrap();
        assert_eq!(c.endpoint.join("getAllPapers").unwrap().as_str(), "http://127.0.0.1:4943/api/aaaaa-aa/getAllPapers");
    }

    #[test]
    fn ok_reply_decodes() {
        let v: Option<UserProfile> = decode_reply(json!({"status": "ok", "reply": null})).unwrap();
        assert!(v.is_none());
        let n: u64 = decode_reply(json!({"status": "ok", "reply": 42})).unwrap();
        assert_eq!(n, 42);
        let () = decode_reply(json!({"status": "ok"})).unwrap();
    }

    #[test]
    fn error_reply_is_verbatim_rejection() {
        let err = decode_reply::<()>(json!({"status": "error", "error": "must review paper before citing it"})).unwrap_err();
        assert!(matches!(err, AppError::Rejected { .. }));
        assert_eq!(err.message(), "must review paper before citing it");
    }

    #[test]
    fn wrong_shape_is_decode_error() {
        let err = decode_reply::<u64>(json!({"status": "ok", "reply": "many"})).unwrap_err();
        assert!(matches!(err, AppError::Decode { .. }));
    }
}
