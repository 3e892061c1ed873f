//! Transport shapes declared by the remote service interface.

use serde::{Deserialize, Serialize};

use crate::identity::Principal;

/// Nanoseconds since the Unix epoch, as the remote clock reports it.
pub type Time = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalBlob {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub author: Principal,
    pub submission_date: Time,
    #[serde(default)]
    pub citations: Vec<String>,
    pub review_count: u64,
    pub aggregate_rating: f64,
    #[serde(default)]
    pub file_reference: Option<ExternalBlob>,
    #[serde(default)]
    pub external_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub paper_id: String,
    pub reviewer: Principal,
    pub rating: u64,
    pub feedback: String,
    pub submission_date: Time,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    pub reputation: u64,
    pub token_balance: u64,
}

impl UserProfile {
    /// Profile as first created by a new user; the remote owns the counters.
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self { name: name.into(), reputation: 0, token_balance: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    User,
    Guest,
}

impl UserRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "user" => Some(UserRole::User),
            "guest" => Some(UserRole::Guest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
            UserRole::Guest => "guest",
        }
    }
}

/// Arguments of `submitPaper`, borrowed by the mutation so a failed submit
/// leaves the caller's copy untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPaperArgs {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub file_reference: Option<ExternalBlob>,
    pub external_link: Option<String>,
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReviewArgs {
    pub id: String,
    pub paper_id: String,
    pub rating: u64,
    pub feedback: String,
}

/// Client-side id in the `<kind>-<millis>-<suffix>` shape the service expects.
pub fn new_record_id(kind: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", kind, chrono::Utc::now().timestamp_millis(), &suffix[..9])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_wire_names() {
        let v = serde_json::json!({
            "id": "paper-1", "title": "T", "abstract": "A", "author": "aaaaa-aa",
            "submissionDate": 1_700_000_000_000_000_000i64, "citations": [],
            "reviewCount": 2, "aggregateRating": 4.5, "fileReference": null, "externalLink": "https://arxiv.org/abs/1"
        });
        let p: Paper = serde_json::from_value(v).unwrap();
        assert_eq!(p.abstract_text, "A");
        assert_eq!(p.review_count, 2);
        assert_eq!(p.external_link.as_deref(), Some("https://arxiv.org/abs/1"));
        assert!(p.file_reference.is_none());
    }

    #[test]
    fn role_parse() {
        assert_eq!(UserRole::parse("Admin"), Some(UserRole::Admin));
        assert_eq!(UserRole::parse("guest"), Some(UserRole::Guest));
        assert_eq!(UserRole::parse("root"), None);
        assert_eq!(UserRole::User.as_str(), "user");
    }

    #[test]
    fn record_ids_are_prefixed_and_distinct() {
        let a = new_record_id("paper");
        let b = new_record_id("paper");
        assert!(a.starts_with("paper-"));
        assert_ne!(a, b);
        assert_eq!(a.rsplit('-').next().unwrap().len(), 9);
    }
}
