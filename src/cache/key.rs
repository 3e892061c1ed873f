use std::fmt::{Display, Formatter};

use crate::actor::{ActorHandle, Paper, Review, UserProfile};
use crate::error::AppResult;

/// A cacheable remote read: operation plus parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryKey {
    CallerProfile,
    AllPapers,
    Paper(String),
    ReviewsForPaper(String),
    TokenBalance,
}

impl QueryKey {
    pub fn operation_name(&self) -> &'static str {
        match self {
            QueryKey::CallerProfile => "getCallerUserProfile",
            QueryKey::AllPapers => "getAllPapers",
            QueryKey::Paper(_) => "getPaper",
            QueryKey::ReviewsForPaper(_) => "getReviewsForPaper",
            QueryKey::TokenBalance => "getUserTokenBalance",
        }
    }

    pub fn paper_id(&self) -> Option<&str> {
        match self {
            QueryKey::Paper(id) | QueryKey::ReviewsForPaper(id) => Some(id.as_str()),
            _ => None,
        }
    }

    pub(crate) async fn run(&self, actor: &ActorHandle) -> AppResult<QueryValue> {
        Ok(match self {
            QueryKey::CallerProfile => QueryValue::Profile(actor.get_caller_user_profile().await?),
            QueryKey::AllPapers => QueryValue::Papers(actor.get_all_papers().await?),
            QueryKey::Paper(id) => QueryValue::Paper(actor.get_paper(id).await?),
            QueryKey::ReviewsForPaper(id) => QueryValue::Reviews(actor.get_reviews_for_paper(id).await?),
            QueryKey::TokenBalance => QueryValue::Balance(actor.get_user_token_balance().await?),
        })
    }
}

impl Display for QueryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.paper_id() {
            Some(id) => write!(f, "{}({})", self.operation_name(), id),
            None => f.write_str(self.operation_name()),
        }
    }
}

/// Cached reply of one key.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Profile(Option<UserProfile>),
    Papers(Vec<Paper>),
    Paper(Option<Paper>),
    Reviews(Vec<Review>),
    Balance(u64),
}

impl QueryValue {
    pub fn into_profile(self) -> Option<Option<UserProfile>> {
        if let QueryValue::Profile(p) = self { Some(p) } else { None }
    }
    pub fn into_papers(self) -> Option<Vec<Paper>> {
        if let QueryValue::Papers(p) = self { Some(p) } else { None }
    }
    pub fn into_paper(self) -> Option<Option<Paper>> {
        if let QueryValue::Paper(p) = self { Some(p) } else { None }
    }
    pub fn into_reviews(self) -> Option<Vec<Review>> {
        if let QueryValue::Reviews(r) = self { Some(r) } else { None }
    }
    pub fn into_balance(self) -> Option<u64> {
        if let QueryValue::Balance(b) = self { Some(b) } else { None }
    }
}
