use super::client::QueryClient;
use super::key::{QueryKey, QueryValue};
use super::state::QueryResult;
use crate::actor::{Paper, Review, UserProfile};

impl QueryClient {
    pub async fn caller_profile(&self) -> QueryResult<Option<UserProfile>> {
        self.fetch(&QueryKey::CallerProfile).await.map(QueryValue::into_profile)
    }

    pub async fn all_papers(&self) -> QueryResult<Vec<Paper>> {
        self.fetch(&QueryKey::AllPapers).await.map(QueryValue::into_papers)
    }

    /// Without an id nothing is sent and the result is not ready.
    pub async fn paper(&self, paper_id: Option<&str>) -> QueryResult<Option<Paper>> {
        match paper_id.filter(|id| !id.is_empty()) {
            Some(id) => self.fetch(&QueryKey::Paper(id.to_string())).await.map(QueryValue::into_paper),
            None => QueryResult::not_ready(),
        }
    }

    pub async fn reviews_for_paper(&self, paper_id: Option<&str>) -> QueryResult<Vec<Review>> {
        match paper_id.filter(|id| !id.is_empty()) {
            Some(id) => self.fetch(&QueryKey::ReviewsForPaper(id.to_string())).await.map(QueryValue::into_reviews),
            None => QueryResult::not_ready(),
        }
    }

    pub async fn token_balance(&self) -> QueryResult<u64> {
        self.fetch(&QueryKey::TokenBalance).await.map(QueryValue::into_balance)
    }
}

/// Signed in, the profile read has completed, and there is no profile yet.
pub fn needs_profile_setup(authenticated: bool, profile: &QueryResult<Option<UserProfile>>) -> bool {
    authenticated && profile.is_success() && matches!(profile.value, Some(None))
}
