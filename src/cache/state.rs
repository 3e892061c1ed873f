use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Readiness gate closed (or no id); nothing was sent.
    NotReady,
    /// Known key, no request issued yet in this generation.
    Idle,
    Pending,
    Success,
    Error,
}

/// What a reader of one key sees. `value` keeps the last good reply while a
/// refetch is pending, so "fetched empty" and "not ready" stay distinct.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub status: QueryStatus,
    pub value: Option<T>,
    pub error: Option<AppError>,
    pub updated_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

impl<T> QueryResult<T> {
    pub fn not_ready() -> Self {
        Self { status: QueryStatus::NotReady, value: None, error: None, updated_at: None, stale: false }
    }

    pub fn is_not_ready(&self) -> bool { self.status == QueryStatus::NotReady }
    pub fn is_loading(&self) -> bool { self.status == QueryStatus::Pending }
    pub fn is_error(&self) -> bool { self.status == QueryStatus::Error }
    pub fn is_success(&self) -> bool { self.status == QueryStatus::Success }
    /// A reply (good or bad) has arrived for the current readiness.
    pub fn is_fetched(&self) -> bool { matches!(self.status, QueryStatus::Success | QueryStatus::Error) }

    /// The failure of the last request, or whatever value is held.
    pub fn into_result(self) -> AppResult<Option<T>> {
        match (self.status, self.error) {
            (QueryStatus::Error, Some(e)) => Err(e),
            (_, _) => Ok(self.value),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> Option<U>) -> QueryResult<U> {
        QueryResult {
            status: self.status,
            value: self.value.and_then(f),
            error: self.error,
            updated_at: self.updated_at,
            stale: self.stale,
        }
    }
}

impl<T: Default> QueryResult<T> {
    /// Value for display: the reply, or an empty default while not ready,
    /// loading or failed.
    pub fn value_or_default(self) -> T { self.value.unwrap_or_default() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_is_distinct_from_empty_success() {
        let nr: QueryResult<Vec<u8>> = QueryResult::not_ready();
        let empty = QueryResult { status: QueryStatus::Success, value: Some(Vec::<u8>::new()), error: None, updated_at: Some(Utc::now()), stale: false };
        assert!(nr.is_not_ready() && !nr.is_fetched());
        assert!(empty.is_fetched() && !empty.is_not_ready());
        assert_eq!(nr.value_or_default(), empty.value_or_default());
    }

    #[test]
    fn into_result_surfaces_errors() {
        let failed: QueryResult<u64> = QueryResult {
            status: QueryStatus::Error,
            value: Some(1),
            error: Some(AppError::transport("network_error", "down")),
            updated_at: None,
            stale: false,
        };
        assert_eq!(failed.into_result().unwrap_err().code_str(), "network_error");
        assert_eq!(QueryResult::<u64>::not_ready().into_result().unwrap(), None);
    }

    #[test]
    fn map_keeps_status() {
        let r = QueryResult { status: QueryStatus::Pending, value: Some(3u64), error: None, updated_at: None, stale: true };
        let m = r.map(|v| Some(v * 2));
        assert!(m.is_loading());
        assert_eq!(m.value, Some(6));
        assert!(m.stale);
    }
}
