//! Request log persistence
//!
//! The proxy only needs `save` and `update_with_response`; the query,
//! aggregate and delete operations back the dashboard API.

mod memory;
mod sqlite;
mod summary;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use summary::{
    DailyTokens, DashboardStats, HourlyTokens, ModelStats, ModelTokens, RequestSummary,
    StatsBuilder, StatsQuery, SummaryPage, SummaryQuery,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::RequestRecord;

/// Page/limit/model filter for listing requests
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RequestQuery {
    /// 1-based page number
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Case-insensitive substring of the model name; `all` means no filter
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for RequestQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            model: None,
        }
    }
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    10
}

/// Largest page size the store will return
pub const MAX_PAGE_LIMIT: usize = 1000;

impl RequestQuery {
    /// Rows to skip; saturates for absurd page numbers
    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1).saturating_mul(self.clamped_limit())
    }

    pub fn clamped_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }

    /// Lowercased model filter, if one applies
    pub fn model_filter(&self) -> Option<String> {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty() && !m.eq_ignore_ascii_case("all"))
            .map(str::to_lowercase)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestPage {
    pub requests: Vec<RequestRecord>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

/// Durable store for request records.
///
/// Implementations serialize their own writes.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new (pending) record and return its id
    async fn save(&self, record: &RequestRecord) -> Result<String>;

    /// Store the record's response and routing outcome
    async fn update_with_response(&self, record: &RequestRecord) -> Result<()>;

    /// Newest first
    async fn list(&self, query: &RequestQuery) -> Result<RequestPage>;

    /// Newest first, without headers or bodies
    async fn summaries(&self, query: &SummaryQuery) -> Result<SummaryPage>;

    /// Token usage over the completed requests in the query window
    async fn stats(&self, query: &StatsQuery) -> Result<DashboardStats>;

    /// Look up by full id or by a trailing fragment of it
    async fn get(&self, id: &str) -> Result<Option<RequestRecord>>;

    /// Delete everything, returning how many records were removed
    async fn clear(&self) -> Result<usize>;
}

/// Whether `fragment` can name a request id
pub(crate) fn is_id_fragment(fragment: &str) -> bool {
    !fragment.is_empty() && fragment.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults_and_offset() {
        let query = RequestQuery::default();
        assert_eq!(query.offset(), 0);
        assert_eq!(query.clamped_limit(), 10);

        let query = RequestQuery {
            page: 3,
            limit: 20,
            model: None,
        };
        assert_eq!(query.offset(), 40);

        let query = RequestQuery {
            page: 0,
            limit: 0,
            model: None,
        };
        assert_eq!(query.offset(), 0);
        assert_eq!(query.clamped_limit(), 1);

        let query = RequestQuery {
            page: usize::MAX,
            limit: 2,
            model: None,
        };
        assert_eq!(query.offset(), usize::MAX);
    }

    #[test]
    fn test_model_filter() {
        let mut query = RequestQuery::default();
        assert_eq!(query.model_filter(), None);
        query.model = Some("all".to_string());
        assert_eq!(query.model_filter(), None);
        query.model = Some("Opus".to_string());
        assert_eq!(query.model_filter().as_deref(), Some("opus"));
    }

    #[test]
    fn test_id_fragment() {
        assert!(is_id_fragment("a1b2"));
        assert!(!is_id_fragment(""));
        assert!(!is_id_fragment("50%"));
    }
}
