//! In-memory request store for tests and ephemeral runs

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    DashboardStats, RequestPage, RequestQuery, RequestStore, RequestSummary, StatsBuilder,
    StatsQuery, SummaryPage, SummaryQuery, is_id_fragment,
};
use crate::error::{Result, TollgateError};
use crate::record::RequestRecord;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<RequestRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, oldest first
    pub async fn records(&self) -> Vec<RequestRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn save(&self, record: &RequestRecord) -> Result<String> {
        self.records.write().await.push(record.clone());
        Ok(record.request_id.clone())
    }

    async fn update_with_response(&self, record: &RequestRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let stored = records
            .iter_mut()
            .find(|r| r.request_id == record.request_id)
            .ok_or_else(|| TollgateError::Storage(format!("request {} not found", record.request_id)))?;

        stored.response = record.response.clone();
        stored.original_model = record.original_model.clone();
        stored.routed_model = record.routed_model.clone();
        stored.provider = record.provider.clone();
        Ok(())
    }

    async fn list(&self, query: &RequestQuery) -> Result<RequestPage> {
        let filter = query.model_filter();
        let mut matching: Vec<RequestRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| {
                filter
                    .as_deref()
                    .is_none_or(|f| r.model.to_lowercase().contains(f))
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matching.len();
        let requests = matching
            .into_iter()
            .skip(query.offset())
            .take(query.clamped_limit())
            .collect();

        Ok(RequestPage {
            requests,
            total,
            page: query.page.max(1),
            limit: query.clamped_limit(),
        })
    }

    async fn summaries(&self, query: &SummaryQuery) -> Result<SummaryPage> {
        let paging = query.paging();
        let filter = paging.model_filter();
        let records = self.records.read().await;
        let mut matching: Vec<&RequestRecord> = records
            .iter()
            .filter(|r| query.in_window(&r.timestamp))
            .filter(|r| {
                filter
                    .as_deref()
                    .is_none_or(|f| r.model.to_lowercase().contains(f))
            })
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matching.len();
        let requests = matching
            .into_iter()
            .skip(paging.offset())
            .take(paging.clamped_limit())
            .map(RequestSummary::from_record)
            .collect();

        Ok(SummaryPage {
            requests,
            total,
            page: paging.page.max(1),
            limit: paging.clamped_limit(),
        })
    }

    async fn stats(&self, query: &StatsQuery) -> Result<DashboardStats> {
        let now = Utc::now();
        let (start, end) = query.window(now);
        let mut builder = StatsBuilder::new(query.selected_day(now));

        let records = self.records.read().await;
        let mut completed: Vec<&RequestRecord> = records
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp < end && r.response.is_some())
            .collect();
        completed.sort_by_key(|r| r.timestamp);
        for record in completed {
            if let Some(response) = &record.response {
                builder.add(&record.timestamp, &record.model, response);
            }
        }
        Ok(builder.finish())
    }

    async fn get(&self, id: &str) -> Result<Option<RequestRecord>> {
        if !is_id_fragment(id) {
            return Ok(None);
        }
        let records = self.records.read().await;
        let found = records
            .iter()
            .find(|r| r.request_id == id)
            .or_else(|| records.iter().rev().find(|r| r.request_id.ends_with(id)));
        Ok(found.cloned())
    }

    async fn clear(&self) -> Result<usize> {
        let mut records = self.records.write().await;
        let count = records.len();
        records.clear();
        Ok(count)
    }
}
