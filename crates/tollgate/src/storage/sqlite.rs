//! SQLite request store

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    DashboardStats, RequestPage, RequestQuery, RequestStore, RequestSummary, StatsBuilder,
    StatsQuery, SummaryPage, SummaryQuery, is_id_fragment,
};
use crate::error::{Result, TollgateError};
use crate::record::{RequestRecord, ResponseRecord};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS requests (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    method TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT NOT NULL,
    user_agent TEXT,
    content_type TEXT,
    response TEXT,
    model TEXT,
    original_model TEXT,
    routed_model TEXT,
    provider TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_timestamp ON requests(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_endpoint ON requests(endpoint);
CREATE INDEX IF NOT EXISTS idx_model ON requests(model);
"#;

const SELECT_COLUMNS: &str = "SELECT id, timestamp, method, endpoint, headers, body, model, \
     user_agent, content_type, response, original_model, routed_model, provider FROM requests";

/// Request store on a single SQLite connection.
///
/// The connection sits behind a mutex and is only touched from blocking
/// tasks, so writes are serialized and async workers never block on disk.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        tracing::info!("Request log database: {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| TollgateError::Storage("database lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| TollgateError::Storage(format!("storage task failed: {e}")))?
    }
}

/// Fixed-width UTC form, so text comparison orders rows by time
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(id: &str, text: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)
        .map_err(|e| TollgateError::Storage(format!("bad timestamp on {id}: {e}")))?
        .with_timezone(&Utc))
}

/// `WHERE` clause and its named parameters for the listing filters
#[derive(Default)]
struct RowFilter {
    clauses: Vec<&'static str>,
    values: Vec<(&'static str, String)>,
}

impl RowFilter {
    fn model(mut self, filter: Option<String>) -> Self {
        if let Some(filter) = filter {
            self.clauses.push("LOWER(model) LIKE :pattern");
            self.values.push((":pattern", format!("%{filter}%")));
        }
        self
    }

    fn between(mut self, start: Option<&DateTime<Utc>>, end: Option<&DateTime<Utc>>) -> Self {
        if let Some(start) = start {
            self.clauses.push("timestamp >= :start");
            self.values.push((":start", format_timestamp(start)));
        }
        if let Some(end) = end {
            self.clauses.push("timestamp <= :end");
            self.values.push((":end", format_timestamp(end)));
        }
        self
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn params(&self) -> Vec<(&str, &dyn ToSql)> {
        self.values
            .iter()
            .map(|(name, value)| (*name, value as &dyn ToSql))
            .collect()
    }

    /// Matching row count plus one page of rows mapped by `map`
    fn page<T>(
        &self,
        conn: &Connection,
        columns: &str,
        limit: i64,
        offset: i64,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<(Vec<T>, usize)> {
        let filter = self.sql();
        let mut params = self.params();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM requests{filter}"),
            params.as_slice(),
            |row| row.get(0),
        )?;

        params.push((":limit", &limit as &dyn ToSql));
        params.push((":offset", &offset as &dyn ToSql));
        let sql = format!("{columns}{filter} ORDER BY timestamp DESC LIMIT :limit OFFSET :offset");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params.as_slice(), map)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((rows, total as usize))
    }
}

/// Columns of one row, before JSON decoding
struct StoredRow {
    id: String,
    timestamp: String,
    method: String,
    endpoint: String,
    headers: String,
    body: String,
    model: Option<String>,
    user_agent: Option<String>,
    content_type: Option<String>,
    response: Option<String>,
    original_model: Option<String>,
    routed_model: Option<String>,
    provider: Option<String>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            method: row.get(2)?,
            endpoint: row.get(3)?,
            headers: row.get(4)?,
            body: row.get(5)?,
            model: row.get(6)?,
            user_agent: row.get(7)?,
            content_type: row.get(8)?,
            response: row.get(9)?,
            original_model: row.get(10)?,
            routed_model: row.get(11)?,
            provider: row.get(12)?,
        })
    }

    fn into_record(self) -> Result<RequestRecord> {
        let timestamp = parse_timestamp(&self.id, &self.timestamp)?;

        let response = match self.response.as_deref() {
            Some(json) => serde_json::from_str(json).ok(),
            None => None,
        };

        Ok(RequestRecord {
            request_id: self.id,
            timestamp,
            method: self.method,
            endpoint: self.endpoint,
            headers: serde_json::from_str(&self.headers)?,
            body: serde_json::from_str(&self.body)?,
            model: self.model.unwrap_or_default(),
            original_model: self.original_model,
            routed_model: self.routed_model,
            provider: self.provider,
            user_agent: self.user_agent,
            content_type: self.content_type,
            response,
        })
    }
}

/// Decode rows, skipping any that no longer parse
fn decode_rows(rows: Vec<StoredRow>) -> Vec<RequestRecord> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            row.into_record()
                .map_err(|e| tracing::warn!(request_id = %id, "Skipping unreadable record: {e}"))
                .ok()
        })
        .collect()
}

const SUMMARY_COLUMNS: &str = "SELECT id, timestamp, method, endpoint, model, original_model, \
     routed_model, provider, response FROM requests";

/// Summary columns of one row; headers and request bodies stay on disk
struct SummaryRow {
    id: String,
    timestamp: String,
    method: String,
    endpoint: String,
    model: Option<String>,
    original_model: Option<String>,
    routed_model: Option<String>,
    provider: Option<String>,
    response: Option<String>,
}

impl SummaryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            method: row.get(2)?,
            endpoint: row.get(3)?,
            model: row.get(4)?,
            original_model: row.get(5)?,
            routed_model: row.get(6)?,
            provider: row.get(7)?,
            response: row.get(8)?,
        })
    }

    fn into_summary(self) -> Result<RequestSummary> {
        let timestamp = parse_timestamp(&self.id, &self.timestamp)?;
        let response: Option<ResponseRecord> = self
            .response
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok());

        Ok(RequestSummary {
            request_id: self.id,
            timestamp,
            method: self.method,
            endpoint: self.endpoint,
            model: self.model.unwrap_or_default(),
            original_model: self.original_model,
            routed_model: self.routed_model,
            provider: self.provider,
            status_code: None,
            response_time_ms: None,
            usage: None,
        }
        .with_response(response.as_ref()))
    }
}

#[async_trait]
impl RequestStore for SqliteStore {
    async fn save(&self, record: &RequestRecord) -> Result<String> {
        let id = record.request_id.clone();
        let timestamp = format_timestamp(&record.timestamp);
        let headers = serde_json::to_string(&record.headers)?;
        let body = serde_json::to_string(&record.body)?;
        let response = record.response.as_ref().map(serde_json::to_string).transpose()?;
        let record = record.clone();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO requests (id, timestamp, method, endpoint, headers, body, user_agent, \
                 content_type, response, model, original_model, routed_model, provider) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.request_id,
                    timestamp,
                    record.method,
                    record.endpoint,
                    headers,
                    body,
                    record.user_agent,
                    record.content_type,
                    response,
                    record.model,
                    record.original_model,
                    record.routed_model,
                    record.provider,
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(id)
    }

    async fn update_with_response(&self, record: &RequestRecord) -> Result<()> {
        let id = record.request_id.clone();
        let response = record.response.as_ref().map(serde_json::to_string).transpose()?;
        let original_model = record.original_model.clone();
        let routed_model = record.routed_model.clone();
        let provider = record.provider.clone();

        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE requests SET response = ?1, original_model = ?2, routed_model = ?3, \
                 provider = ?4 WHERE id = ?5",
                params![response, original_model, routed_model, provider, id],
            )?;
            if changed == 0 {
                return Err(TollgateError::Storage(format!("request {id} not found")));
            }
            Ok(())
        })
        .await
    }

    async fn list(&self, query: &RequestQuery) -> Result<RequestPage> {
        let limit = query.clamped_limit();
        let offset = i64::try_from(query.offset()).unwrap_or(i64::MAX);
        let page = query.page.max(1);
        let filter = RowFilter::default().model(query.model_filter());

        let (rows, total) = self
            .run(move |conn| {
                filter.page(conn, SELECT_COLUMNS, limit as i64, offset, StoredRow::from_row)
            })
            .await?;

        Ok(RequestPage {
            requests: decode_rows(rows),
            total,
            page,
            limit,
        })
    }

    async fn summaries(&self, query: &SummaryQuery) -> Result<SummaryPage> {
        let paging = query.paging();
        let limit = paging.clamped_limit();
        let offset = i64::try_from(paging.offset()).unwrap_or(i64::MAX);
        let page = paging.page.max(1);
        let filter = RowFilter::default()
            .model(paging.model_filter())
            .between(query.start.as_ref(), query.end.as_ref());

        let (rows, total) = self
            .run(move |conn| {
                filter.page(conn, SUMMARY_COLUMNS, limit as i64, offset, SummaryRow::from_row)
            })
            .await?;

        let requests = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                row.into_summary()
                    .map_err(|e| tracing::warn!(request_id = %id, "Skipping unreadable record: {e}"))
                    .ok()
            })
            .collect();

        Ok(SummaryPage {
            requests,
            total,
            page,
            limit,
        })
    }

    async fn stats(&self, query: &StatsQuery) -> Result<DashboardStats> {
        let now = Utc::now();
        let (start, end) = query.window(now);
        let start = format_timestamp(&start);
        let end = format_timestamp(&end);

        let rows = self
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, timestamp, model, response FROM requests \
                     WHERE timestamp >= ?1 AND timestamp < ?2 AND response IS NOT NULL \
                     ORDER BY timestamp",
                )?;
                let rows = stmt
                    .query_map(params![start, end], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut builder = StatsBuilder::new(query.selected_day(now));
        for (id, timestamp, model, response) in rows {
            let decoded = parse_timestamp(&id, &timestamp).and_then(|timestamp| {
                let response: ResponseRecord = serde_json::from_str(&response)?;
                Ok((timestamp, response))
            });
            match decoded {
                Ok((timestamp, response)) => {
                    builder.add(&timestamp, model.as_deref().unwrap_or_default(), &response)
                }
                Err(e) => tracing::debug!(request_id = %id, "Leaving record out of stats: {e}"),
            }
        }
        Ok(builder.finish())
    }

    async fn get(&self, id: &str) -> Result<Option<RequestRecord>> {
        if !is_id_fragment(id) {
            return Ok(None);
        }
        let exact = id.to_string();
        let suffix = format!("%{id}");

        let row = self
            .run(move |conn| {
                let row = conn
                    .query_row(
                        &format!(
                            "{SELECT_COLUMNS} WHERE id = ?1 OR id LIKE ?2 \
                             ORDER BY (id = ?1) DESC, timestamp DESC LIMIT 1"
                        ),
                        params![exact, suffix],
                        StoredRow::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(StoredRow::into_record).transpose()
    }

    async fn clear(&self) -> Result<usize> {
        self.run(|conn| Ok(conn.execute("DELETE FROM requests", [])?))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ResponseRecord;
    use axum::http::{HeaderMap, StatusCode};

    fn record(model: &str) -> RequestRecord {
        let body = serde_json::from_value(serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        RequestRecord::new("POST", "/v1/messages", &HeaderMap::new(), body)
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        let saved = record("claude-3-opus-20240229");
        let id = store.save(&saved).await.unwrap();

        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.request_id, saved.request_id);
        assert_eq!(loaded.body, saved.body);
        assert!(loaded.response.is_none());

        let by_suffix = store.get(&id[8..]).await.unwrap().unwrap();
        assert_eq!(by_suffix.request_id, id);
        assert!(store.get("zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_with_response() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut saved = record("claude-3-opus-20240229");
        store.save(&saved).await.unwrap();

        saved.original_model = Some("claude-3-opus-20240229".to_string());
        saved.routed_model = Some("gpt-4o".to_string());
        saved.provider = Some("openai".to_string());
        saved
            .attach_response(ResponseRecord::buffered(
                StatusCode::OK,
                &HeaderMap::new(),
                br#"{"id":"msg_1"}"#,
                Duration::from_millis(5),
            ))
            .unwrap();
        store.update_with_response(&saved).await.unwrap();

        let loaded = store.get(&saved.request_id).await.unwrap().unwrap();
        assert_eq!(loaded.routed_model.as_deref(), Some("gpt-4o"));
        assert_eq!(loaded.provider.as_deref(), Some("openai"));
        assert_eq!(loaded.response.unwrap().status_code, 200);
    }

    #[tokio::test]
    async fn test_update_unknown_request_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.update_with_response(&record("m")).await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = SqliteStore::open_in_memory().unwrap();
        for model in ["claude-3-opus-20240229", "gpt-4o", "claude-3-5-haiku-20241022"] {
            store.save(&record(model)).await.unwrap();
        }

        let page = store.list(&RequestQuery::default()).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.requests.len(), 3);

        let filtered = store
            .list(&RequestQuery {
                model: Some("CLAUDE".to_string()),
                ..RequestQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(filtered.total, 2);
        assert!(filtered.requests.iter().all(|r| r.model.starts_with("claude")));

        let second = store
            .list(&RequestQuery {
                page: 2,
                limit: 2,
                model: None,
            })
            .await
            .unwrap();
        assert_eq!(second.requests.len(), 1);
    }

    #[tokio::test]
    async fn test_huge_page_is_empty_not_a_panic() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(&record("claude-3-opus-20240229")).await.unwrap();

        let page = store
            .list(&RequestQuery {
                page: usize::MAX,
                limit: 2,
                model: None,
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(page.requests.is_empty());
    }

    fn completed(model: &str, timestamp: &str, usage: &str) -> RequestRecord {
        let mut record = record(model);
        record.timestamp = DateTime::parse_from_rfc3339(timestamp).unwrap().with_timezone(&Utc);
        let body = format!(r#"{{"id":"msg_1","usage":{usage}}}"#);
        record
            .attach_response(ResponseRecord::buffered(
                StatusCode::OK,
                &HeaderMap::new(),
                body.as_bytes(),
                Duration::from_millis(40),
            ))
            .unwrap();
        record
    }

    #[tokio::test]
    async fn test_summaries_window_and_usage() {
        let store = SqliteStore::open_in_memory().unwrap();
        let early = completed(
            "claude-3-opus-20240229",
            "2025-03-09T10:00:00Z",
            r#"{"input_tokens":1,"output_tokens":2}"#,
        );
        let late = completed(
            "claude-3-opus-20240229",
            "2025-03-10T10:00:00Z",
            r#"{"input_tokens":5,"output_tokens":6}"#,
        );
        let mut pending = record("gpt-4o");
        pending.timestamp = late.timestamp;
        for record in [&early, &late, &pending] {
            store.save(record).await.unwrap();
        }

        let page = store
            .summaries(&SummaryQuery {
                start: Some(late.timestamp),
                ..SummaryQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let page = store
            .summaries(&SummaryQuery {
                model: Some("opus".to_string()),
                ..SummaryQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.requests[0].request_id, late.request_id);
        assert_eq!(page.requests[0].status_code, Some(200));
        assert_eq!(page.requests[0].response_time_ms, Some(40));
        assert_eq!(page.requests[0].usage.as_ref().unwrap()["output_tokens"], 6);

        let page = store
            .summaries(&SummaryQuery {
                end: Some(early.timestamp),
                ..SummaryQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.requests[0].request_id, early.request_id);
    }

    #[tokio::test]
    async fn test_stats_counts_completed_requests() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save(&completed(
                "claude-3-opus-20240229",
                "2025-03-09T10:00:00Z",
                r#"{"input_tokens":1,"output_tokens":2}"#,
            ))
            .await
            .unwrap();
        store
            .save(&completed(
                "gpt-4o",
                "2025-03-10T23:30:00Z",
                r#"{"input_tokens":5,"output_tokens":6,"cache_read_input_tokens":10}"#,
            ))
            .await
            .unwrap();
        store
            .save(&completed("gpt-4o", "2025-03-11T00:00:00Z", r#"{"input_tokens":99}"#))
            .await
            .unwrap();
        let mut pending = record("gpt-4o");
        pending.timestamp = DateTime::parse_from_rfc3339("2025-03-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        store.save(&pending).await.unwrap();

        let stats = store
            .stats(&StatsQuery {
                start: Some("2025-03-04T00:00:00Z".parse().unwrap()),
                end: Some("2025-03-11T00:00:00Z".parse().unwrap()),
            })
            .await
            .unwrap();

        assert_eq!(stats.daily_stats.len(), 2);
        assert_eq!(stats.today_requests, 1);
        assert_eq!(stats.today_tokens, 21);
        assert_eq!(stats.hourly_stats.len(), 1);
        assert_eq!(stats.hourly_stats[0].hour, 23);
        assert_eq!(stats.avg_response_time, 40);
        assert_eq!(stats.model_stats.len(), 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(&record("a")).await.unwrap();
        store.save(&record("b")).await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.list(&RequestQuery::default()).await.unwrap().total, 0);
    }
}
