//! Dashboard views over the request log: lightweight summaries and token
//! usage aggregates

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{RequestQuery, default_limit, default_page};
use crate::record::{RequestRecord, ResponseRecord};

/// Usage fields that count towards the token totals
const COUNTED_USAGE: &[&str] = &["input_tokens", "output_tokens", "cache_read_input_tokens"];

/// Model name reported for records without one
const UNKNOWN_MODEL: &str = "unknown";

/// Listing filter for summaries: page, limit and model as for
/// [`RequestQuery`], plus an optional inclusive time window
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SummaryQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl Default for SummaryQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            model: None,
            start: None,
            end: None,
        }
    }
}

impl SummaryQuery {
    /// The paging and model part of the filter
    pub fn paging(&self) -> RequestQuery {
        RequestQuery {
            page: self.page,
            limit: self.limit,
            model: self.model.clone(),
        }
    }

    pub fn in_window(&self, timestamp: &DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| *timestamp >= start)
            && self.end.is_none_or(|end| *timestamp <= end)
    }
}

/// A request without headers or bodies, for list views
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub endpoint: String,
    pub model: String,
    pub original_model: Option<String>,
    pub routed_model: Option<String>,
    pub provider: Option<String>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    /// `usage` object of the response body, when there is one
    pub usage: Option<Value>,
}

impl RequestSummary {
    pub fn from_record(record: &RequestRecord) -> Self {
        Self {
            request_id: record.request_id.clone(),
            timestamp: record.timestamp,
            method: record.method.clone(),
            endpoint: record.endpoint.clone(),
            model: record.model.clone(),
            original_model: record.original_model.clone(),
            routed_model: record.routed_model.clone(),
            provider: record.provider.clone(),
            status_code: None,
            response_time_ms: None,
            usage: None,
        }
        .with_response(record.response.as_ref())
    }

    pub(crate) fn with_response(mut self, response: Option<&ResponseRecord>) -> Self {
        if let Some(response) = response {
            self.status_code = Some(response.status_code);
            self.response_time_ms = Some(response.response_time_ms);
            self.usage = response_usage(response).cloned();
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryPage {
    pub requests: Vec<RequestSummary>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

fn response_usage(response: &ResponseRecord) -> Option<&Value> {
    response
        .body
        .as_ref()
        .and_then(|body| body.get("usage"))
        .filter(|usage| usage.is_object())
}

fn usage_tokens(usage: Option<&Value>) -> u64 {
    let Some(usage) = usage else {
        return 0;
    };
    COUNTED_USAGE
        .iter()
        .filter_map(|field| usage.get(field).and_then(Value::as_u64))
        .sum()
}

/// Time window for dashboard stats
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatsQuery {
    /// Inclusive; defaults to seven days before `end`
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Exclusive; defaults to the coming UTC midnight
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl StatsQuery {
    /// Resolved `[start, end)` window
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.end.unwrap_or_else(|| {
            now.date_naive().and_time(NaiveTime::MIN).and_utc() + Duration::days(1)
        });
        let start = self.start.unwrap_or(end - Duration::days(7));
        (start, end)
    }

    /// Day that gets the hourly breakdown: the last day of the window
    pub fn selected_day(&self, now: DateTime<Utc>) -> NaiveDate {
        let (_, end) = self.window(now);
        (end - Duration::days(1)).date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelStats {
    pub tokens: u64,
    pub requests: u64,
}

impl ModelStats {
    fn add(&mut self, tokens: u64) {
        self.tokens += tokens;
        self.requests += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyTokens {
    pub date: NaiveDate,
    pub tokens: u64,
    pub requests: u64,
    pub models: BTreeMap<String, ModelStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyTokens {
    pub hour: u32,
    pub tokens: u64,
    pub requests: u64,
    pub models: BTreeMap<String, ModelStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelTokens {
    pub model: String,
    pub tokens: u64,
    pub requests: u64,
}

/// Token usage aggregates over a window of completed requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    /// Ascending by date
    pub daily_stats: Vec<DailyTokens>,
    /// Hours of the selected day, ascending
    pub hourly_stats: Vec<HourlyTokens>,
    /// Ascending by model name
    pub model_stats: Vec<ModelTokens>,
    pub today_tokens: u64,
    pub today_requests: u64,
    /// Mean response time on the selected day, in milliseconds
    pub avg_response_time: u64,
}

/// Accumulates completed requests into [`DashboardStats`]
#[derive(Debug)]
pub struct StatsBuilder {
    selected: NaiveDate,
    daily: BTreeMap<NaiveDate, (ModelStats, BTreeMap<String, ModelStats>)>,
    hourly: BTreeMap<u32, (ModelStats, BTreeMap<String, ModelStats>)>,
    models: BTreeMap<String, ModelStats>,
    response_time_total: u64,
    response_count: u64,
}

impl StatsBuilder {
    pub fn new(selected: NaiveDate) -> Self {
        Self {
            selected,
            daily: BTreeMap::new(),
            hourly: BTreeMap::new(),
            models: BTreeMap::new(),
            response_time_total: 0,
            response_count: 0,
        }
    }

    pub fn add(&mut self, timestamp: &DateTime<Utc>, model: &str, response: &ResponseRecord) {
        let model = if model.is_empty() { UNKNOWN_MODEL } else { model };
        let tokens = usage_tokens(response_usage(response));
        let date = timestamp.date_naive();

        let (day, day_models) = self.daily.entry(date).or_default();
        day.add(tokens);
        day_models.entry(model.to_string()).or_default().add(tokens);

        if date == self.selected {
            let (hour, hour_models) = self.hourly.entry(timestamp.hour()).or_default();
            hour.add(tokens);
            hour_models.entry(model.to_string()).or_default().add(tokens);

            if response.response_time_ms > 0 {
                self.response_time_total += response.response_time_ms;
                self.response_count += 1;
            }
        }

        self.models.entry(model.to_string()).or_default().add(tokens);
    }

    pub fn finish(self) -> DashboardStats {
        let today = self
            .daily
            .get(&self.selected)
            .map(|(totals, _)| *totals)
            .unwrap_or_default();

        DashboardStats {
            daily_stats: self
                .daily
                .into_iter()
                .map(|(date, (totals, models))| DailyTokens {
                    date,
                    tokens: totals.tokens,
                    requests: totals.requests,
                    models,
                })
                .collect(),
            hourly_stats: self
                .hourly
                .into_iter()
                .map(|(hour, (totals, models))| HourlyTokens {
                    hour,
                    tokens: totals.tokens,
                    requests: totals.requests,
                    models,
                })
                .collect(),
            model_stats: self
                .models
                .into_iter()
                .map(|(model, totals)| ModelTokens {
                    model,
                    tokens: totals.tokens,
                    requests: totals.requests,
                })
                .collect(),
            today_tokens: today.tokens,
            today_requests: today.requests,
            avg_response_time: self
                .response_time_total
                .checked_div(self.response_count)
                .unwrap_or(0),
        }
    }
}
