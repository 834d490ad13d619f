//! Windowed fetch of recent inspections for one source.
//!
//! The provider has no usable cursor, so each source is queried once with a
//! date window and a page size large enough to hold everything in it.

use chrono::{Duration as DateSpan, NaiveDate};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::model::{RawRecord, SourceId};
use crate::traits::{ProviderSession, Transport, TransportError};

const SEARCH_TASK: &str = "searchInspections";

// ============================================================================
// Query Types
// ============================================================================

/// Inclusive date range used as the query filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl HarvestWindow {
    /// Window of `days` days ending on `end`.
    pub fn ending_on(end: NaiveDate, days: u32) -> Self {
        Self {
            start: end - DateSpan::days(i64::from(days)),
            end,
        }
    }

    /// Window of `days` days ending today (local time).
    pub fn trailing_days(days: u32) -> Self {
        Self::ending_on(chrono::Local::now().date_naive(), days)
    }

    /// Provider encoding: `"YYYY-MM-DD to YYYY-MM-DD"`.
    pub fn filter_string(&self) -> String {
        format!(
            "{} to {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// One way of asking the provider for a source's inspections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStrategy {
    /// Value sent as `programName`; empty means "no program specified".
    pub program_name: String,
}

impl QueryStrategy {
    pub fn program(name: impl Into<String>) -> Self {
        Self {
            program_name: name.into(),
        }
    }

    /// The default query followed by the `Food` program variant.
    pub fn default_chain() -> Vec<Self> {
        vec![Self::program(""), Self::program("Food")]
    }
}

/// Builds the search payload for `source` under `strategy`.
pub fn build_payload(
    source: &SourceId,
    strategy: &QueryStrategy,
    window: &HarvestWindow,
    page_size: u32,
) -> Value {
    json!({
        "data": {
            "path": source.as_str(),
            "programName": strategy.program_name,
            "filters": {
                "date": window.filter_string(),
                "purpose": "",
                "county": ""
            },
            "start": 0,
            "count": page_size,
            "searchStr": "",
            "lat": 0,
            "lng": 0,
            "sort": {}
        },
        "task": SEARCH_TASK
    })
}

// ============================================================================
// Fetch Outcome
// ============================================================================

/// Result of one source's fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Provider returned a non-empty list
    Records(Vec<RawRecord>),
    /// Every strategy came back empty
    Empty,
    /// Provider returned something other than a list of records
    Malformed(String),
    /// Network, status or decode failure
    Failed(TransportError),
}

impl FetchOutcome {
    /// Records for this pass; every non-`Records` outcome counts as zero.
    pub fn into_records(self) -> Vec<RawRecord> {
        match self {
            FetchOutcome::Records(records) => records,
            _ => Vec::new(),
        }
    }

    fn from_body(body: Value) -> Self {
        match body {
            Value::Array(items) if items.is_empty() => FetchOutcome::Empty,
            Value::Array(items) => {
                let total = items.len();
                let records: Vec<RawRecord> = items
                    .into_iter()
                    .filter_map(|item| serde_json::from_value(item).ok())
                    .collect();
                if records.len() < total {
                    warn!(
                        dropped = total - records.len(),
                        "Skipping list entries that are not inspection records"
                    );
                }
                if records.is_empty() {
                    FetchOutcome::Malformed(format!("none of {} entries were records", total))
                } else {
                    FetchOutcome::Records(records)
                }
            }
            other if is_falsy(&other) => FetchOutcome::Empty,
            other => FetchOutcome::Malformed(format!("expected a list, got {}", kind_of(&other))),
        }
    }
}

/// Provider "nothing here" values: null, false, zero, "", [] and {}.
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Pacing
// ============================================================================

/// Randomized delay applied after each source's fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    min: Duration,
    max: Duration,
}

impl PacingPolicy {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let millis = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    pub async fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(4))
    }
}

// ============================================================================
// Fetch Client
// ============================================================================

pub struct FetchClient<T: Transport> {
    transport: Arc<T>,
    base_url: String,
    page_size: u32,
    strategies: Vec<QueryStrategy>,
}

impl<T: Transport> FetchClient<T> {
    pub fn new(transport: Arc<T>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            page_size: 500,
            strategies: QueryStrategy::default_chain(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the strategies tried in order until one returns data.
    pub fn with_strategies(mut self, strategies: Vec<QueryStrategy>) -> Self {
        if !strategies.is_empty() {
            self.strategies = strategies;
        }
        self
    }

    /// Referer presented for `source`: the source's page on the portal.
    pub fn referer_for(&self, source: &SourceId) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), source)
    }

    /// Queries `source` for inspections within `window`.
    ///
    /// Opens a fresh session for the source, then walks the strategy list
    /// until a response is non-empty. Transport failures end the fetch for
    /// this source and are reported as [`FetchOutcome::Failed`]; they never
    /// propagate.
    pub async fn fetch_window(&self, source: &SourceId, window: &HarvestWindow) -> FetchOutcome {
        let outcome = match self.transport.open_session(&self.referer_for(source)) {
            Ok(session) => self.run_strategies(session.as_ref(), source, window).await,
            Err(e) => FetchOutcome::Failed(e),
        };

        if let FetchOutcome::Failed(e) = &outcome {
            error!(source = %source, error = %e, "Failed to retrieve inspections from provider");
        }
        outcome
    }

    async fn run_strategies(
        &self,
        session: &dyn ProviderSession,
        source: &SourceId,
        window: &HarvestWindow,
    ) -> FetchOutcome {
        let mut outcome = FetchOutcome::Empty;

        for (attempt, strategy) in self.strategies.iter().enumerate() {
            if attempt > 0 {
                info!(
                    source = %source,
                    program = %strategy.program_name,
                    "Previous query returned no data, retrying with program filter"
                );
            }

            let payload = build_payload(source, strategy, window, self.page_size);
            let body = match session.post_json(&payload).await {
                Ok(body) => body,
                Err(e) => return FetchOutcome::Failed(e),
            };

            if !is_falsy(&body) {
                return FetchOutcome::from_body(body);
            }
            outcome = FetchOutcome::from_body(body);
        }

        outcome
    }
}

// ============================================================================
// Tests
// ============================================================================
