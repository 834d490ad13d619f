//! Harvest orchestrator.
//!
//! This module provides the [`HarvestPipeline`] coordinator that walks every
//! discovered source sequentially (Directory → Fetch → Normalize → Store) with:
//! - Randomized pacing between sources
//! - One store transaction per source
//! - Structured logging via `tracing`
//!
//! A run never fails. Every per-source or per-record problem is logged and
//! shrinks the result instead of aborting the remaining sources.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::config::HarvesterConfig;
use crate::harvest::directory::EndpointDirectory;
use crate::harvest::fetch::{FetchClient, FetchOutcome, HarvestWindow, PacingPolicy, QueryStrategy};
use crate::harvest::normalize::Normalizer;
use crate::harvest::store::NoveltyStore;
use crate::harvest::traits::{HarvestStage, StoreError};
use crate::model::{NewInspection, RawRecord, SourceId};
use crate::traits::Transport;

// ============================================================================
// Pipeline Types
// ============================================================================

/// Complete run result with the new inspections and statistics.
#[derive(Debug, Default)]
pub struct HarvestResult {
    /// Inspections stored for the first time, in processing order
    pub new_inspections: Vec<NewInspection>,

    /// Counters describing the run
    pub stats: HarvestStats,
}

/// Statistics about one harvest run.
#[derive(Debug, Default, Clone)]
pub struct HarvestStats {
    /// Sources returned by discovery
    pub sources_discovered: usize,

    /// Sources whose fetch hit a transport failure
    pub sources_failed: usize,

    /// Sources that returned no data or an unexpected payload
    pub sources_empty: usize,

    /// Sources whose batch failed to store and was rolled back
    pub sources_store_failed: usize,

    /// Raw records received across all sources
    pub records_fetched: usize,

    /// Records dropped by the normalizer
    pub records_rejected: usize,

    /// Establishment upserts committed
    pub establishments_upserted: usize,

    /// Inspections committed for the first time
    pub inspections_new: usize,

    /// Wall time of the whole run (milliseconds)
    pub total_duration_ms: u64,
}

struct SourceBatch {
    new_inspections: Vec<NewInspection>,
    upserted: usize,
    rejected: usize,
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Incremental harvest over every discovered source.
///
/// # Example
///
/// ```ignore
/// use inspection_harvester::harvest::HarvestPipeline;
/// use std::sync::Arc;
///
/// let transport = Arc::new(HttpTransport::new(&config.provider));
/// let store = NoveltyStore::open(&config.database).await?;
/// let pipeline = HarvestPipeline::from_config(transport, store, &config);
///
/// for inspection in pipeline.run().await {
///     println!("{} scored {} on {}", inspection.name, inspection.score, inspection.date);
/// }
/// ```
pub struct HarvestPipeline<T: Transport> {
    directory: EndpointDirectory<T>,
    fetcher: FetchClient<T>,
    store: NoveltyStore,

    /// Days covered by each source's query (default: 30)
    window_days: u32,

    /// Delay after each source's fetch (default: 2-4s)
    pacing: PacingPolicy,
}

impl<T: Transport> HarvestPipeline<T> {
    /// Creates a pipeline with a 30 day window and 2-4s pacing.
    pub fn new(directory: EndpointDirectory<T>, fetcher: FetchClient<T>, store: NoveltyStore) -> Self {
        Self {
            directory,
            fetcher,
            store,
            window_days: 30,
            pacing: PacingPolicy::default(),
        }
    }

    /// Wires the directory, fetch client and pacing from configuration.
    pub fn from_config(transport: Arc<T>, store: NoveltyStore, config: &HarvesterConfig) -> Self {
        let provider = &config.provider;
        let directory = EndpointDirectory::new(
            Arc::clone(&transport),
            provider.base_url.clone(),
            &provider.fallback_sources,
        );
        let fetcher = FetchClient::new(transport, provider.base_url.clone())
            .with_page_size(provider.page_size)
            .with_strategies(
                provider
                    .program_variants
                    .iter()
                    .map(QueryStrategy::program)
                    .collect(),
            );

        Self::new(directory, fetcher, store)
            .with_window_days(config.window.days)
            .with_pacing(PacingPolicy::new(
                Duration::from_millis(config.pacing.min_ms),
                Duration::from_millis(config.pacing.max_ms),
            ))
    }

    pub fn with_window_days(mut self, days: u32) -> Self {
        self.window_days = days.max(1);
        self
    }

    pub fn with_pacing(mut self, pacing: PacingPolicy) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn store(&self) -> &NoveltyStore {
        &self.store
    }

    /// Runs one harvest pass and returns the newly stored inspections.
    pub async fn run(&self) -> Vec<NewInspection> {
        self.run_with_stats().await.new_inspections
    }

    /// Runs one harvest pass over a window ending today.
    pub async fn run_with_stats(&self) -> HarvestResult {
        self.run_window(HarvestWindow::trailing_days(self.window_days))
            .await
    }

    /// Runs one harvest pass over an explicit window.
    pub async fn run_window(&self, window: HarvestWindow) -> HarvestResult {
        let span = info_span!("harvest_run", window = %window.filter_string());
        self.run_inner(window).instrument(span).await
    }

    async fn run_inner(&self, window: HarvestWindow) -> HarvestResult {
        let start = Instant::now();
        let mut result = HarvestResult::default();

        let sources = self.directory.discover().await;
        result.stats.sources_discovered = sources.len();

        for source in &sources {
            info!(source = %source, "Fetching recent inspections");

            let outcome = self.fetcher.fetch_window(source, &window).await;
            self.pacing.pause().await;

            let records = match outcome {
                FetchOutcome::Records(records) => records,
                FetchOutcome::Failed(_) => {
                    // Already logged by the fetch client.
                    result.stats.sources_failed += 1;
                    continue;
                }
                FetchOutcome::Empty => {
                    warn!(source = %source, "No data returned from provider");
                    result.stats.sources_empty += 1;
                    continue;
                }
                FetchOutcome::Malformed(reason) => {
                    warn!(source = %source, reason = %reason, "Provider response format has changed");
                    result.stats.sources_empty += 1;
                    continue;
                }
            };
            result.stats.records_fetched += records.len();

            match self.store_source(source, records).await {
                Ok(batch) => {
                    result.stats.records_rejected += batch.rejected;
                    result.stats.establishments_upserted += batch.upserted;
                    result.stats.inspections_new += batch.new_inspections.len();
                    result.new_inspections.extend(batch.new_inspections);
                }
                Err(e) => {
                    error!(source = %source, error = %e, "Failed to store inspections, batch rolled back");
                    result.stats.sources_store_failed += 1;
                }
            }
        }

        result.stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            new = result.stats.inspections_new,
            sources = result.stats.sources_discovered,
            failed = result.stats.sources_failed,
            empty = result.stats.sources_empty,
            duration_ms = result.stats.total_duration_ms,
            "Harvest complete"
        );

        result
    }

    /// Normalizes and stores one source's records inside a single transaction.
    #[instrument(skip(self, records), fields(records = records.len()))]
    async fn store_source(
        &self,
        source: &SourceId,
        records: Vec<RawRecord>,
    ) -> Result<SourceBatch, StoreError> {
        let normalizer = Normalizer::for_source(source.clone());
        let mut batch = self.store.begin_batch(source).await?;
        let mut outcome = SourceBatch {
            new_inspections: Vec::new(),
            upserted: 0,
            rejected: 0,
        };

        for raw in records {
            let record = match normalizer.execute(raw) {
                Ok(record) => record,
                Err(reason) => {
                    debug!(stage = normalizer.stage_name(), reason = %reason, "Dropping record");
                    outcome.rejected += 1;
                    continue;
                }
            };

            let (establishment, inspection) = record.into_parts();
            batch.upsert_establishment(&establishment).await?;
            outcome.upserted += 1;

            if batch.insert_inspection_if_new(&inspection).await? {
                info!(
                    name = %establishment.name,
                    date = %inspection.date,
                    score = inspection.score,
                    "New inspection found"
                );
                outcome.new_inspections.push(NewInspection {
                    name: establishment.name,
                    score: inspection.score,
                    date: inspection.date,
                });
            }
        }

        batch.commit().await?;
        Ok(outcome)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::testing::{payload_path, CapturedLogs, ScriptedTransport};
    use crate::traits::TransportError;
    use chrono::NaiveDate;
    use serde_json::{json, Value};

    const DIRECTORY_PAGE: &str = r#"
        <div class="jurisdiction-section">
          <a class="search-button" href="/alabama">View</a>
          <a class="search-button" href="/tennessee">View</a>
        </div>
    "#;

    fn window() -> HarvestWindow {
        HarvestWindow::ending_on(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(), 30)
    }

    fn tennessee_records() -> Value {
        json!([
            {"permitID": "1", "establishmentName": "Cafe One", "inspectionDate": "2024-03-01T00:00:00", "score": 95, "permitType": ["Food", "Retail"]},
            {"permitID": "2", "establishmentName": "Diner Two", "inspectionDate": "2024-03-02T00:00:00", "score": 88},
            {"permitID": "3", "establishmentName": "Grill Three", "inspectionDate": "2024-03-03T00:00:00", "score": 72},
            {"permitID": "4", "establishmentName": "Unscored", "inspectionDate": "2024-03-04T00:00:00", "score": 0},
            {"establishmentName": "No Permit", "inspectionDate": "2024-03-04T00:00:00", "score": 90}
        ])
    }

    async fn pipeline(transport: ScriptedTransport) -> HarvestPipeline<ScriptedTransport> {
        let transport = Arc::new(transport.with_directory(DIRECTORY_PAGE));
        let store = NoveltyStore::in_memory().await.unwrap();
        let directory = EndpointDirectory::new(
            Arc::clone(&transport),
            "https://portal.example/",
            &["tennessee".to_string()],
        );
        let fetcher = FetchClient::new(transport, "https://portal.example/");

        HarvestPipeline::new(directory, fetcher, store).with_pacing(PacingPolicy::none())
    }

    fn alabama_down_tennessee_up() -> ScriptedTransport {
        ScriptedTransport::new(|body| match payload_path(body) {
            "alabama" => Err(TransportError::Status(502)),
            "tennessee" => Ok(tennessee_records()),
            _ => Ok(json!([])),
        })
    }

    #[tokio::test]
    async fn failing_source_does_not_abort_others() {
        let pipeline = pipeline(alabama_down_tennessee_up()).await;

        let result = pipeline.run_window(window()).await;

        let names: Vec<&str> = result.new_inspections.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Cafe One", "Diner Two", "Grill Three"]);
        assert_eq!(result.stats.sources_discovered, 2);
        assert_eq!(result.stats.sources_failed, 1);
        assert_eq!(result.stats.records_fetched, 5);
        assert_eq!(result.stats.records_rejected, 2);
        assert_eq!(result.stats.inspections_new, 3);
    }

    #[tokio::test]
    async fn failing_source_is_logged_and_counted() {
        let logs = CapturedLogs::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        let pipeline = pipeline(alabama_down_tennessee_up()).await;

        let result = pipeline.run_window(window()).await;

        assert_eq!(result.stats.sources_failed, 1);
        assert_eq!(result.new_inspections.len(), 3);
        let output = logs.contents();
        let line = output
            .lines()
            .find(|line| line.contains("Failed to retrieve inspections from provider"))
            .expect("transport failure logged");
        assert!(line.contains("ERROR"));
        assert!(line.contains("source=alabama"));
    }

    #[tokio::test]
    async fn second_run_finds_nothing_new() {
        let pipeline = pipeline(alabama_down_tennessee_up()).await;

        let first = pipeline.run_window(window()).await;
        assert_eq!(first.new_inspections.len(), 3);
        let establishments = pipeline.store().count_establishments().await.unwrap();
        let inspections = pipeline.store().count_inspections().await.unwrap();

        let second = pipeline.run_window(window()).await;
        assert!(second.new_inspections.is_empty());
        assert_eq!(second.stats.establishments_upserted, 3);
        assert_eq!(pipeline.store().count_establishments().await.unwrap(), establishments);
        assert_eq!(pipeline.store().count_inspections().await.unwrap(), inspections);
    }

    #[tokio::test]
    async fn rejected_records_never_reach_store() {
        let pipeline = pipeline(alabama_down_tennessee_up()).await;
        pipeline.run_window(window()).await;

        let unscored = pipeline
            .store()
            .find_establishment("4", &SourceId::from("tennessee"))
            .await
            .unwrap();
        assert!(unscored.is_none());

        let cafe = pipeline
            .store()
            .find_establishment("1", &SourceId::from("tennessee"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cafe.category, "Food, Retail");
    }

    #[tokio::test]
    async fn new_projection_carries_name_score_date() {
        let transport = ScriptedTransport::new(|body| match payload_path(body) {
            "tennessee" => Ok(json!([{
                "permitID": "42",
                "establishmentName": " Joe's Deli ",
                "addressLine1": "1 Main St",
                "permitType": ["Food"],
                "inspectionDate": "2024-03-01T00:00:00",
                "score": 91,
                "purpose": "Routine"
            }])),
            _ => Ok(Value::Null),
        });
        let pipeline = pipeline(transport).await;

        let first = pipeline.run_window(window()).await;
        assert_eq!(
            first.new_inspections,
            vec![NewInspection {
                name: "Joe's Deli".to_string(),
                score: 91,
                date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            }]
        );
        assert_eq!(first.stats.sources_empty, 1);

        assert!(pipeline.run_window(window()).await.new_inspections.is_empty());
    }

    #[tokio::test]
    async fn empty_and_malformed_sources_are_skipped() {
        let transport = ScriptedTransport::new(|body| match payload_path(body) {
            "alabama" => Ok(json!({"message": "maintenance"})),
            _ => Ok(json!([])),
        });
        let pipeline = pipeline(transport).await;

        let result = pipeline.run_window(window()).await;

        assert!(result.new_inspections.is_empty());
        assert_eq!(result.stats.sources_empty, 2);
        assert_eq!(pipeline.store().count_establishments().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_failure_rolls_back_only_that_source() {
        let transport = ScriptedTransport::new(|body| match payload_path(body) {
            "alabama" => Ok(json!([
                {"permitID": "A1", "establishmentName": "Good Eats", "inspectionDate": "2024-03-05", "score": 90},
                {"permitID": "A2", "establishmentName": "Bad Row", "inspectionDate": "2024-03-06", "score": 66}
            ])),
            "tennessee" => Ok(json!([
                {"permitID": "T1", "establishmentName": "Smoky Pit", "inspectionDate": "2024-03-07", "score": 88}
            ])),
            _ => Ok(json!([])),
        });
        let pipeline = pipeline(transport).await;
        sqlx::query(
            "CREATE TRIGGER reject_score_66 BEFORE INSERT ON inspections
             WHEN NEW.score = 66
             BEGIN SELECT RAISE(ABORT, 'rejected by trigger'); END",
        )
        .execute(pipeline.store().pool())
        .await
        .unwrap();

        let result = pipeline.run_window(window()).await;

        let names: Vec<&str> = result.new_inspections.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Smoky Pit"]);
        assert_eq!(result.stats.sources_store_failed, 1);

        let alabama = SourceId::from("alabama");
        assert!(pipeline.store().find_establishment("A1", &alabama).await.unwrap().is_none());
        assert!(pipeline.store().inspections_for("A1", &alabama).await.unwrap().is_empty());
        assert_eq!(pipeline.store().count_establishments().await.unwrap(), 1);
        assert_eq!(pipeline.store().count_inspections().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_contained() {
        let pipeline = pipeline(alabama_down_tennessee_up()).await;
        pipeline.store().close().await;

        let result = pipeline.run_window(window()).await;

        assert!(result.new_inspections.is_empty());
        assert_eq!(result.stats.sources_store_failed, 1);
        assert_eq!(result.stats.sources_failed, 1);
    }

    #[tokio::test]
    async fn discovery_fallback_drives_run() {
        let transport = Arc::new(ScriptedTransport::new(|body| match payload_path(body) {
            "tennessee" => Ok(tennessee_records()),
            _ => Ok(json!([])),
        }));
        let store = NoveltyStore::in_memory().await.unwrap();
        let directory = EndpointDirectory::new(
            Arc::clone(&transport),
            "https://portal.example/",
            &["tennessee".to_string()],
        );
        let fetcher = FetchClient::new(Arc::clone(&transport), "https://portal.example/");
        let pipeline = HarvestPipeline::new(directory, fetcher, store).with_pacing(PacingPolicy::none());

        let result = pipeline.run_window(window()).await;

        assert_eq!(result.stats.sources_discovered, 1);
        assert_eq!(result.new_inspections.len(), 3);
        assert_eq!(transport.referers(), vec!["https://portal.example/tennessee".to_string()]);
    }

    #[tokio::test]
    async fn from_config_uses_configured_strategies() {
        let transport = Arc::new(
            ScriptedTransport::new(|_| Ok(json!([]))).with_directory(DIRECTORY_PAGE),
        );
        let store = NoveltyStore::in_memory().await.unwrap();
        let mut config = HarvesterConfig::default();
        config.provider.program_variants = vec!["".into(), "Food".into(), "Pool".into()];
        config.pacing.min_ms = 0;
        config.pacing.max_ms = 0;

        let pipeline = HarvestPipeline::from_config(Arc::clone(&transport), store, &config);
        pipeline.run_window(window()).await;

        // Two sources, three strategies each.
        assert_eq!(transport.posts().len(), 6);
        assert_eq!(transport.posts()[0]["data"]["count"], json!(500));
    }
}
