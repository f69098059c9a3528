//! Per-Target discovery → acquisition → gated extraction loop, and batch runs.

use crate::acquisition::{AcquisitionCascade, AcquisitionMethod, Acquirer, HttpClient};
use crate::config::{RunSettings, ScoutConfig};
use crate::discovery::{CandidateUrl, DiscoveryEngine, RenderedSearch};
use crate::error::{ScoutError, ScoutResult};
use crate::extraction::{
    ExtractedProduct, ExtractionError, ExtractionRequest, ExtractionService, OpenAiExtractor,
};
use crate::quota::{DenialReason, JsonFileStore, QuotaGovernor, QuotaStats, SystemClock};
use crate::renderer::Renderer;
use crate::sink::{JsonlSink, ProductRecord, ResultSink};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Products pulled from one URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub source_url: String,
    pub method: AcquisitionMethod,
    pub content_length: usize,
    pub products: Vec<ExtractedProduct>,
}

/// Why a whole run stopped early.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RunAbort {
    /// The local governor denied a call.
    QuotaDenied { reason: DenialReason },
    /// The provider reported its own quota as exhausted.
    ProviderQuotaExhausted { message: String },
}

impl fmt::Display for RunAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunAbort::QuotaDenied { reason } => write!(f, "quota denied: {reason}"),
            RunAbort::ProviderQuotaExhausted { message } => {
                write!(f, "provider quota exhausted: {message}")
            }
        }
    }
}

/// Everything that happened for one Target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetRun {
    pub entity: String,
    pub candidates: Vec<CandidateUrl>,
    pub results: Vec<ExtractionResult>,
    pub attempted: usize,
    pub succeeded: usize,
    /// Provider error that ended this Target (authentication, rate limiting).
    pub stopped_by: Option<String>,
    /// Set when this Target's loop tripped a run-wide stop.
    pub abort: Option<RunAbort>,
}

impl TargetRun {
    pub fn status(&self) -> TargetStatus {
        if self.succeeded > 0 {
            return TargetStatus::Success;
        }
        if self.candidates.is_empty() {
            return TargetStatus::Error {
                reason: "no candidate URLs discovered".into(),
            };
        }
        if let Some(reason) = &self.stopped_by {
            return TargetStatus::Error {
                reason: reason.clone(),
            };
        }
        if let Some(abort) = &self.abort {
            return TargetStatus::Error {
                reason: format!("{abort} after {} attempts", self.attempted),
            };
        }
        TargetStatus::Error {
            reason: format!(
                "no products extracted from {} of {} candidates",
                self.attempted,
                self.candidates.len()
            ),
        }
    }
}

/// Outcome of one Target in a run report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TargetStatus {
    Success,
    Error { reason: String },
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub entity: String,
    #[serde(flatten)]
    pub status: TargetStatus,
    pub attempted: usize,
    pub succeeded: usize,
    pub results: Vec<ExtractionResult>,
}

impl TargetReport {
    fn skipped(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            status: TargetStatus::Skipped,
            attempted: 0,
            succeeded: 0,
            results: Vec::new(),
        }
    }
}

impl From<TargetRun> for TargetReport {
    fn from(run: TargetRun) -> Self {
        Self {
            status: run.status(),
            entity: run.entity,
            attempted: run.attempted,
            succeeded: run.succeeded,
            results: run.results,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: Vec<TargetReport>,
    /// Run-wide stop, reported once.
    pub aborted: Option<RunAbort>,
    pub quota: QuotaStats,
}

/// Composes discovery, acquisition, the governor and extraction.
pub struct Orchestrator {
    discovery: DiscoveryEngine,
    acquirer: Box<dyn Acquirer>,
    extractor: Box<dyn ExtractionService>,
    governor: QuotaGovernor,
    sink: Option<Box<dyn ResultSink>>,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        discovery: DiscoveryEngine,
        acquirer: Box<dyn Acquirer>,
        extractor: Box<dyn ExtractionService>,
        governor: QuotaGovernor,
        settings: RunSettings,
    ) -> Self {
        Self {
            discovery,
            acquirer,
            extractor,
            governor,
            sink: None,
            settings,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Wire up the production components from configuration.
    pub fn from_config(config: &ScoutConfig, renderer: Arc<dyn Renderer>) -> ScoutResult<Self> {
        let search = RenderedSearch::new(Arc::clone(&renderer), config.discovery.clone());
        let discovery = DiscoveryEngine::new(Box::new(search), config.discovery.clone());
        let cascade = AcquisitionCascade::new(
            HttpClient::new(&config.fetch)?,
            renderer,
            config.fetch.clone(),
        );
        let extractor = OpenAiExtractor::new(config.extraction.clone())?;
        let governor = QuotaGovernor::open(
            config.quota,
            config.pricing,
            Box::new(JsonFileStore::new(config.ledger_path.clone())),
            Arc::new(SystemClock),
        );
        let sink = JsonlSink::open(&config.sink_path)
            .map_err(|e| ScoutError::Sink(format!("{e:#}")))?;

        Ok(Self::new(
            discovery,
            Box::new(cascade),
            Box::new(extractor),
            governor,
            config.run.clone(),
        )
        .with_sink(Box::new(sink)))
    }

    pub fn governor(&self) -> &QuotaGovernor {
        &self.governor
    }

    pub fn governor_mut(&mut self) -> &mut QuotaGovernor {
        &mut self.governor
    }

    /// Process one Target, stopping after `max_successes` successful URLs.
    ///
    /// Only a ledger persistence failure is returned as an error.
    pub async fn run(&mut self, entity: &str, max_successes: usize) -> ScoutResult<TargetRun> {
        let candidates = self.discovery.discover(entity).await;
        let mut run = TargetRun {
            entity: entity.to_string(),
            candidates: candidates.clone(),
            results: Vec::new(),
            attempted: 0,
            succeeded: 0,
            stopped_by: None,
            abort: None,
        };

        if candidates.is_empty() {
            warn!(entity, "no candidate URLs");
            return Ok(run);
        }

        for candidate in &candidates {
            if run.succeeded >= max_successes {
                break;
            }

            let url = candidate.url.as_str();
            // A hard ledger denial stops the run before any fetch is spent.
            let gate = self.governor.check();
            if let Some(reason) = gate.reason.filter(|r| !r.is_self_healing()) {
                warn!(entity, url, %reason, "quota denied, aborting run");
                run.abort = Some(RunAbort::QuotaDenied { reason });
                break;
            }

            run.attempted += 1;
            let acquired = match self.acquirer.acquire(url).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    warn!(entity, url, kind = %e.kind, tier = %e.tier, "skipping candidate");
                    continue;
                }
            };

            if acquired.length < self.settings.min_content_chars {
                warn!(entity, url, chars = acquired.length, "content too short for extraction");
                continue;
            }

            // Per-minute denials are waited out before the metered call.
            let decision = self.governor.await_capacity().await;
            if !decision.allowed {
                if let Some(reason) = decision.reason {
                    warn!(entity, url, %reason, "quota denied, aborting run");
                    run.abort = Some(RunAbort::QuotaDenied { reason });
                }
                break;
            }

            let request = ExtractionRequest {
                text: acquired.content,
                source_url: acquired.url,
            };
            match self.extractor.extract(&request).await {
                Ok(response) => {
                    self.governor
                        .record(response.usage.input_units, response.usage.output_units)?;
                    if response.products.is_empty() {
                        info!(entity, url, "no products on page");
                        continue;
                    }
                    info!(entity, url, products = response.products.len(), "products extracted");
                    run.succeeded += 1;
                    run.results.push(ExtractionResult {
                        source_url: request.source_url,
                        method: acquired.method,
                        content_length: acquired.length,
                        products: response.products,
                    });
                }
                Err(e) => {
                    if let Some(usage) = e.usage() {
                        self.governor.record(usage.input_units, usage.output_units)?;
                    }
                    if e.is_soft() {
                        warn!(entity, url, kind = e.kind(), error = %e, "extraction failed");
                        continue;
                    }
                    match e {
                        ExtractionError::QuotaExhausted(message) => {
                            warn!(entity, %message, "provider quota exhausted, aborting run");
                            run.abort = Some(RunAbort::ProviderQuotaExhausted { message });
                        }
                        other => {
                            warn!(
                                entity,
                                kind = other.kind(),
                                error = %other,
                                "extraction service refused, stopping target"
                            );
                            run.stopped_by = Some(other.to_string());
                        }
                    }
                    break;
                }
            }
        }

        info!(
            entity,
            attempted = run.attempted,
            succeeded = run.succeeded,
            "target finished"
        );

        if run.succeeded > 0 {
            self.deliver(&run).await;
        }
        Ok(run)
    }

    /// Process Targets in order. A run-wide stop skips every later Target.
    pub async fn run_batch(&mut self, targets: &[String]) -> ScoutResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, targets = targets.len(), "run started");

        let max_successes = self.settings.max_successes;
        let mut reports = Vec::with_capacity(targets.len());
        let mut aborted: Option<RunAbort> = None;

        for entity in targets {
            if aborted.is_some() {
                reports.push(TargetReport::skipped(entity));
                continue;
            }
            let run = self.run(entity, max_successes).await?;
            aborted = run.abort.clone();
            reports.push(TargetReport::from(run));
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            targets: reports,
            aborted,
            quota: self.governor.stats(),
        };
        info!(
            %run_id,
            succeeded = report
                .targets
                .iter()
                .filter(|t| t.status == TargetStatus::Success)
                .count(),
            aborted = report.aborted.is_some(),
            "run finished"
        );
        Ok(report)
    }

    async fn deliver(&mut self, run: &TargetRun) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let now = Utc::now();
        let records: Vec<ProductRecord> = run
            .results
            .iter()
            .flat_map(|result| {
                result.products.iter().map(|p| ProductRecord {
                    molecule_name: p.name.clone(),
                    category: p.category.clone(),
                    stage: p.stage.clone(),
                    company_name: run.entity.clone(),
                    source_url: result.source_url.clone(),
                    recorded_at: now,
                })
            })
            .collect();
        if let Err(e) = sink.store(&records).await {
            warn!(entity = %run.entity, error = %format!("{e:#}"), "failed to store products");
        }
    }
}
