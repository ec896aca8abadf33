//! One aggregation run: scrape every source concurrently, reconcile each against
//! its persisted document, fold in the active-organization set, and commit the
//! whole result as a single batch.

use crate::active_orgs;
use crate::config::CronConfig;
use crate::error::StoreError;
use crate::reconcile::{ReconcileInput, Reconciler};
use crate::report::{RunReport, SourceOutcome};
use crate::schema::{ActiveOrgsDocument, MeetingRecord, SourceDocument};
use crate::source::{self, SourceAdapter};
use crate::store::{read_document, read_or_empty, Batch, DocumentStore};
use crate::taxonomy::Taxonomy;
use anyhow::{anyhow, Result};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::Instrument;

pub struct SourceEntry {
    pub name: String,
    pub document: String,
    pub minimum_expected: usize,
    pub timeout: Duration,
    pub adapter: Arc<dyn SourceAdapter>,
}

impl SourceEntry {
    pub fn new(adapter: Arc<dyn SourceAdapter>, document: impl Into<String>, minimum_expected: usize) -> Self {
        Self {
            name: adapter.name().to_string(),
            document: document.into(),
            minimum_expected,
            timeout: Duration::from_secs(120),
            adapter,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct Orchestrator {
    store: Arc<dyn DocumentStore>,
    sources: Vec<SourceEntry>,
    reconciler: Reconciler,
    active_orgs_document: String,
    taxonomy: Option<Taxonomy>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn DocumentStore>, reconciler: Reconciler) -> Self {
        Self {
            store,
            sources: Vec::new(),
            reconciler,
            active_orgs_document: "active-orgs.json".to_string(),
            taxonomy: None,
        }
    }

    pub fn from_config(config: &CronConfig, store: Arc<dyn DocumentStore>) -> Result<Self> {
        let taxonomy = match &config.taxonomy {
            Some(path) => Some(Taxonomy::load(path)?),
            None => None,
        };
        let mut orchestrator = Self::new(store, Reconciler::new(config.carry_forward_days))
            .with_active_orgs_document(config.active_orgs_document.clone())?;
        orchestrator.taxonomy = taxonomy;
        for source_config in &config.sources {
            orchestrator = orchestrator.with_source(SourceEntry {
                name: source_config.name.clone(),
                document: source_config.document.clone(),
                minimum_expected: source_config.minimum_expected,
                timeout: config.adapter_timeout(source_config),
                adapter: source::from_config(source_config),
            })?;
        }
        Ok(orchestrator)
    }

    /// Adds a source. Names and documents must be unique, since both key the
    /// run's results and its batch.
    pub fn with_source(mut self, entry: SourceEntry) -> Result<Self> {
        if entry.name.trim().is_empty() {
            return Err(anyhow!("source with empty name"));
        }
        if entry.document.trim().is_empty() {
            return Err(anyhow!("source {} has no document name", entry.name));
        }
        if entry.document == self.active_orgs_document {
            return Err(anyhow!(
                "source {} writes to the active-orgs document {}",
                entry.name,
                entry.document
            ));
        }
        for existing in &self.sources {
            if existing.name == entry.name {
                return Err(anyhow!("duplicate source name: {}", entry.name));
            }
            if existing.document == entry.document {
                return Err(anyhow!("duplicate source document: {}", entry.document));
            }
        }
        self.sources.push(entry);
        Ok(self)
    }

    pub fn with_active_orgs_document(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if let Some(entry) = self.sources.iter().find(|entry| entry.document == name) {
            return Err(anyhow!("source {} writes to the active-orgs document {name}", entry.name));
        }
        self.active_orgs_document = name;
        Ok(self)
    }

    pub fn with_taxonomy(mut self, taxonomy: Taxonomy) -> Self {
        self.taxonomy = Some(taxonomy);
        self
    }

    pub async fn run(&self) -> RunReport {
        self.run_at(OffsetDateTime::now_utc()).await
    }

    pub async fn run_at(&self, now: OffsetDateTime) -> RunReport {
        let span = tracing::info_span!("cron_run", sources = self.sources.len());
        self.run_inner(now).instrument(span).await
    }

    async fn run_inner(&self, now: OffsetDateTime) -> RunReport {
        let timestamp = now.format(&Rfc3339).unwrap_or_default();
        tracing::info!(%timestamp, "starting aggregation run");

        // Scrapes run as independent tasks; reads of the previous state overlap them.
        let scrapes = join_all(self.sources.iter().map(spawn_scrape));
        let previous = join_all(
            self.sources
                .iter()
                .map(|entry| read_or_empty::<SourceDocument>(self.store.as_ref(), &entry.document)),
        );
        let previous_active =
            read_document::<ActiveOrgsDocument>(self.store.as_ref(), &self.active_orgs_document);
        let (scraped, previous, previous_active) = tokio::join!(scrapes, previous, previous_active);

        let mut results = BTreeMap::new();
        let mut documents: Vec<(&str, SourceDocument)> = Vec::with_capacity(self.sources.len());
        for ((entry, scraped), previous) in self.sources.iter().zip(scraped).zip(previous) {
            let (fresh, error) = match scraped {
                Ok(meetings) => (meetings, None),
                Err(error) => {
                    tracing::error!(source = %entry.name, %error, "adapter failed");
                    (Vec::new(), Some(error))
                }
            };
            self.check_orgs(&entry.name, &fresh);

            let reconciled = self.reconciler.reconcile(
                ReconcileInput {
                    source: &entry.name,
                    previous,
                    fresh,
                    minimum_expected: entry.minimum_expected,
                    error: error.clone(),
                },
                now,
            );
            let summary = reconciled.summary;
            tracing::info!(
                source = %entry.name,
                count = summary.count,
                total = summary.total,
                preserved = summary.preserved,
                reason = ?summary.reason,
                "reconciled source"
            );
            results.insert(
                entry.name.clone(),
                SourceOutcome {
                    success: error.is_none(),
                    count: summary.count,
                    total: summary.total,
                    preserved: summary.preserved,
                    reason: summary.reason,
                    error,
                },
            );
            documents.push((entry.document.as_str(), reconciled.document));
        }

        let run_orgs = active_orgs::extract_org_keys(documents.iter().flat_map(|(_, doc)| &doc.meetings));
        // An unreadable set is left as stored; rewriting it from this run alone would shrink it.
        let (active, active_orgs_error) = match previous_active {
            Ok(previous) => (Some(active_orgs::reconcile(previous.as_ref(), &run_orgs, now)), None),
            Err(err) => {
                tracing::error!(
                    document = %self.active_orgs_document,
                    error = %err,
                    "active-org set unavailable, leaving it as stored"
                );
                (None, Some(err.to_string()))
            }
        };
        let total_meetings: usize = documents.iter().map(|(_, doc)| doc.meetings.len()).sum();
        let active_org_count = active.as_ref().map_or(run_orgs.len(), |doc| doc.active_orgs.len());

        let persist_error = match self.commit(documents, active.as_ref()).await {
            Ok(()) => {
                tracing::info!(total_meetings, active_org_count, "committed run batch");
                None
            }
            Err(err) => {
                tracing::error!(error = %err, "batch write failed, nothing from this run is visible");
                Some(err.to_string())
            }
        };

        let report = RunReport::new(timestamp, results, total_meetings, active_org_count, persist_error);
        match active_orgs_error {
            Some(error) => report.with_active_orgs_error(error),
            None => report,
        }
    }

    async fn commit(
        &self,
        documents: Vec<(&str, SourceDocument)>,
        active: Option<&ActiveOrgsDocument>,
    ) -> Result<(), StoreError> {
        let mut batch = Batch::new();
        for (name, doc) in documents {
            batch.insert(name.to_string(), serde_json::to_value(doc)?);
        }
        if let Some(active) = active {
            batch.insert(self.active_orgs_document.clone(), serde_json::to_value(active)?);
        }
        self.store.write_batch(batch).await
    }

    /// Unknown org keys are logged, not dropped; the taxonomy may simply lag behind a source.
    fn check_orgs(&self, source: &str, meetings: &[MeetingRecord]) {
        let Some(taxonomy) = &self.taxonomy else {
            return;
        };
        let unknown: BTreeSet<&str> = meetings
            .iter()
            .map(|m| m.org.as_str())
            .filter(|org| !org.is_empty() && !taxonomy.contains(org))
            .collect();
        for org in unknown {
            tracing::warn!(source, org, "org key not in taxonomy");
        }
    }
}

/// Spawns one adapter and bounds the wait on its task. A panic, error or timeout
/// all resolve to `Err`, so a bad source never cancels or stalls its siblings,
/// even when the adapter blocks its worker thread.
async fn spawn_scrape(entry: &SourceEntry) -> Result<Vec<MeetingRecord>, String> {
    let adapter = Arc::clone(&entry.adapter);
    let timeout = entry.timeout;
    let span = tracing::info_span!("scrape", source = %entry.name);
    let mut handle = tokio::spawn(async move { adapter.scrape().await }.instrument(span));
    let outcome = tokio::time::timeout(timeout, &mut handle).await;
    match outcome {
        Ok(Ok(Ok(meetings))) => {
            tracing::debug!(source = %entry.name, count = meetings.len(), "adapter finished");
            Ok(meetings)
        }
        Ok(Ok(Err(err))) => Err(format!("{err:#}")),
        Ok(Err(err)) => Err(format!("adapter task aborted: {err}")),
        Err(_) => {
            handle.abort();
            Err(format!("timed out after {timeout:?}"))
        }
    }
}
