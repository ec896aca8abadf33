#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use time::OffsetDateTime;
use time::macros::datetime;

use civic_core::reconcile::{DegradeReason, Reconciler};
use civic_core::source::SourceAdapter;
use civic_core::store::{DocumentStore, MemoryStore};
use civic_core::taxonomy::Taxonomy;
use civic_core::{ActiveOrgsDocument, MeetingRecord, Orchestrator, RunStatus, SourceDocument, SourceEntry};

const NOW: OffsetDateTime = datetime!(2025-03-10 12:00 UTC);
const EARLIER: &str = "2025-03-03T12:00:00Z";

// ============================================================================
// Synthetic adapters
// ============================================================================

struct StaticSource {
    name: &'static str,
    meetings: Vec<MeetingRecord>,
    calls: AtomicUsize,
}

impl StaticSource {
    fn new(name: &'static str, meetings: Vec<MeetingRecord>) -> Arc<Self> {
        Arc::new(Self {
            name,
            meetings,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SourceAdapter for StaticSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn scrape(&self) -> Result<Vec<MeetingRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.meetings.clone())
    }
}

struct FailingSource(&'static str);

#[async_trait]
impl SourceAdapter for FailingSource {
    fn name(&self) -> &str {
        self.0
    }

    async fn scrape(&self) -> Result<Vec<MeetingRecord>> {
        Err(anyhow!("HTTP 503 from upstream"))
    }
}

struct HangingSource(&'static str);

#[async_trait]
impl SourceAdapter for HangingSource {
    fn name(&self) -> &str {
        self.0
    }

    async fn scrape(&self) -> Result<Vec<MeetingRecord>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

struct BlockingSource(&'static str);

#[async_trait]
impl SourceAdapter for BlockingSource {
    fn name(&self) -> &str {
        self.0
    }

    async fn scrape(&self) -> Result<Vec<MeetingRecord>> {
        // Stands in for a synchronous HTTP client holding the worker thread.
        std::thread::sleep(Duration::from_secs(1));
        Ok(vec![meeting("late", "dot", "2025-03-12")])
    }
}

struct PanickingSource(&'static str);

#[async_trait]
impl SourceAdapter for PanickingSource {
    fn name(&self) -> &str {
        self.0
    }

    async fn scrape(&self) -> Result<Vec<MeetingRecord>> {
        panic!("selector returned nothing");
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn meeting(id: &str, org: &str, date: &str) -> MeetingRecord {
    MeetingRecord {
        id: id.to_string(),
        org: org.to_string(),
        title: format!("Meeting {id}"),
        date: date.to_string(),
        time: Some("10:00".to_string()),
        end_time: None,
        location: "250 Broadway".to_string(),
        description: None,
        url: None,
    }
}

fn seed(store: &MemoryStore, name: &str, meetings: Vec<MeetingRecord>) {
    let doc = SourceDocument {
        meetings,
        last_updated: Some(EARLIER.to_string()),
        last_scraper_run: None,
    };
    store.insert(name, serde_json::to_value(doc).unwrap());
}

async fn load(store: &MemoryStore, name: &str) -> SourceDocument {
    let value = store.read(name).await.unwrap().expect("document present");
    serde_json::from_value(value).unwrap()
}

fn ids(doc: &SourceDocument) -> Vec<&str> {
    let mut ids: Vec<&str> = doc.meetings.iter().map(|m| m.id.as_str()).collect();
    ids.sort_unstable();
    ids
}

fn orchestrator(store: &MemoryStore) -> Orchestrator {
    Orchestrator::new(Arc::new(store.clone()), Reconciler::default())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn degraded_and_failed_sources_keep_history_while_others_update() -> Result<()> {
    let store = MemoryStore::new();
    seed(
        &store,
        "x.json",
        vec![
            meeting("A", "city-council.finance", "2025-03-17"),
            meeting("B", "city-council.finance", "2025-03-18"),
            meeting("C", "city-council.finance", "2025-03-19"),
        ],
    );
    seed(&store, "z.json", vec![meeting("Z1", "mta.board", "2025-04-01")]);

    let report = orchestrator(&store)
        .with_source(SourceEntry::new(
            StaticSource::new("x", vec![meeting("D", "city-council.finance", "2025-03-11")]),
            "x.json",
            5,
        ))?
        .with_source(SourceEntry::new(
            StaticSource::new("y", vec![meeting("Y1", "dot", "2025-03-12"), meeting("Y2", "dot", "2025-03-13")]),
            "y.json",
            1,
        ))?
        .with_source(SourceEntry::new(Arc::new(FailingSource("z")), "z.json", 1))?
        .run_at(NOW)
        .await;

    assert_eq!(report.status, RunStatus::Degraded);
    assert_eq!(report.http_status(), 207);
    assert!(report.persisted);

    let x = &report.results["x"];
    assert!(x.success);
    assert_eq!(x.count, 1);
    assert_eq!(x.preserved, 3);
    assert_eq!(x.reason, Some(DegradeReason::BelowThreshold));

    let z = &report.results["z"];
    assert!(!z.success);
    assert!(z.error.as_deref().unwrap().contains("HTTP 503"));
    assert_eq!(z.reason, Some(DegradeReason::BelowThreshold));

    let x_doc = load(&store, "x.json").await;
    assert_eq!(ids(&x_doc), vec!["A", "B", "C", "D"]);
    assert_eq!(x_doc.last_updated.as_deref(), Some(EARLIER));
    let run = x_doc.last_scraper_run.unwrap();
    assert!(run.below_threshold);
    assert_eq!(run.preserved, 3);

    let z_doc = load(&store, "z.json").await;
    assert_eq!(ids(&z_doc), vec!["Z1"]);
    assert!(z_doc.last_scraper_run.unwrap().error.is_some());

    let y_doc = load(&store, "y.json").await;
    assert_eq!(ids(&y_doc), vec!["Y1", "Y2"]);
    assert_eq!(y_doc.last_updated.as_deref(), Some("2025-03-10T12:00:00Z"));

    assert_eq!(report.total_meetings, 7);
    let active: ActiveOrgsDocument = serde_json::from_value(store.get("active-orgs.json").unwrap()).unwrap();
    assert_eq!(active.active_orgs, vec!["city-council.finance", "dot", "mta.board"]);
    assert_eq!(report.active_org_count, 3);
    Ok(())
}

#[tokio::test]
async fn good_scrape_replaces_timestamp_and_overrides_by_id() -> Result<()> {
    let store = MemoryStore::new();
    seed(
        &store,
        "x.json",
        vec![
            meeting("A", "city-council.finance", "2025-03-17"),
            meeting("B", "city-council.finance", "2025-03-18"),
            meeting("C", "city-council.finance", "2025-03-19"),
        ],
    );
    let mut updated_a = meeting("A", "city-council.finance", "2025-03-17");
    updated_a.time = Some("14:00".to_string());
    let mut fresh = vec![updated_a];
    for id in ["E", "F", "G", "H", "I"] {
        fresh.push(meeting(id, "city-council.finance", "2025-03-24"));
    }

    let report = orchestrator(&store)
        .with_source(SourceEntry::new(StaticSource::new("x", fresh), "x.json", 5))?
        .run_at(NOW)
        .await;

    assert_eq!(report.status, RunStatus::Healthy);
    assert!(report.success);
    let doc = load(&store, "x.json").await;
    assert_eq!(doc.meetings.len(), 8);
    assert_eq!(doc.last_updated.as_deref(), Some("2025-03-10T12:00:00Z"));
    let a: Vec<_> = doc.meetings.iter().filter(|m| m.id == "A").collect();
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].time.as_deref(), Some("14:00"));
    Ok(())
}

#[tokio::test]
async fn failed_batch_write_leaves_every_document_untouched() -> Result<()> {
    let store = MemoryStore::new();
    seed(&store, "x.json", vec![meeting("A", "dot", "2025-03-17")]);
    seed(&store, "y.json", vec![meeting("B", "dob", "2025-03-17")]);
    store.insert("active-orgs.json", json!({"activeOrgs": ["dob", "dot"], "lastUpdated": EARLIER, "currentRunOrgs": 2, "totalOrgs": 2}));
    let before = store.snapshot();
    store.fail_write("y.json");

    let report = orchestrator(&store)
        .with_source(SourceEntry::new(StaticSource::new("x", vec![meeting("A2", "dot", "2025-03-20")]), "x.json", 1))?
        .with_source(SourceEntry::new(StaticSource::new("y", vec![meeting("B2", "dob", "2025-03-20")]), "y.json", 1))?
        .run_at(NOW)
        .await;

    assert_eq!(report.status, RunStatus::PersistenceFailed);
    assert_eq!(report.http_status(), 500);
    assert!(!report.persisted);
    assert!(report.persist_error.as_deref().unwrap().contains("y.json"));
    assert!(report.results.values().all(|o| o.success));
    assert_eq!(store.snapshot(), before);
    assert_eq!(store.commits(), 0);
    Ok(())
}

#[tokio::test]
async fn hung_adapter_times_out_without_stalling_the_run() -> Result<()> {
    let store = MemoryStore::new();
    seed(&store, "slow.json", vec![meeting("S", "nypd", "2025-03-30")]);

    let report = orchestrator(&store)
        .with_source(
            SourceEntry::new(Arc::new(HangingSource("slow")), "slow.json", 1)
                .with_timeout(Duration::from_millis(50)),
        )?
        .with_source(SourceEntry::new(StaticSource::new("fast", vec![meeting("F", "dot", "2025-03-12")]), "fast.json", 1))?
        .run_at(NOW)
        .await;

    let slow = &report.results["slow"];
    assert!(!slow.success);
    assert!(slow.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(ids(&load(&store, "slow.json").await), vec!["S"]);
    assert!(report.results["fast"].success);
    assert!(report.persisted);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_adapter_times_out_without_stalling_the_run() -> Result<()> {
    let store = MemoryStore::new();
    seed(&store, "blocking.json", vec![meeting("S", "nypd", "2025-03-30")]);

    let started = Instant::now();
    let report = orchestrator(&store)
        .with_source(
            SourceEntry::new(Arc::new(BlockingSource("blocking")), "blocking.json", 1)
                .with_timeout(Duration::from_millis(50)),
        )?
        .with_source(SourceEntry::new(StaticSource::new("fast", vec![meeting("F", "dot", "2025-03-12")]), "fast.json", 1))?
        .run_at(NOW)
        .await;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(800), "run waited {elapsed:?} for a blocked adapter");
    let blocking = &report.results["blocking"];
    assert!(!blocking.success);
    assert!(blocking.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(ids(&load(&store, "blocking.json").await), vec!["S"]);
    assert!(report.results["fast"].success);
    assert!(report.persisted);
    Ok(())
}

#[tokio::test]
async fn panicking_adapter_is_isolated() -> Result<()> {
    let store = MemoryStore::new();
    let report = orchestrator(&store)
        .with_source(SourceEntry::new(Arc::new(PanickingSource("boom")), "boom.json", 1))?
        .with_source(SourceEntry::new(StaticSource::new("ok", vec![meeting("K", "dot", "2025-03-12")]), "ok.json", 1))?
        .run_at(NOW)
        .await;

    let boom = &report.results["boom"];
    assert!(!boom.success);
    assert_eq!(boom.reason, Some(DegradeReason::NoExistingData));
    assert!(report.results["ok"].is_healthy());
    assert!(load(&store, "boom.json").await.meetings.is_empty());
    Ok(())
}

#[tokio::test]
async fn active_orgs_survive_sources_that_stop_reporting() -> Result<()> {
    let store = MemoryStore::new();
    let first = orchestrator(&store)
        .with_source(SourceEntry::new(
            StaticSource::new("a", vec![meeting("1", "community-boards.bk-1", "2025-03-04")]),
            "a.json",
            1,
        ))?
        .with_source(SourceEntry::new(StaticSource::new("b", vec![meeting("2", "dot", "2025-03-12")]), "b.json", 1))?
        .run_at(NOW)
        .await;
    assert!(first.persisted);

    // A week later source `a` is down and its only meeting has aged out.
    let later = datetime!(2025-03-17 12:00 UTC);
    let second = orchestrator(&store)
        .with_source(SourceEntry::new(Arc::new(FailingSource("a")), "a.json", 1))?
        .with_source(SourceEntry::new(StaticSource::new("b", vec![meeting("3", "dot", "2025-03-19")]), "b.json", 1))?
        .run_at(later)
        .await;
    assert!(second.persisted);
    assert!(load(&store, "a.json").await.meetings.is_empty());

    let active: ActiveOrgsDocument = serde_json::from_value(store.get("active-orgs.json").unwrap()).unwrap();
    assert_eq!(active.active_orgs, vec!["community-boards.bk-1", "dot"]);
    assert_eq!(active.current_run_orgs, 1);
    assert_eq!(active.total_orgs, 2);
    Ok(())
}

#[tokio::test]
async fn repeated_runs_are_idempotent() -> Result<()> {
    let store = MemoryStore::new();
    let source = StaticSource::new(
        "x",
        vec![meeting("B", "dot", "2025-03-14"), meeting("A", "dot", "2025-03-14")],
    );
    let orch = orchestrator(&store).with_source(SourceEntry::new(source.clone(), "x.json", 1))?;

    orch.run_at(NOW).await;
    let first = store.snapshot();
    orch.run_at(NOW).await;
    assert_eq!(store.snapshot(), first);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.commits(), 2);
    Ok(())
}

#[tokio::test]
async fn unreadable_previous_state_falls_back_to_cold_start() -> Result<()> {
    let store = MemoryStore::new();
    store.insert("x.json", json!({"meetings": 42}));
    store.fail_read("active-orgs.json");

    let report = orchestrator(&store)
        .with_source(SourceEntry::new(StaticSource::new("x", vec![meeting("A", "dot", "2025-03-12")]), "x.json", 3))?
        .run_at(NOW)
        .await;

    assert!(report.persisted);
    assert_eq!(report.results["x"].reason, Some(DegradeReason::NoExistingData));
    let doc = load(&store, "x.json").await;
    assert_eq!(ids(&doc), vec!["A"]);
    assert!(doc.last_scraper_run.unwrap().no_existing_data);
    assert!(report.active_orgs_error.is_some());
    assert_eq!(store.get("active-orgs.json"), None);
    Ok(())
}

#[tokio::test]
async fn unreadable_active_orgs_are_never_shrunk() -> Result<()> {
    let store = MemoryStore::new();
    let seeded = json!({
        "activeOrgs": ["city-council.finance", "mta.board"],
        "lastUpdated": EARLIER,
        "currentRunOrgs": 2,
        "totalOrgs": 2
    });
    store.insert("active-orgs.json", seeded.clone());
    store.fail_read("active-orgs.json");
    seed(&store, "x.json", vec![meeting("A", "dot", "2025-03-12")]);

    let report = orchestrator(&store)
        .with_source(SourceEntry::new(StaticSource::new("x", vec![meeting("A", "dot", "2025-03-12")]), "x.json", 1))?
        .run_at(NOW)
        .await;

    assert!(report.persisted);
    assert!(report.results["x"].is_healthy());
    assert_eq!(report.status, RunStatus::Degraded);
    assert!(report.active_orgs_error.as_deref().unwrap().contains("active-orgs.json"));
    assert_eq!(store.get("active-orgs.json"), Some(seeded));
    assert_eq!(ids(&load(&store, "x.json").await), vec!["A"]);

    // Once the document is readable again the union resumes from the stored set.
    store.clear_failures();
    let report = orchestrator(&store)
        .with_source(SourceEntry::new(StaticSource::new("x", vec![meeting("A", "dot", "2025-03-12")]), "x.json", 1))?
        .run_at(NOW)
        .await;
    assert_eq!(report.status, RunStatus::Healthy);
    let active: ActiveOrgsDocument = serde_json::from_value(store.get("active-orgs.json").unwrap()).unwrap();
    assert_eq!(active.active_orgs, vec!["city-council.finance", "dot", "mta.board"]);
    Ok(())
}

#[test]
fn builder_rejects_colliding_sources() {
    let store = MemoryStore::new();
    let entry = |name: &'static str, document: &str| SourceEntry::new(StaticSource::new(name, Vec::new()), document, 1);

    let err = orchestrator(&store)
        .with_source(entry("x", "x.json"))
        .and_then(|o| o.with_source(entry("y", "x.json")))
        .err()
        .expect("shared document");
    assert!(err.to_string().contains("duplicate source document"));

    let err = orchestrator(&store)
        .with_source(entry("x", "x.json"))
        .and_then(|o| o.with_source(entry("x", "y.json")))
        .err()
        .expect("shared name");
    assert!(err.to_string().contains("duplicate source name"));

    let err = orchestrator(&store)
        .with_source(entry("x", "active-orgs.json"))
        .err()
        .expect("active-orgs collision");
    assert!(err.to_string().contains("active-orgs"));

    let err = orchestrator(&store)
        .with_source(entry("x", "x.json"))
        .and_then(|o| o.with_active_orgs_document("x.json"))
        .err()
        .expect("active-orgs renamed onto a source");
    assert!(err.to_string().contains("active-orgs"));
}

#[tokio::test]
async fn records_without_org_never_reach_storage() -> Result<()> {
    let store = MemoryStore::new();
    let taxonomy = Taxonomy::from_yaml("organizations:\n  dot:\n    name: DOT\n").unwrap();
    let report = orchestrator(&store)
        .with_taxonomy(taxonomy)
        .with_source(SourceEntry::new(
            StaticSource::new(
                "x",
                vec![
                    meeting("A", "dot", "2025-03-12"),
                    meeting("B", "", "2025-03-12"),
                    meeting("C", "unlisted.org", "2025-03-12"),
                ],
            ),
            "x.json",
            1,
        ))?
        .run_at(NOW)
        .await;

    assert_eq!(report.results["x"].count, 2);
    let doc = load(&store, "x.json").await;
    assert_eq!(ids(&doc), vec!["A", "C"]);
    assert_eq!(doc.last_scraper_run.unwrap().invalid_dropped, 1);
    Ok(())
}
