use crate::meeting::{self, cutoff_date};
use crate::schema::{MeetingRecord, ScraperRun, SourceDocument};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Why a source's document was not refreshed normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    BelowThreshold,
    NoExistingData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub count: usize,
    pub total: usize,
    pub preserved: usize,
    pub reason: Option<DegradeReason>,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub document: SourceDocument,
    pub summary: ReconcileSummary,
}

/// Input for one source. `fresh` is empty when the adapter failed.
#[derive(Debug, Clone)]
pub struct ReconcileInput<'a> {
    pub source: &'a str,
    pub previous: Option<SourceDocument>,
    pub fresh: Vec<MeetingRecord>,
    pub minimum_expected: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    carry_forward_days: u32,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self { carry_forward_days: 1 }
    }
}

impl Reconciler {
    pub fn new(carry_forward_days: u32) -> Self {
        Self { carry_forward_days }
    }

    pub fn reconcile(&self, input: ReconcileInput<'_>, now: OffsetDateTime) -> Reconciled {
        let ReconcileInput {
            source,
            previous,
            fresh,
            minimum_expected,
            error,
        } = input;
        let previous = previous.unwrap_or_default();
        let now_str = now.format(&Rfc3339).unwrap_or_default();
        let cutoff = cutoff_date(now, self.carry_forward_days);

        let (fresh, invalid_dropped) = meeting::partition_valid(fresh, source);
        let (previous_meetings, _) = meeting::partition_valid(previous.meetings, source);
        let previous_future: Vec<MeetingRecord> = previous_meetings
            .into_iter()
            .filter(|m| m.date >= cutoff)
            .collect();

        // Keyed by id; later inserts win, so fresh overrides previous and
        // later duplicates within the fresh batch override earlier ones.
        let mut by_id: BTreeMap<String, MeetingRecord> = BTreeMap::new();
        for m in &previous_future {
            by_id.insert(m.id.clone(), m.clone());
        }
        for m in &fresh {
            by_id.insert(m.id.clone(), m.clone());
        }
        let preserved = previous_future
            .iter()
            .filter(|m| !fresh.iter().any(|f| f.id == m.id))
            .count();

        let mut merged: Vec<MeetingRecord> = by_id.into_values().collect();
        meeting::sort_by_date(&mut merged);

        let count = fresh.len();
        let total = merged.len();
        let mut run = ScraperRun {
            ran_at: now_str.clone(),
            count,
            total,
            preserved,
            minimum_expected,
            invalid_dropped,
            error,
            ..ScraperRun::default()
        };

        let (last_updated, reason) = if count >= minimum_expected {
            (Some(now_str), None)
        } else if !previous_future.is_empty() {
            tracing::warn!(
                source,
                count,
                minimum_expected,
                preserved,
                "scrape below threshold, keeping previous lastUpdated"
            );
            run.below_threshold = true;
            (previous.last_updated, Some(DegradeReason::BelowThreshold))
        } else {
            tracing::warn!(source, count, minimum_expected, "scrape below threshold with no existing data");
            run.no_existing_data = true;
            (Some(now_str), Some(DegradeReason::NoExistingData))
        };

        Reconciled {
            document: SourceDocument {
                meetings: merged,
                last_updated,
                last_scraper_run: Some(run),
            },
            summary: ReconcileSummary {
                count,
                total,
                preserved,
                reason,
            },
        }
    }
}
