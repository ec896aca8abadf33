use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRecord {
    #[serde(default)]
    pub id: String,                  // merge key, stable across scrapes of the same meeting
    #[serde(default)]
    pub org: String,                 // canonical dot key, e.g. "city-council.finance"
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub date: String,                // YYYY-MM-DD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,        // HH:MM local; None means unspecified time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,    // HH:MM local; None means unknown duration
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Diagnostics recorded with each Source Document describing the run that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScraperRun {
    pub ran_at: String,              // RFC 3339, always the time of this run
    pub count: usize,                // valid records from the fresh scrape
    pub total: usize,                // records in the persisted document
    pub preserved: usize,            // previous future records carried forward untouched
    pub minimum_expected: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub invalid_dropped: usize,
    #[serde(default, skip_serializing_if = "is_false")]
    pub below_threshold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_existing_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    #[serde(default)]
    pub meetings: Vec<MeetingRecord>,
    #[serde(default)]
    pub last_updated: Option<String>, // RFC 3339; not advanced by a degraded scrape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scraper_run: Option<ScraperRun>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveOrgsDocument {
    #[serde(default)]
    pub active_orgs: Vec<String>,    // sorted, unique
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub current_run_orgs: usize,
    #[serde(default)]
    pub total_orgs: usize,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}
