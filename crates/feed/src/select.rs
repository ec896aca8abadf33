use civic_core::meeting::sort_by_date;
use civic_core::store::{read_or_empty, DocumentStore};
use civic_core::{MeetingRecord, SourceDocument};

/// Inclusive `YYYY-MM-DD` bounds; either side may be open.
#[derive(Debug, Clone, Default)]
pub struct DateRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl DateRange {
    pub fn contains(&self, date: &str) -> bool {
        self.from.as_deref().is_none_or(|from| date >= from)
            && self.to.as_deref().is_none_or(|to| date <= to)
    }
}

/// Loads every listed source document; missing or unreadable ones contribute nothing.
pub async fn load_meetings(store: &dyn DocumentStore, documents: &[String]) -> Vec<MeetingRecord> {
    let mut meetings = Vec::new();
    for name in documents {
        match read_or_empty::<SourceDocument>(store, name).await {
            Some(doc) => meetings.extend(doc.meetings),
            None => tracing::warn!(document = %name, "no meetings loaded"),
        }
    }
    meetings
}

/// Keeps meetings whose org equals a selected key or sits below it
/// (`mta` selects `mta.board`), within the date range, ordered by date and time.
pub fn filter_meetings(
    meetings: Vec<MeetingRecord>,
    selected: &[String],
    range: &DateRange,
) -> Vec<MeetingRecord> {
    let mut out: Vec<MeetingRecord> = meetings
        .into_iter()
        .filter(|m| selected.iter().any(|org| matches_org(&m.org, org)))
        .filter(|m| range.contains(&m.date))
        .collect();
    out.sort_by(|a, b| a.time.cmp(&b.time));
    sort_by_date(&mut out);
    out
}

fn matches_org(org: &str, selected: &str) -> bool {
    org == selected
        || org
            .strip_prefix(selected)
            .is_some_and(|rest| rest.starts_with('.'))
}
