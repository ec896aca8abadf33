use crate::schema::{ActiveOrgsDocument, MeetingRecord};
use std::collections::BTreeSet;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub fn extract_org_keys<'a, I>(meetings: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a MeetingRecord>,
{
    meetings
        .into_iter()
        .map(|m| m.org.trim())
        .filter(|org| !org.is_empty())
        .map(str::to_string)
        .collect()
}

/// Union of the previous active set and this run's orgs. Never subtracts:
/// an org whose scraper failed this run stays selectable.
pub fn reconcile(
    previous: Option<&ActiveOrgsDocument>,
    current_run: &BTreeSet<String>,
    now: OffsetDateTime,
) -> ActiveOrgsDocument {
    let mut active: BTreeSet<String> = previous
        .map(|doc| doc.active_orgs.iter().cloned().collect())
        .unwrap_or_default();
    active.extend(current_run.iter().cloned());

    ActiveOrgsDocument {
        total_orgs: active.len(),
        current_run_orgs: current_run.len(),
        active_orgs: active.into_iter().collect(),
        last_updated: now.format(&Rfc3339).ok(),
    }
}
