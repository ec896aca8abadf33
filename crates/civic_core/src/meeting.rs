use crate::schema::MeetingRecord;
use std::cmp::Ordering;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime};

impl MeetingRecord {
    /// True when the record can be routed to a calendar: non-empty id and org,
    /// and a real calendar date in `YYYY-MM-DD` form.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty() && !self.org.trim().is_empty() && parse_date(&self.date).is_some()
    }

    /// Reason the record fails validation, for logging.
    pub fn invalid_reason(&self) -> Option<&'static str> {
        if self.id.trim().is_empty() {
            Some("missing id")
        } else if self.org.trim().is_empty() {
            Some("missing org")
        } else if parse_date(&self.date).is_none() {
            Some("malformed date")
        } else {
            None
        }
    }
}

pub fn validate(record: &MeetingRecord) -> bool {
    record.is_valid()
}

/// Orders by date only. ISO dates compare correctly as strings.
pub fn compare(a: &MeetingRecord, b: &MeetingRecord) -> Ordering {
    a.date.cmp(&b.date)
}

/// Stable sort, so records sharing a date keep their incoming order.
pub fn sort_by_date(meetings: &mut [MeetingRecord]) {
    meetings.sort_by(compare);
}

/// Splits records into the valid ones and the number dropped.
pub fn partition_valid(records: Vec<MeetingRecord>, source: &str) -> (Vec<MeetingRecord>, usize) {
    let mut valid = Vec::with_capacity(records.len());
    let mut dropped = 0;
    for record in records {
        match record.invalid_reason() {
            None => valid.push(record),
            Some(reason) => {
                dropped += 1;
                tracing::warn!(source, id = %record.id, org = %record.org, date = %record.date, reason, "dropping invalid meeting record");
            }
        }
    }
    (valid, dropped)
}

/// Builds a deterministic id from source, org, date and an optional discriminator,
/// so repeated scrapes of the same meeting produce the same key.
pub fn derive_id(source: &str, org: &str, date: &str, discriminator: Option<&str>) -> String {
    let mut parts = vec![slug(source), slug(org), date.trim().to_string()];
    if let Some(d) = discriminator {
        let d = slug(d);
        if !d.is_empty() {
            parts.push(d);
        }
    }
    parts.retain(|part| !part.is_empty());
    parts.join("-")
}

fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = true;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

pub fn parse_date(value: &str) -> Option<Date> {
    if value.len() != 10 {
        return None;
    }
    Date::parse(value, format_description!("[year]-[month]-[day]")).ok()
}

pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default()
}

/// First date still considered relevant: `days` before the date of `now`.
pub fn cutoff_date(now: OffsetDateTime, days: u32) -> String {
    let date = now
        .date()
        .checked_sub(Duration::days(i64::from(days)))
        .unwrap_or(Date::MIN);
    format_date(date)
}
