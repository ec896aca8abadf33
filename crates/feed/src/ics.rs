//! ICS (RFC 5545) serialization of meeting records.

use civic_core::MeetingRecord;
use civic_core::meeting::parse_date;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, Time};

const PRODID: &str = "-//NYC Civic Calendar//civic-calendar//EN";
const UID_DOMAIN: &str = "nyc-civic-calendar";
const TZID: &str = "America/New_York";
const DEFAULT_DURATION_HOURS: i64 = 2;

const VTIMEZONE: &[&str] = &[
    "BEGIN:VTIMEZONE",
    "TZID:America/New_York",
    "BEGIN:DAYLIGHT",
    "TZOFFSETFROM:-0500",
    "TZOFFSETTO:-0400",
    "TZNAME:EDT",
    "DTSTART:19700308T020000",
    "RRULE:FREQ=YEARLY;BYMONTH=3;BYDAY=2SU",
    "END:DAYLIGHT",
    "BEGIN:STANDARD",
    "TZOFFSETFROM:-0400",
    "TZOFFSETTO:-0500",
    "TZNAME:EST",
    "DTSTART:19701101T020000",
    "RRULE:FREQ=YEARLY;BYMONTH=11;BYDAY=1SU",
    "END:STANDARD",
    "END:VTIMEZONE",
];

pub fn generate_ics(meetings: &[MeetingRecord], calendar_name: &str, now: OffsetDateTime) -> String {
    let dtstamp = format_utc(now);
    let mut lines: Vec<String> = vec![
        "BEGIN:VCALENDAR".into(),
        "VERSION:2.0".into(),
        format!("PRODID:{PRODID}"),
        format!("X-WR-CALNAME:{}", escape_text(calendar_name)),
        format!("X-WR-TIMEZONE:{TZID}"),
        "CALSCALE:GREGORIAN".into(),
        "METHOD:PUBLISH".into(),
    ];
    lines.extend(VTIMEZONE.iter().map(|l| l.to_string()));

    for meeting in meetings {
        match event_lines(meeting, &dtstamp) {
            Some(event) => lines.extend(event),
            None => tracing::warn!(id = %meeting.id, date = %meeting.date, "skipping meeting with unusable date"),
        }
    }
    lines.push("END:VCALENDAR".into());

    let mut out = String::new();
    for line in &lines {
        out.push_str(&fold(line));
        out.push_str("\r\n");
    }
    out
}

fn event_lines(meeting: &MeetingRecord, dtstamp: &str) -> Option<Vec<String>> {
    let date = parse_date(&meeting.date)?;
    let mut lines = vec![
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}@{UID_DOMAIN}", meeting.id),
        format!("DTSTAMP:{dtstamp}"),
    ];

    match meeting.time.as_deref().and_then(parse_time) {
        Some(start_time) => {
            let start = PrimitiveDateTime::new(date, start_time);
            let end = meeting
                .end_time
                .as_deref()
                .and_then(parse_time)
                .map(|t| PrimitiveDateTime::new(date, t))
                .filter(|end| *end > start)
                .unwrap_or(start + Duration::hours(DEFAULT_DURATION_HOURS));
            lines.push(format!("DTSTART;TZID={TZID}:{}", format_local(start)));
            lines.push(format!("DTEND;TZID={TZID}:{}", format_local(end)));
        }
        None => {
            // All-day: DTEND is exclusive, so it is the following day.
            let next = date.next_day().unwrap_or(date);
            lines.push(format!("DTSTART;VALUE=DATE:{}", format_compact_date(date)));
            lines.push(format!("DTEND;VALUE=DATE:{}", format_compact_date(next)));
        }
    }

    lines.push(format!("SUMMARY:{}", escape_text(&meeting.title)));
    if !meeting.location.trim().is_empty() {
        lines.push(format!("LOCATION:{}", escape_text(&meeting.location)));
    }

    let description = match (meeting.description.as_deref(), meeting.url.as_deref()) {
        (Some(d), Some(u)) if !d.is_empty() => Some(format!("{d}\n\nMore info: {u}")),
        (Some(d), _) if !d.is_empty() => Some(d.to_string()),
        (_, Some(u)) => Some(u.to_string()),
        _ => None,
    };
    if let Some(description) = description {
        lines.push(format!("DESCRIPTION:{}", escape_text(&description)));
    }
    if let Some(url) = meeting.url.as_deref() {
        lines.push(format!("URL:{url}"));
    }
    lines.push("END:VEVENT".to_string());
    Some(lines)
}

fn parse_time(value: &str) -> Option<Time> {
    Time::parse(value.trim(), format_description!("[hour]:[minute]")).ok()
}

fn format_local(dt: PrimitiveDateTime) -> String {
    dt.format(format_description!("[year][month][day]T[hour][minute][second]"))
        .unwrap_or_default()
}

fn format_compact_date(date: time::Date) -> String {
    date.format(format_description!("[year][month][day]"))
        .unwrap_or_default()
}

fn format_utc(now: OffsetDateTime) -> String {
    now.to_offset(time::UtcOffset::UTC)
        .format(format_description!("[year][month][day]T[hour][minute][second]Z"))
        .unwrap_or_default()
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(ch),
        }
    }
    out
}

/// Folds a content line to 75 octets, continuation lines starting with a space.
fn fold(line: &str) -> String {
    const LIMIT: usize = 75;
    if line.len() <= LIMIT {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + line.len() / LIMIT * 3);
    let mut width = 0;
    for ch in line.chars() {
        let len = ch.len_utf8();
        // Continuation lines carry a leading space, leaving 74 octets of content.
        if width + len > LIMIT {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(ch);
        width += len;
    }
    out
}
