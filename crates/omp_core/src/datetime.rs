use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use regex::{Captures, Regex};
use std::sync::LazyLock;

pub type Epoch = i64;

pub const PORTAL_TZ: Tz = chrono_tz::US::Eastern;

pub(crate) const SIMPLE_DATE: &str =
    r"(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) (?: ?(\d\d?)) (\d{4})";
pub(crate) const SIMPLE_TIME: &str = r"(\d{1,2}):(\d{2}) ?((?:A|P)M)";

static DATETIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^{SIMPLE_DATE}, {SIMPLE_TIME}$")).expect("datetime regex"));

// A changed meeting shows the old value in parentheses after the new one.
static MEETING_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{SIMPLE_DATE}(?:\s*\({SIMPLE_DATE}\))?$")).expect("date regex")
});
static MEETING_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{SIMPLE_TIME}(?:\s*\({SIMPLE_TIME}\))?$")).expect("time regex")
});

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Parses `"Mon D YYYY, HH:MMAM"` into epoch seconds.
pub fn parse_portal_datetime(value: &str) -> Option<Epoch> {
    let caps = DATETIME.captures(value.trim())?;
    let date = date_from_groups(&caps, 1)?;
    let naive = date.and_time(time_from_groups(&caps, 4)?.time());
    localize(naive)
}

/// Same as [`parse_portal_datetime`] but unparsable input becomes epoch
/// zero, matching what earlier ingests stored.
pub fn parse_portal_datetime_lenient(value: &str) -> Epoch {
    parse_portal_datetime(value).unwrap_or_else(|| {
        if !value.trim().is_empty() {
            tracing::warn!(value, "unparsable portal datetime, storing epoch zero");
        }
        0
    })
}

/// Combines the separate meeting date and time cells. Either failing to
/// parse yields epoch zero.
pub fn parse_meeting_datetime(date: &str, time: &str) -> Epoch {
    let combined = MEETING_DATE.captures(date.trim()).and_then(|date_caps| {
        let time_caps = MEETING_TIME.captures(time.trim())?;
        let day = date_from_groups(&date_caps, 1)?;
        let clock = time_from_groups(&time_caps, 1)?;
        localize(day.and_time(clock.time()))
    });
    combined.unwrap_or_else(|| {
        tracing::warn!(date, time, "unparsable meeting date/time, storing epoch zero");
        0
    })
}

/// Formats epoch seconds the way the portal prints them, with the day
/// unpadded.
pub fn format_portal_datetime(epoch: Epoch) -> String {
    match DateTime::from_timestamp(epoch, 0) {
        Some(utc) => utc
            .with_timezone(&PORTAL_TZ)
            .format("%b %-d %Y, %I:%M%p")
            .to_string(),
        None => String::new(),
    }
}

/// Capture timestamp from an HTTP `Date` header (RFC 2822, GMT).
pub fn parse_http_date(value: &str) -> Option<Epoch> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.timestamp())
}

fn date_from_groups(caps: &Captures<'_>, first: usize) -> Option<NaiveDate> {
    let month = MONTHS.iter().position(|m| *m == &caps[first])? as u32 + 1;
    let day: u32 = caps.get(first + 1)?.as_str().parse().ok()?;
    let year: i32 = caps.get(first + 2)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn time_from_groups(caps: &Captures<'_>, first: usize) -> Option<NaiveDateTime> {
    let hour: u32 = caps.get(first)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(first + 1)?.as_str().parse().ok()?;
    if !(1..=12).contains(&hour) {
        return None;
    }
    let hour = match (&caps[first + 2], hour) {
        ("AM", 12) => 0,
        ("AM", h) => h,
        ("PM", 12) => 12,
        (_, h) => h + 12,
    };
    NaiveDate::from_ymd_opt(1970, 1, 1)?.and_hms_opt(hour, minute, 0)
}

fn localize(naive: NaiveDateTime) -> Option<Epoch> {
    match PORTAL_TZ.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.timestamp()),
        // Fall-back hour: take standard time.
        LocalResult::Ambiguous(_, standard) => Some(standard.timestamp()),
        // Spring-forward gap.
        LocalResult::None => PORTAL_TZ
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.timestamp()),
    }
}
