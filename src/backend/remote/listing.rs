//! Parsing of FTP directory listings and timestamps
//!
//! `MLSD` (RFC 3659) is preferred; servers without it fall back to the
//! unix-style `LIST` format that nearly every server emits.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::time::SystemTime;

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Parse one `MLSD` line (`fact=value;fact=value; name`).
///
/// Returns `None` for the `cdir`/`pdir` pseudo entries, for types other than
/// files and directories, and for malformed lines.
pub fn parse_mlsd_line(line: &str) -> Option<ListEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (facts, name) = line.split_once(' ')?;
    if name.is_empty() {
        return None;
    }

    let mut kind = None;
    let mut size = 0;
    let mut modified = None;
    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => kind = Some(value.to_ascii_lowercase()),
            "size" => size = value.parse().unwrap_or(0),
            "modify" => modified = parse_timestamp(value),
            _ => {}
        }
    }

    let is_dir = match kind.as_deref()? {
        "file" => false,
        "dir" => true,
        _ => return None,
    };
    Some(ListEntry {
        name: name.to_string(),
        is_dir,
        size: if is_dir { 0 } else { size },
        modified,
    })
}

/// Parse one unix `LIST` line, e.g.
/// `-rw-r--r--   1 owner group   1234 Jan 02 12:34 name.txt`.
///
/// Symlinks, `total` lines and `.`/`..` are skipped. `now` anchors the year
/// of recent entries, which `ls` prints without one.
pub fn parse_list_line(line: &str, now: DateTime<Utc>) -> Option<ListEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (fields, name) = split_fields(line, 8)?;
    let perms = fields[0];
    let is_dir = match perms.chars().next()? {
        'd' => true,
        '-' => false,
        _ => return None,
    };
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    let size = fields[4].parse().ok()?;
    let modified = parse_list_time(fields[5], fields[6], fields[7], now);
    Some(ListEntry {
        name: name.to_string(),
        is_dir,
        size: if is_dir { 0 } else { size },
        modified,
    })
}

/// Split off `count` whitespace-separated fields; the remainder (which may
/// contain spaces) is returned as the last element.
fn split_fields(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = line.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Some((fields, rest))
}

fn parse_list_time(
    month: &str,
    day: &str,
    clock_or_year: &str,
    now: DateTime<Utc>,
) -> Option<SystemTime> {
    let month = match month.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    let day: u32 = day.parse().ok()?;

    let naive = if let Some((hour, minute)) = clock_or_year.split_once(':') {
        let (hour, minute): (u32, u32) = (hour.parse().ok()?, minute.parse().ok()?);
        let this_year =
            NaiveDate::from_ymd_opt(now.year(), month, day)?.and_hms_opt(hour, minute, 0)?;
        // Entries without a year are within the last six months.
        if this_year.and_utc() > now + chrono::Duration::days(1) {
            NaiveDate::from_ymd_opt(now.year() - 1, month, day)?.and_hms_opt(hour, minute, 0)?
        } else {
            this_year
        }
    } else {
        let year: i32 = clock_or_year.parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?
    };
    Some(naive.and_utc().into())
}

/// Parse a `YYYYMMDDHHMMSS[.sss]` timestamp as used by `MDTM` and `MLSD`
pub fn parse_timestamp(raw: &str) -> Option<SystemTime> {
    let raw = raw.trim();
    let (whole, _fraction) = raw.split_once('.').unwrap_or((raw, ""));
    let naive = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S").ok()?;
    Some(Utc.from_utc_datetime(&naive).into())
}

/// Format a time for `MFMT`
pub fn format_timestamp(time: SystemTime) -> String {
    let time: DateTime<Utc> = time.into();
    time.format("%Y%m%d%H%M%S").to_string()
}
