//! Parse `rlog` output into a [`RawHistory`].
//!
//! `rlog` prints a header (including the `symbolic names:` table), then one
//! block per revision, newest first. Blocks are separated by a line of 28
//! dashes and the listing ends with a line of 77 equals signs. Log messages
//! may contain such lines themselves, so a dash line only separates blocks
//! when the next line starts a revision, and the equals line only ends the
//! listing when nothing but blank lines follows it.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::model::RevisionState;
use crate::normalize::{RawHistory, RawRevision};

const SEPARATOR: &str = "----------------------------";
const TERMINATOR: &str =
    "=============================================================================";
const EMPTY_LOG: &str = "*** empty log message ***";

/// Where a parsed history belongs and how to fetch its content.
#[derive(Debug, Clone)]
pub struct Target {
    pub path: String,
    pub origin: PathBuf,
    pub executable: bool,
}

/// Parse the complete `rlog` output of one file.
pub fn parse(output: &str, target: Target) -> Result<RawHistory, Error> {
    let fail = |reason: String| Error {
        path: target.path.clone(),
        reason,
    };
    let lines: Vec<&str> = output.lines().collect();

    let mut history = RawHistory {
        path: target.path.clone(),
        origin: target.origin.clone(),
        executable: target.executable,
        symbols: Vec::new(),
        revisions: Vec::new(),
    };

    let mut i = 0;
    let mut in_symbols = false;
    while i < lines.len() && !starts_revision(&lines, i) {
        let line = lines[i];
        if line.starts_with("symbolic names:") {
            in_symbols = true;
        } else if in_symbols && line.starts_with(char::is_whitespace) {
            let (name, rev) = line
                .trim()
                .rsplit_once(':')
                .ok_or_else(|| fail(format!("bad symbol line '{}'", line.trim())))?;
            history
                .symbols
                .push((name.trim().to_string(), rev.trim().to_string()));
        } else {
            in_symbols = false;
        }
        i += 1;
    }

    while i < lines.len() && starts_revision(&lines, i) {
        i += 1;
        let (revision, next) = parse_revision(&lines, i).map_err(&fail)?;
        history.revisions.push(revision);
        i = next;
    }

    // Oldest first, the order the revisions were made in.
    history.revisions.reverse();
    Ok(history)
}

fn starts_revision(lines: &[&str], i: usize) -> bool {
    lines[i] == SEPARATOR
        && lines
            .get(i + 1)
            .is_some_and(|next| next.starts_with("revision "))
}

fn ends_listing(lines: &[&str], i: usize) -> bool {
    lines[i] == TERMINATOR && lines[i + 1..].iter().all(|l| l.trim().is_empty())
}

/// Parse the block starting at the `revision` line `i`. Returns the revision
/// and the index of the line that ended it.
fn parse_revision(lines: &[&str], mut i: usize) -> Result<(RawRevision, usize), String> {
    // "revision 1.2" optionally followed by "\tlocked by: user;"
    let id = lines[i]
        .trim_start_matches("revision ")
        .split_whitespace()
        .next()
        .ok_or("revision line without a number")?
        .to_string();
    i += 1;

    let info = lines
        .get(i)
        .filter(|l| l.starts_with("date:"))
        .ok_or_else(|| format!("revision {id}: missing date line"))?;
    let mut date = None;
    let mut author = None;
    let mut state = RevisionState::Normal;
    for field in info.split(';') {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "date" => date = Some(parse_date(value).ok_or_else(|| {
                format!("revision {id}: unrecognized date '{value}'")
            })?),
            "author" => author = Some(value.to_string()),
            "state" if value == "dead" => state = RevisionState::Dead,
            _ => {}
        }
    }
    let (timestamp, tz_offset) = date.ok_or_else(|| format!("revision {id}: no date"))?;
    let author = author.ok_or_else(|| format!("revision {id}: no author"))?;
    i += 1;

    let mut branches = Vec::new();
    if let Some(line) = lines.get(i).filter(|l| l.starts_with("branches:")) {
        branches = line["branches:".len()..]
            .split(';')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();
        i += 1;
    }

    let mut log = Vec::new();
    while i < lines.len() && !starts_revision(lines, i) && !ends_listing(lines, i) {
        log.push(lines[i]);
        i += 1;
    }
    let mut log = log.join("\n");
    if log == EMPTY_LOG {
        log.clear();
    }

    Ok((
        RawRevision {
            id,
            author,
            committer: None,
            timestamp,
            tz_offset,
            log,
            state,
            branches,
        },
        i,
    ))
}

/// Parse an RCS date into seconds since the epoch and an offset in seconds
/// east of UTC.
///
/// Accepts `YYYY/MM/DD HH:MM:SS` (UTC), the raw `YYYY.MM.DD.HH.MM.SS` form
/// where two-digit years are 19xx, and `YYYY-MM-DD HH:MM:SS` with an optional
/// `±hh[:mm]` offset as printed by `rlog -z`.
pub fn parse_date(value: &str) -> Option<(i64, i32)> {
    let value = value.trim();

    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y/%m/%d %H:%M:%S") {
        return Some((dt.and_utc().timestamp(), 0));
    }

    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%#z") {
        return Some((dt.timestamp(), dt.offset().local_minus_utc()));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some((dt.and_utc().timestamp(), 0));
    }

    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() == 6 {
        let mut year: i32 = parts[0].parse().ok()?;
        if parts[0].len() < 3 {
            year += 1900;
        }
        let field = |i: usize| parts[i].parse::<u32>().ok();
        let dt = NaiveDate::from_ymd_opt(year, field(1)?, field(2)?)?
            .and_hms_opt(field(3)?, field(4)?, field(5)?)?;
        return Some((dt.and_utc().timestamp(), 0));
    }

    None
}

/// `rlog` output that does not describe a usable history.
#[derive(Debug, thiserror::Error)]
#[error("cannot parse rlog output for {path}: {reason}")]
pub struct Error {
    pub path: String,
    pub reason: String,
}
