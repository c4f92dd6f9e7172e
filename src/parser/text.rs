//! Small token extractors shared by both site parsers.
//!
//! Each function looks at one short string (a cell, a list item, a markup
//! fragment) and either returns a typed value or reports that the token is
//! not there. Callers decide whether an absent token is fatal.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::error::ExtractError;
use crate::model::{Line, Record, ShootingSplit, Team};

static PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,3})-(\d{1,3})\b").unwrap());
static SPREAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2,4})\s+([+-]?\d+(?:\.\d+)?)").unwrap());
static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2,3}(?:\.\d+)?)\b").unwrap());
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">([^<>]+)<").unwrap());
static BBREF_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,2}:\d{2}\s*[AP]M,\s*[A-Za-z]+\s+\d{1,2},\s*\d{4}").unwrap()
});

/// First `W-L` token in `text`.
pub fn parse_record(text: &str) -> Result<Record, ExtractError> {
    let caps = PAIR_RE
        .captures(text)
        .ok_or_else(|| ExtractError::MalformedRecord(text.trim().to_string()))?;
    let wins = caps[1].parse::<u32>();
    let losses = caps[2].parse::<u32>();
    match (wins, losses) {
        (Ok(wins), Ok(losses)) => Ok(Record { wins, losses }),
        _ => Err(ExtractError::MalformedRecord(text.trim().to_string())),
    }
}

/// First `M-A` token in `text`. `None` when the token is missing or made
/// exceeds attempted; 0-for-0 is a 0% split.
pub fn parse_shooting_split(text: &str) -> Option<ShootingSplit> {
    let caps = PAIR_RE.captures(text)?;
    let made = caps[1].parse::<u32>().ok()?;
    let attempted = caps[2].parse::<u32>().ok()?;
    ShootingSplit::new(made, attempted)
}

/// Reads the odds panel entries (`"Line: MIL -7.5"`, `"Over/Under: 228"`).
///
/// Without a `Line` entry the whole line is absent, even if an over/under is
/// listed.
pub fn parse_betting_line<S: AsRef<str>>(entries: &[S]) -> Line {
    let mut saw_line = false;
    let mut favorite = None;
    let mut spread = None;
    let mut over_under = None;

    for entry in entries {
        let entry = entry.as_ref();
        if entry.contains("Line") {
            saw_line = true;
            if entry.contains("EVEN") {
                favorite = Some("EVEN".to_string());
                spread = Some(0.0);
            } else if let Some(caps) = SPREAD_RE.captures(entry) {
                favorite = Some(caps[1].to_string());
                spread = caps[2].parse::<f64>().ok();
            }
        } else if entry.contains("Over/Under") {
            over_under = TOTAL_RE
                .captures(entry)
                .and_then(|c| c[1].parse::<f64>().ok());
        }
    }

    if !saw_line {
        return Line::default();
    }
    Line {
        favorite,
        spread,
        over_under,
    }
}

/// Location, name and abbreviation from the first three `>text<` tokens of a
/// team-name fragment.
pub fn parse_team_identity(markup: &str) -> Option<Team> {
    let tokens: Vec<&str> = TOKEN_RE
        .captures_iter(markup)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|t| !t.is_empty())
        .take(3)
        .collect();
    match tokens.as_slice() {
        [location, name, abbreviation] => Some(Team {
            location: Some(location.to_string()),
            name: name.to_string(),
            abbreviation: abbreviation.to_uppercase(),
        }),
        _ => None,
    }
}

/// Non-negative integer cell. Blank, `--` and negative values are `None`.
pub fn parse_count(text: &str) -> Option<u32> {
    let t = text.trim();
    t.strip_prefix('+').unwrap_or(t).parse::<u32>().ok()
}

pub fn parse_signed(text: &str) -> Option<i32> {
    let t = text.trim();
    t.strip_prefix('+').unwrap_or(t).parse::<i32>().ok()
}

/// Decimal cell; accepts the `.552` form basketball-reference uses.
pub fn parse_number(text: &str) -> Option<f64> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `36` or `36:24`, truncated to whole minutes.
pub fn parse_minutes(text: &str) -> Option<u32> {
    let t = text.trim();
    match t.split_once(':') {
        Some((mins, secs)) => {
            secs.trim().parse::<u32>().ok()?;
            mins.trim().parse::<u32>().ok()
        }
        None => parse_count(t),
    }
}

/// ESPN `data-date` attribute, e.g. `2019-03-02T00:30Z` (UTC).
pub fn parse_espn_date(text: &str) -> Option<NaiveDateTime> {
    let t = text.trim();
    NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%MZ")
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%SZ"))
        .ok()
}

/// basketball-reference scorebox line, e.g. `7:30 PM, January 1, 2006`.
pub fn parse_bbref_date(text: &str) -> Option<NaiveDateTime> {
    let m = BBREF_DATE_RE.find(text)?;
    NaiveDateTime::parse_from_str(m.as_str(), "%I:%M %p, %B %d, %Y").ok()
}
