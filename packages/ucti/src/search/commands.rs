//! Inline search commands.
//!
//! Commands are scanned out of the raw query before parsing. Each command is
//! case-sensitive and recognized once, at any position. Missing `!from`/
//! `!to` default to a seven-day window ending today and are injected into
//! the canonical query, so the canonical form always carries the window
//! explicitly and hashes stably for the cache.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::error::{Result, UctiError};

/// Hard cap on result count.
pub const RESULTS_MAX: usize = 100;
/// Default relevancy floor.
pub const DEFAULT_MIN_SCORE: u32 = 15;
/// Default distinct-filter similarity threshold.
pub const DEFAULT_DISTINCT_RATIO: u32 = 90;
/// Default soft-window length when `!from` is absent.
const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Parsed command set for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCommands {
    /// Penalties become exclusions
    pub strict: bool,
    /// Expose back data
    pub debug: bool,
    /// Distinct-filter threshold; `None` disables the filter
    pub distinct: Option<u32>,
    pub min_score: u32,
    pub count: usize,
    /// Soft window, inclusive dates
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl SearchCommands {
    /// Start of the soft window.
    pub fn search_earliest(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.from.and_hms_opt(0, 0, 0).unwrap())
    }

    /// End of the soft window (inclusive date, so end of day).
    pub fn search_latest(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.to.and_hms_opt(23, 59, 59).unwrap())
    }

    /// Retrieval window: the soft window extended by half its length on each
    /// side. Under `!strict` the hard window equals the soft window.
    pub fn hard_window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let earliest = self.search_earliest();
        let latest = self.search_latest();
        if self.strict {
            return (earliest, latest);
        }
        let margin = (latest - earliest) / 2;
        (earliest - margin, latest + margin)
    }
}

/// Scan commands out of `query`. Returns the remaining search text, the
/// command set, and the canonical query with the window made explicit.
pub fn parse_search_commands(query: &str) -> Result<(String, SearchCommands, String)> {
    let today = Utc::now().date_naive();

    let mut strict = false;
    let mut debug = false;
    let mut distinct: Option<u32> = None;
    let mut min_score: Option<u32> = None;
    let mut count: Option<usize> = None;
    let mut from: Option<NaiveDate> = None;
    let mut to: Option<NaiveDate> = None;
    let mut age: Option<i64> = None;

    let mut remaining: Vec<&str> = Vec::new();
    for token in query.split_whitespace() {
        match token {
            "!strict" if !strict => strict = true,
            "!debug" if !debug => debug = true,
            "!distinct" if distinct.is_none() => distinct = Some(DEFAULT_DISTINCT_RATIO),
            _ => {
                if let Some(value) = token.strip_prefix("!distinct:") {
                    if distinct.is_none() {
                        distinct = Some(parse_number(token, value)?);
                        continue;
                    }
                } else if let Some(value) = token.strip_prefix("!min_score:") {
                    if min_score.is_none() {
                        min_score = Some(parse_number(token, value)?);
                        continue;
                    }
                } else if let Some(value) = token.strip_prefix("!count:") {
                    if count.is_none() {
                        count = Some(parse_number::<usize>(token, value)?.min(RESULTS_MAX));
                        continue;
                    }
                } else if let Some(value) = token.strip_prefix("!from:") {
                    if from.is_none() {
                        from = Some(parse_date(token, value)?);
                        continue;
                    }
                } else if let Some(value) = token.strip_prefix("!to:") {
                    if to.is_none() {
                        to = Some(parse_date(token, value)?);
                        continue;
                    }
                } else if let Some(value) = token.strip_prefix("!age:") {
                    if age.is_none() {
                        age = Some(parse_number(token, value)?);
                        continue;
                    }
                }
                remaining.push(token);
            }
        }
    }

    // `!age:D` is shorthand for an explicit window ending today.
    if let Some(days) = age {
        from.get_or_insert(today - Duration::days(days));
        to.get_or_insert(today);
    }
    let to = to.unwrap_or(today);
    let from = from.unwrap_or(to - Duration::days(DEFAULT_WINDOW_DAYS));

    let commands = SearchCommands {
        strict,
        debug,
        distinct,
        min_score: min_score.unwrap_or(DEFAULT_MIN_SCORE),
        count: count.unwrap_or(RESULTS_MAX),
        from,
        to,
    };
    let base = remaining.join(" ");
    let canonical = canonical_query(&base, &commands);
    Ok((base, commands, canonical))
}

/// Rebuild the canonical query string: base text, then every effective
/// command in a fixed order with the window explicit.
pub fn canonical_query(base: &str, commands: &SearchCommands) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !base.is_empty() {
        parts.push(base.to_string());
    }
    if commands.strict {
        parts.push("!strict".into());
    }
    if commands.debug {
        parts.push("!debug".into());
    }
    if let Some(ratio) = commands.distinct {
        parts.push(format!("!distinct:{ratio}"));
    }
    if commands.min_score != DEFAULT_MIN_SCORE {
        parts.push(format!("!min_score:{}", commands.min_score));
    }
    if commands.count != RESULTS_MAX {
        parts.push(format!("!count:{}", commands.count));
    }
    parts.push(format!("!from:{}", commands.from.format("%Y-%m-%d")));
    parts.push(format!("!to:{}", commands.to.format("%Y-%m-%d")));
    parts.join(" ")
}

/// Split a query's soft window into consecutive sub-windows of `window`
/// length (the last one clipped to `!to`), each rewritten as a canonical
/// query with its own explicit `!from`/`!to`. Earliest window first.
pub fn canonical_windows(query: &str, window: Duration) -> Result<Vec<String>> {
    let (base, commands, _) = parse_search_commands(query)?;
    let mut queries = Vec::new();
    let mut start = commands.from;
    while start <= commands.to {
        let end = std::cmp::min(start + window - Duration::days(1), commands.to);
        let mut windowed = commands.clone();
        windowed.from = start;
        windowed.to = end;
        queries.push(canonical_query(&base, &windowed));
        start = end + Duration::days(1);
    }
    Ok(queries)
}

fn parse_number<T: std::str::FromStr>(token: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| UctiError::QueryParse(format!("invalid number in {token}")))
}

fn parse_date(token: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| UctiError::QueryParse(format!("invalid date in {token}")))
}
