//! Time windows for history-style queries.
//!
//! A window ends at `--to` (or now) and starts at `--from`, or `hours`
//! before the end when `--from` is not given.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Accepted forms for `--from`/`--to`. Values without an offset are UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse a user-supplied time: RFC 3339, `YYYY-MM-DD[ HH:MM[:SS]]`, or
/// `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_when(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Ok(at.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(at) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Utc.from_utc_datetime(&at));
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = day.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }
    bail!("unable to parse date: {text}")
}

/// The `--from`/`--to` flags, parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeFilter {
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self> {
        let parse = |flag: &str, value: Option<&str>| -> Result<Option<DateTime<Utc>>> {
            value
                .map(|v| parse_when(v).map_err(|e| anyhow::anyhow!("invalid --{flag} value: {e}")))
                .transpose()
        };
        Ok(Self {
            from: parse("from", from)?,
            to: parse("to", to)?,
        })
    }

    /// The window for a query defaulting to the last `hours` hours.
    pub fn window(&self, now: DateTime<Utc>, hours: u32) -> Result<Window> {
        let end = self.to.unwrap_or(now);
        let start = match self.from {
            Some(from) => from,
            None if hours == 0 => bail!("hours must be at least 1"),
            None => end - Duration::hours(i64::from(hours)),
        };
        if start >= end {
            bail!("empty time window: start is not before end");
        }
        Ok(Window { start, end })
    }
}

/// A closed time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn start_str(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn end_str(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Whole hours covered, for titles.
    pub fn hours(&self) -> i64 {
        (self.end - self.start).num_hours()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        parse_when(s).unwrap()
    }

    #[test]
    fn flexible_dates() {
        assert_eq!(at("2024-01-02").to_rfc3339(), "2024-01-02T00:00:00+00:00");
        assert_eq!(at("2024-01-02 06:30").to_rfc3339(), "2024-01-02T06:30:00+00:00");
        assert_eq!(at("2024-01-02 06:30:15").to_rfc3339(), "2024-01-02T06:30:15+00:00");
        assert_eq!(at("2024-01-02T06:30:15").to_rfc3339(), "2024-01-02T06:30:15+00:00");
        assert_eq!(at("2024-01-02T08:30:15+02:00").to_rfc3339(), "2024-01-02T06:30:15+00:00");
        assert!(parse_when("yesterday").is_err());
    }

    #[test]
    fn window_defaults_to_trailing_hours() {
        let now = at("2024-01-02T06:30:15Z");
        let w = TimeFilter::default().window(now, 24).unwrap();
        assert_eq!(w.start_str(), "2024-01-01T06:30:15Z");
        assert_eq!(w.end_str(), "2024-01-02T06:30:15Z");
        assert_eq!(w.hours(), 24);
        assert!(TimeFilter::default().window(now, 0).is_err());
    }

    #[test]
    fn flags_override_hours() {
        let now = at("2024-01-05T00:00:00Z");
        let filter = TimeFilter::parse(Some("2024-01-01"), Some("2024-01-02 12:00")).unwrap();
        let w = filter.window(now, 1).unwrap();
        assert_eq!(w.start_str(), "2024-01-01T00:00:00Z");
        assert_eq!(w.end_str(), "2024-01-02T12:00:00Z");

        // `--to` alone moves the end; hours still count back from it.
        let filter = TimeFilter::parse(None, Some("2024-01-02")).unwrap();
        assert_eq!(filter.window(now, 2).unwrap().start_str(), "2024-01-01T22:00:00Z");
    }

    #[test]
    fn bad_flags_are_reported() {
        let err = TimeFilter::parse(Some("soon"), None).unwrap_err();
        assert!(err.to_string().contains("invalid --from value"));

        let backwards = TimeFilter::parse(Some("2024-01-03"), Some("2024-01-02")).unwrap();
        assert!(backwards.window(Utc::now(), 24).is_err());
    }
}
