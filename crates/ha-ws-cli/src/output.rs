//! Output formatting: human (default), compact one-liners, or JSON envelopes.
//!
//! Everything is written to a caller-supplied `Write` so handlers print to
//! stdout and tests print to a buffer.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use clap::ValueEnum;
use serde::Serialize;

use ha_ws_core::types::HaState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    #[default]
    Default,
    Compact,
    Json,
}

/// JSON output wrapper.
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "str::is_empty")]
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    fn new(command: &'a str) -> Self {
        Self {
            success: true,
            command,
            data: None,
            count: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub format: Format,
    pub headers: bool,
    /// Prefix timeline lines with their time.
    pub timestamps: bool,
    /// Append `last_updated` ages to state listings.
    pub show_age: bool,
    /// 0 = unlimited.
    pub max_items: usize,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            format: Format::Default,
            headers: true,
            timestamps: true,
            show_age: false,
            max_items: 0,
        }
    }
}

impl Output {
    pub fn is_json(&self) -> bool {
        self.format == Format::Json
    }

    /// A one-line status message.
    pub fn message(&self, w: &mut dyn Write, command: &str, msg: &str) -> Result<()> {
        if self.is_json() {
            let env = Envelope::<()> {
                message: Some(msg),
                ..Envelope::new(command)
            };
            writeln!(w, "{}", serde_json::to_string(&env)?)?;
        } else {
            writeln!(w, "{msg}")?;
        }
        Ok(())
    }

    /// An arbitrary value: pretty JSON by default, single-line JSON in
    /// compact mode, wrapped in an envelope for `--output json`.
    pub fn data<T: Serialize>(&self, w: &mut dyn Write, command: &str, data: &T) -> Result<()> {
        match self.format {
            Format::Json => {
                let env = Envelope {
                    data: Some(data),
                    ..Envelope::new(command)
                };
                writeln!(w, "{}", serde_json::to_string(&env)?)?;
            }
            Format::Compact => writeln!(w, "{}", serde_json::to_string(data)?)?,
            Format::Default => writeln!(w, "{}", serde_json::to_string_pretty(data)?)?,
        }
        Ok(())
    }

    /// A titled list, one `line` per item, truncated to `max_items`. JSON
    /// output always carries every item and the full count.
    pub fn list<T, F>(
        &self,
        w: &mut dyn Write,
        command: &str,
        title: &str,
        items: &[T],
        line: F,
    ) -> Result<()>
    where
        T: Serialize,
        F: Fn(&T) -> String,
    {
        let count = items.len();
        if self.is_json() {
            let env = Envelope {
                data: Some(&items),
                count: Some(count),
                ..Envelope::new(command)
            };
            writeln!(w, "{}", serde_json::to_string(&env)?)?;
            return Ok(());
        }

        let shown = match self.max_items {
            0 => count,
            n => n.min(count),
        };
        let compact = self.format == Format::Compact;

        if self.headers {
            if compact {
                writeln!(w, "{title}: {count}")?;
            } else {
                writeln!(w, "{title}: {count}\n")?;
            }
        }
        for item in &items[..shown] {
            writeln!(w, "{}", line(item))?;
        }
        if shown < count {
            if compact {
                writeln!(w, "+{} more", count - shown)?;
            } else {
                writeln!(w, "\n... and {} more", count - shown)?;
            }
        }
        Ok(())
    }

    /// A single entity state.
    pub fn entity(&self, w: &mut dyn Write, state: &HaState) -> Result<()> {
        match self.format {
            Format::Compact => {
                writeln!(w, "{}={}", state.entity_id, state.state)?;
                Ok(())
            }
            _ => self.data(w, "state", state),
        }
    }

    /// A timeline line: `body` prefixed with its time unless timestamps are
    /// off. A missing time renders as `-`.
    pub fn stamped(&self, at: Option<DateTime<Utc>>, body: &str) -> String {
        if !self.timestamps {
            return body.to_string();
        }
        let when = at.map(|at| self.time(at)).unwrap_or_else(|| "-".to_string());
        match self.format {
            Format::Compact => format!("{when} {body}"),
            _ => format!("{when}  {body}"),
        }
    }

    /// Render a timestamp: RFC 3339 in compact mode, local wall-clock time
    /// otherwise.
    pub fn time(&self, at: DateTime<Utc>) -> String {
        match self.format {
            Format::Default => at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            _ => at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Seconds since the Unix epoch (as sent in compressed history rows).
pub fn from_epoch(secs: f64) -> Option<DateTime<Utc>> {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    Utc.timestamp_opt(whole as i64, nanos).single()
}

/// Parse an RFC 3339 timestamp as sent by the hub.
pub fn parse_time(timestamp: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// Short age of an RFC 3339 timestamp relative to `now`: `42s`, `5m`, `3h`, `2d`.
pub fn age(timestamp: &str, now: DateTime<Utc>) -> Option<String> {
    let then = parse_time(timestamp)?;
    let secs = (now - then).num_seconds().max(0);
    Some(match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn render(out: Output, f: impl FnOnce(&Output, &mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&out, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn out(format: Format) -> Output {
        Output {
            format,
            ..Default::default()
        }
    }

    fn states() -> Vec<HaState> {
        ["light.a", "light.b", "light.c"]
            .iter()
            .map(|id| serde_json::from_value(json!({"entity_id": id, "state": "on"})).unwrap())
            .collect()
    }

    #[test]
    fn list_default_truncates_with_footer() {
        let o = Output {
            max_items: 2,
            ..Default::default()
        };
        let text = render(o, |o, w| {
            o.list(w, "states", "States", &states(), |s| s.entity_id.clone())
        });
        assert_eq!(text, "States: 3\n\nlight.a\nlight.b\n\n... and 1 more\n");
    }

    #[test]
    fn list_compact_without_headers() {
        let o = Output {
            format: Format::Compact,
            headers: false,
            max_items: 1,
            ..Default::default()
        };
        let text = render(o, |o, w| {
            o.list(w, "states", "States", &states(), |s| s.entity_id.clone())
        });
        assert_eq!(text, "light.a\n+2 more\n");
    }

    #[test]
    fn list_json_keeps_every_item() {
        let o = Output {
            format: Format::Json,
            max_items: 1,
            ..Default::default()
        };
        let text = render(o, |o, w| {
            o.list(w, "states", "States", &states(), |s| s.entity_id.clone())
        });
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["command"], "states");
        assert_eq!(v["count"], 3);
        assert_eq!(v["data"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn entity_formats() {
        let state = &states()[0];
        assert_eq!(
            render(out(Format::Compact), |o, w| o.entity(w, state)),
            "light.a=on\n"
        );
        let v: Value =
            serde_json::from_str(&render(out(Format::Json), |o, w| o.entity(w, state))).unwrap();
        assert_eq!(v["data"]["state"], "on");
        let v: Value =
            serde_json::from_str(&render(out(Format::Default), |o, w| o.entity(w, state)))
                .unwrap();
        assert_eq!(v["entity_id"], "light.a");
    }

    #[test]
    fn message_formats() {
        assert_eq!(
            render(out(Format::Default), |o, w| o.message(w, "ping", "pong")),
            "pong\n"
        );
        assert_eq!(
            render(out(Format::Json), |o, w| o.message(w, "ping", "pong")),
            "{\"success\":true,\"command\":\"ping\",\"message\":\"pong\"}\n"
        );
    }

    #[test]
    fn compact_time_is_rfc3339() {
        let at = from_epoch(1_704_067_200.5).unwrap();
        assert_eq!(out(Format::Compact).time(at), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn stamped_lines() {
        let at = from_epoch(1_704_067_200.0);
        assert_eq!(out(Format::Compact).stamped(at, "on"), "2024-01-01T00:00:00Z on");
        assert_eq!(out(Format::Compact).stamped(None, "off"), "- off");

        let bare = Output {
            timestamps: false,
            ..Default::default()
        };
        assert_eq!(bare.stamped(at, "on"), "on");
    }

    #[test]
    fn ages() {
        let now = DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(age("2024-01-01T23:59:18Z", now).as_deref(), Some("42s"));
        assert_eq!(age("2024-01-01T23:55:00+00:00", now).as_deref(), Some("5m"));
        assert_eq!(age("2024-01-01T21:00:00Z", now).as_deref(), Some("3h"));
        assert_eq!(age("2023-12-30T00:00:00Z", now).as_deref(), Some("3d"));
        assert_eq!(age("yesterday", now), None);
    }
}
