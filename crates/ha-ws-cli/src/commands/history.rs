//! Recorder queries over a time window: `history`, `history-full`, `attrs`,
//! `timeline` and `logbook`.
//!
//! Every window honours the global `--from`/`--to` flags.

use std::io;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;

use ha_ws_client::api;
use ha_ws_client::HaClient;
use ha_ws_core::types::{History, HistoryState, LogbookEntry};

use crate::output::{self, Format, Output};
use crate::window::{TimeFilter, Window};

fn title(what: &str, subject: &str, filter: &TimeFilter, window: &Window) -> String {
    if filter.from.is_some() || filter.to.is_some() {
        format!("{what} for {subject} ({} to {})", window.start_str(), window.end_str())
    } else {
        format!("{what} for {subject} (last {}h)", window.hours())
    }
}

async fn fetch(
    client: &HaClient,
    entity_ids: &[&str],
    window: &Window,
    attributes: bool,
) -> Result<History> {
    let (start, end) = (window.start_str(), window.end_str());
    let history = if attributes {
        api::history_full(client, entity_ids, &start, Some(&end)).await
    } else {
        api::history(client, entity_ids, &start, Some(&end)).await
    };
    history.with_context(|| format!("failed to fetch history for {}", entity_ids.join(", ")))
}

/// `ha-ws history <entity_id> [hours]`.
pub async fn history(
    client: &HaClient,
    out: &Output,
    filter: &TimeFilter,
    entity_id: &str,
    hours: u32,
) -> Result<()> {
    let window = filter.window(Utc::now(), hours)?;
    let rows = fetch(client, &[entity_id], &window, false)
        .await?
        .remove(entity_id)
        .unwrap_or_default();

    let title = title("History", entity_id, filter, &window);
    out.list(&mut io::stdout().lock(), "history", &title, &rows, |row| {
        history_line(out, row)
    })
}

fn row_time(row: &HistoryState) -> Option<chrono::DateTime<Utc>> {
    row.timestamp().and_then(output::from_epoch)
}

fn history_line(out: &Output, row: &HistoryState) -> String {
    out.stamped(row_time(row), &row.state)
}

/// `ha-ws history-full <entity_id> [hours]`: rows with their attributes.
pub async fn history_full(
    client: &HaClient,
    out: &Output,
    filter: &TimeFilter,
    entity_id: &str,
    hours: u32,
) -> Result<()> {
    let window = filter.window(Utc::now(), hours)?;
    let rows = fetch(client, &[entity_id], &window, true)
        .await?
        .remove(entity_id)
        .unwrap_or_default();
    out.data(&mut io::stdout().lock(), "history-full", &rows)
}

/// `ha-ws attrs <entity_id> [hours]`: attribute changes, one line per row.
pub async fn attrs(
    client: &HaClient,
    out: &Output,
    filter: &TimeFilter,
    entity_id: &str,
    hours: u32,
) -> Result<()> {
    let window = filter.window(Utc::now(), hours)?;
    let rows = fetch(client, &[entity_id], &window, true)
        .await?
        .remove(entity_id)
        .unwrap_or_default();

    let title = title("Attribute history", entity_id, filter, &window);
    out.list(&mut io::stdout().lock(), "attrs", &title, &rows, |row| {
        attrs_line(out, row)
    })
}

fn attrs_line(out: &Output, row: &HistoryState) -> String {
    let body = match out.format {
        Format::Compact => row.state.clone(),
        _ => format!("{} {}", row.state, serde_json::Value::Object(row.attributes.clone())),
    };
    out.stamped(row_time(row), &body)
}

#[derive(Debug, Serialize, PartialEq)]
struct TimelineRow {
    entity_id: String,
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    at: Option<f64>,
}

/// Flatten per-entity rows into one list ordered by time.
fn merge_timeline(history: History) -> Vec<TimelineRow> {
    let mut rows: Vec<TimelineRow> = history
        .into_iter()
        .flat_map(|(entity_id, states)| {
            states.into_iter().map(move |s| TimelineRow {
                entity_id: entity_id.clone(),
                at: s.timestamp(),
                state: s.state,
            })
        })
        .collect();
    rows.sort_by(|a, b| a.at.unwrap_or(0.0).total_cmp(&b.at.unwrap_or(0.0)));
    rows
}

/// `ha-ws timeline <hours> <entity>...`: several entities interleaved.
pub async fn timeline(
    client: &HaClient,
    out: &Output,
    filter: &TimeFilter,
    hours: u32,
    entity_ids: &[String],
) -> Result<()> {
    if entity_ids.is_empty() {
        bail!("timeline needs at least one entity");
    }
    let window = filter.window(Utc::now(), hours)?;
    let ids: Vec<&str> = entity_ids.iter().map(String::as_str).collect();
    let rows = merge_timeline(fetch(client, &ids, &window, false).await?);

    let title = format!("Timeline for {} entities", ids.len());
    out.list(&mut io::stdout().lock(), "timeline", &title, &rows, |row| {
        let body = match out.format {
            Format::Compact => format!("{} {}", row.entity_id, row.state),
            _ => format!("{} = {}", row.entity_id, row.state),
        };
        out.stamped(row.at.and_then(output::from_epoch), &body)
    })
}

/// `ha-ws logbook <entity_id> [hours]`.
pub async fn logbook(
    client: &HaClient,
    out: &Output,
    filter: &TimeFilter,
    entity_id: &str,
    hours: u32,
) -> Result<()> {
    let window = filter.window(Utc::now(), hours)?;
    let entries = api::logbook(client, &[entity_id], &window.start_str(), Some(&window.end_str()))
        .await
        .with_context(|| format!("failed to fetch logbook for {entity_id}"))?;

    let title = title("Logbook", entity_id, filter, &window);
    out.list(&mut io::stdout().lock(), "logbook", &title, &entries, |e| {
        logbook_line(out, e)
    })
}

fn logbook_line(out: &Output, e: &LogbookEntry) -> String {
    let state = e.state.as_deref().unwrap_or("");
    let message = e.message.as_deref().unwrap_or("");
    let mut body = match out.format {
        Format::Compact => format!("{state} {message}"),
        _ => format!("{state} - {message}"),
    };
    if let Some(cause) = &e.context_entity_id {
        body.push_str(&format!(" (by {cause})"));
    }
    out.stamped(output::from_epoch(e.when), body.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compact() -> Output {
        Output {
            format: Format::Compact,
            ..Default::default()
        }
    }

    #[test]
    fn compact_history_line() {
        let row: HistoryState =
            serde_json::from_value(json!({"s": "on", "lu": 1704067200.0})).unwrap();
        assert_eq!(history_line(&compact(), &row), "2024-01-01T00:00:00Z on");

        let bare: HistoryState = serde_json::from_value(json!({"s": "off"})).unwrap();
        assert_eq!(history_line(&compact(), &bare), "- off");
    }

    #[test]
    fn attrs_lines_carry_attributes() {
        let row: HistoryState = serde_json::from_value(json!({
            "s": "on", "a": {"brightness": 128}, "lu": 1704067200.0
        }))
        .unwrap();
        assert_eq!(attrs_line(&compact(), &row), "2024-01-01T00:00:00Z on");

        let bare = Output {
            timestamps: false,
            ..Default::default()
        };
        assert_eq!(attrs_line(&bare, &row), "on {\"brightness\":128}");
    }

    #[test]
    fn timeline_interleaves_by_time() {
        let history: History = serde_json::from_value(json!({
            "light.a": [{"s": "on", "lu": 10.0}, {"s": "off", "lu": 30.0}],
            "light.b": [{"s": "on", "lu": 20.0}]
        }))
        .unwrap();
        let rows = merge_timeline(history);
        let order: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.entity_id.as_str(), r.state.as_str()))
            .collect();
        assert_eq!(order, [("light.a", "on"), ("light.b", "on"), ("light.a", "off")]);
    }

    #[test]
    fn logbook_lines_name_the_cause() {
        let e: LogbookEntry = serde_json::from_value(json!({
            "when": 1704067200.0,
            "state": "on",
            "message": "turned on",
            "context_entity_id": "automation.morning"
        }))
        .unwrap();
        assert_eq!(
            logbook_line(&compact(), &e),
            "2024-01-01T00:00:00Z on turned on (by automation.morning)"
        );
    }

    #[test]
    fn titles_follow_the_flags() {
        let now = crate::window::parse_when("2024-01-02T00:00:00Z").unwrap();
        let trailing = TimeFilter::default();
        let w = trailing.window(now, 6).unwrap();
        assert_eq!(title("History", "sun.sun", &trailing, &w), "History for sun.sun (last 6h)");

        let pinned = TimeFilter::parse(Some("2024-01-01"), None).unwrap();
        let w = pinned.window(now, 6).unwrap();
        assert_eq!(
            title("History", "sun.sun", &pinned, &w),
            "History for sun.sun (2024-01-01T00:00:00Z to 2024-01-02T00:00:00Z)"
        );
    }
}
