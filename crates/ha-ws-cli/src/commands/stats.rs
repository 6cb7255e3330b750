//! Long-term statistics and state analysis: `stats`, `stats-multi`, `analyze`.

use std::collections::BTreeMap;
use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use ha_ws_client::api;
use ha_ws_client::HaClient;
use ha_ws_core::types::{HistoryState, StatEntry};

use crate::batch;
use crate::output::{self, Format, Output};
use crate::window::{TimeFilter, Window};

/// Bucket size asked of the recorder.
const PERIOD: &str = "hour";

/// At most this many statistics requests in flight.
const STATS_CONCURRENCY: usize = 10;

async fn fetch(client: &HaClient, entity_id: &str, window: &Window) -> Result<Vec<StatEntry>> {
    let mut stats = api::statistics(
        client,
        &[entity_id],
        &window.start_str(),
        Some(&window.end_str()),
        PERIOD,
    )
    .await
    .with_context(|| format!("failed to fetch statistics for {entity_id}"))?;
    Ok(stats.remove(entity_id).unwrap_or_default())
}

fn bucket_time(e: &StatEntry) -> Option<DateTime<Utc>> {
    match &e.start {
        Value::String(s) => output::parse_time(s),
        _ => e.start_secs().and_then(output::from_epoch),
    }
}

fn num(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".to_string())
}

fn stat_line(out: &Output, e: &StatEntry) -> String {
    let (min, max, mean) = (num(e.min), num(e.max), num(e.mean));
    let body = match out.format {
        Format::Compact => format!("min={min} max={max} mean={mean}"),
        _ => format!("min={min}, max={max}, mean={mean}"),
    };
    out.stamped(bucket_time(e), &body)
}

/// `ha-ws stats <entity_id> [hours]`: hourly min/max/mean.
pub async fn stats(
    client: &HaClient,
    out: &Output,
    filter: &TimeFilter,
    entity_id: &str,
    hours: u32,
) -> Result<()> {
    let window = filter.window(Utc::now(), hours)?;
    let entries = fetch(client, entity_id, &window).await?;

    let mut w = io::stdout().lock();
    if entries.is_empty() {
        return out.message(&mut w, "stats", &format!("No statistics found for {entity_id}"));
    }
    let title = format!("Statistics for {entity_id}");
    out.list(&mut w, "stats", &title, &entries, |e| stat_line(out, e))
}

/// Aggregate over every bucket of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub entity_id: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sum: f64,
    pub data_points: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn summarize(entity_id: &str, entries: &[StatEntry]) -> Result<StatsSummary> {
    if entries.is_empty() {
        bail!("no statistics found");
    }
    let means: Vec<f64> = entries.iter().filter_map(|e| e.mean).collect();
    Ok(StatsSummary {
        entity_id: entity_id.to_string(),
        min: entries.iter().filter_map(|e| e.min).reduce(f64::min).unwrap_or(0.0),
        max: entries.iter().filter_map(|e| e.max).reduce(f64::max).unwrap_or(0.0),
        mean: if means.is_empty() {
            0.0
        } else {
            means.iter().sum::<f64>() / means.len() as f64
        },
        sum: entries.iter().filter_map(|e| e.sum).sum(),
        data_points: entries.len(),
        error: None,
    })
}

/// `ha-ws stats-multi <entity>... [hours]`: one summary per entity, fetched
/// concurrently. Entities that fail are reported alongside the rest.
pub async fn stats_multi(
    client: &HaClient,
    out: &Output,
    filter: &TimeFilter,
    entity_ids: Vec<String>,
    hours: u32,
) -> Result<()> {
    if entity_ids.is_empty() {
        bail!("stats-multi needs at least one entity");
    }
    let window = filter.window(Utc::now(), hours)?;
    let total = entity_ids.len();

    let outcomes = batch::run_all(entity_ids, STATS_CONCURRENCY, move |entity_id| async move {
        let entries = fetch(client, &entity_id, &window).await?;
        summarize(&entity_id, &entries)
    })
    .await;
    let (ok, failed) = batch::partition(outcomes);
    let successful = ok.len();

    let mut summaries: Vec<StatsSummary> = ok.into_iter().map(|(_, s)| s).collect();
    summaries.extend(failed.iter().map(|(entity_id, e)| StatsSummary {
        entity_id: entity_id.clone(),
        min: 0.0,
        max: 0.0,
        mean: 0.0,
        sum: 0.0,
        data_points: 0,
        error: Some(format!("{e:#}")),
    }));
    summaries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

    let mut w = io::stdout().lock();
    if out.is_json() {
        let data = json!({
            "entities": summaries,
            "hours": window.hours(),
            "successful": successful,
            "failed": failed.len(),
        });
        return out.data(&mut w, "stats-multi", &data);
    }

    if out.headers {
        writeln!(w, "Statistics summary ({}h): {successful}/{total} entities\n", window.hours())?;
    }
    for s in &summaries {
        writeln!(w, "{}", summary_line(out, s))?;
    }
    Ok(())
}

fn summary_line(out: &Output, s: &StatsSummary) -> String {
    if let Some(error) = &s.error {
        return format!("{}: ERROR - {error}", s.entity_id);
    }
    match out.format {
        Format::Compact => format!(
            "{} min={:.2} max={:.2} mean={:.2} sum={:.2} n={}",
            s.entity_id, s.min, s.max, s.mean, s.sum, s.data_points
        ),
        _ => format!(
            "{}:\n  min={:.2}, max={:.2}, mean={:.2}, sum={:.2} ({} data points)",
            s.entity_id, s.min, s.max, s.mean, s.sum, s.data_points
        ),
    }
}

/// How often each state occurs in `rows`.
fn distribution(rows: &[HistoryState]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row.state.clone()).or_insert(0) += 1;
    }
    counts
}

#[derive(Serialize)]
struct Analysis<'a> {
    entity_id: &'a str,
    current_state: &'a str,
    attributes: &'a Map<String, Value>,
    history_hours: i64,
    state_changes: usize,
    state_distribution: BTreeMap<String, usize>,
}

/// `ha-ws analyze <entity_id>`: current state plus how it has been spread
/// over the last day.
pub async fn analyze(
    client: &HaClient,
    out: &Output,
    filter: &TimeFilter,
    entity_id: &str,
) -> Result<()> {
    let state = api::get_state(client, entity_id).await?;
    let window = filter.window(Utc::now(), 24)?;
    let rows = api::history(
        client,
        &[entity_id],
        &window.start_str(),
        Some(&window.end_str()),
    )
    .await
    .with_context(|| format!("failed to fetch history for {entity_id}"))?
    .remove(entity_id)
    .unwrap_or_default();

    let analysis = Analysis {
        entity_id,
        current_state: &state.state,
        attributes: &state.attributes,
        history_hours: window.hours(),
        state_changes: rows.len(),
        state_distribution: distribution(&rows),
    };
    out.data(&mut io::stdout().lock(), "analyze", &analysis)
}
