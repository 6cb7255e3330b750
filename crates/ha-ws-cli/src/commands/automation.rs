//! Automation traces and configuration: `traces`, the `trace-*` family,
//! `automation-config` and `blueprint-inputs`.

use std::io;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use ha_ws_client::api;
use ha_ws_client::HaClient;
use ha_ws_core::types::{TraceDetail, TraceInfo};

use super::{automation_entity_id, automation_item_id};
use crate::output::{self, Format, Output};
use crate::window::TimeFilter;

fn trace_start(t: &TraceInfo) -> Option<DateTime<Utc>> {
    t.timestamp.as_ref().and_then(|ts| output::parse_time(&ts.start))
}

/// `ha-ws traces [automation_id]`, newest first, limited to runs after
/// `--from` when given.
pub async fn traces(
    client: &HaClient,
    out: &Output,
    filter: &TimeFilter,
    automation_id: Option<&str>,
) -> Result<()> {
    let item_id = automation_id.map(automation_item_id);
    let mut traces = api::trace_list(client, item_id)
        .await
        .context("failed to list traces")?;
    if let Some(from) = filter.from {
        traces.retain(|t| trace_start(t).is_some_and(|at| at > from));
    }
    sort_newest_first(&mut traces);

    if traces.is_empty() {
        if let Some(id) = item_id {
            if let Some(last) = last_triggered(client, id).await {
                return report_untraced(out, &mut io::stdout().lock(), id, &last);
            }
        }
    }

    let title = match item_id {
        Some(id) => format!("Traces for {id}"),
        None => "Traces".to_string(),
    };
    out.list(&mut io::stdout().lock(), "traces", &title, &traces, |t| {
        trace_line(out, t)
    })
}

/// The automation's `last_triggered` attribute, if it has ever run.
async fn last_triggered(client: &HaClient, item_id: &str) -> Option<String> {
    let entity_id = automation_entity_id(item_id);
    let state = api::get_state(client, &entity_id).await.ok()?;
    state
        .attributes
        .get("last_triggered")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// The automation has run but no traces are stored.
fn report_untraced(out: &Output, w: &mut dyn io::Write, item_id: &str, last: &str) -> Result<()> {
    let entity_id = automation_entity_id(item_id);
    if out.is_json() {
        let data = json!({
            "entity_id": entity_id,
            "traces": [],
            "last_triggered": last,
            "message": "No stored traces. Traces may be disabled or cleared.",
        });
        return out.data(w, "traces", &data);
    }
    out.message(
        w,
        "traces",
        &format!(
            "No stored traces for {entity_id}, but it last triggered at {last}. \
             Traces may be disabled or cleared."
        ),
    )
}

fn sort_newest_first(traces: &mut [TraceInfo]) {
    traces.sort_by(|a, b| {
        let start = |t: &TraceInfo| t.timestamp.as_ref().map(|ts| ts.start.clone());
        start(b).cmp(&start(a))
    });
}

fn trace_line(out: &Output, t: &TraceInfo) -> String {
    let start = t.timestamp.as_ref().map(|ts| ts.start.as_str());
    let state = t.state.as_deref().unwrap_or("?");
    let execution = t.script_execution.as_deref().unwrap_or("-");
    match out.format {
        Format::Compact => format!("{} {} {}", t.item_id, t.run_id, start.unwrap_or("")),
        _ => out.stamped(
            trace_start(t),
            &format!("{:<24} {:<26} {state:<10} {execution}", t.item_id, t.run_id),
        ),
    }
}

async fn detail(client: &HaClient, automation_id: &str, run_id: &str) -> Result<TraceDetail> {
    let item_id = automation_item_id(automation_id);
    api::trace_get(client, item_id, run_id)
        .await
        .with_context(|| format!("failed to fetch trace {run_id} of {item_id}"))
}

/// The newest stored run of an automation, if any.
async fn latest_run(client: &HaClient, automation_id: &str) -> Result<Option<TraceInfo>> {
    let mut traces = api::trace_list(client, Some(automation_item_id(automation_id)))
        .await
        .context("failed to list traces")?;
    sort_newest_first(&mut traces);
    Ok(traces.into_iter().next())
}

/// `ha-ws trace <automation_id> <run_id>`: the whole trace.
pub async fn trace(client: &HaClient, out: &Output, automation_id: &str, run_id: &str) -> Result<()> {
    let trace = detail(client, automation_id, run_id).await?;
    out.data(&mut io::stdout().lock(), "trace", &trace)
}

/// `ha-ws trace-debug <automation_id> <run_id>`: the whole trace plus a
/// step timeline and the trigger variables.
pub async fn trace_debug(
    client: &HaClient,
    out: &Output,
    automation_id: &str,
    run_id: &str,
) -> Result<()> {
    let trace = detail(client, automation_id, run_id).await?;
    let data = json!({
        "trace": trace,
        "trigger_variables": trace.trigger_variables(),
        "timeline": timeline_rows(&trace),
    });
    out.data(&mut io::stdout().lock(), "trace-debug", &data)
}

/// `ha-ws trace-latest <automation_id>`.
pub async fn trace_latest(client: &HaClient, out: &Output, automation_id: &str) -> Result<()> {
    let Some(latest) = latest_run(client, automation_id).await? else {
        bail!("no traces found for {}", automation_entity_id(automation_id));
    };
    let trace = detail(client, automation_id, &latest.run_id).await?;
    out.data(&mut io::stdout().lock(), "trace-latest", &trace)
}

#[derive(Debug, Default, PartialEq, Serialize)]
struct Outcomes {
    finished: usize,
    errors: usize,
    other: usize,
}

fn count_outcomes(traces: &[TraceInfo]) -> Outcomes {
    let mut counts = Outcomes::default();
    for t in traces {
        match t.script_execution.as_deref().or(t.state.as_deref()) {
            Some("finished") => counts.finished += 1,
            Some("error") => counts.errors += 1,
            _ => counts.other += 1,
        }
    }
    counts
}

/// `ha-ws trace-summary <automation_id>`: run counts and the latest run.
pub async fn trace_summary(client: &HaClient, out: &Output, automation_id: &str) -> Result<()> {
    let item_id = automation_item_id(automation_id);
    let mut traces = api::trace_list(client, Some(item_id))
        .await
        .context("failed to list traces")?;
    sort_newest_first(&mut traces);
    let Some(latest) = traces.first() else {
        let msg = format!("No traces found for {}", automation_entity_id(item_id));
        return out.message(&mut io::stdout().lock(), "trace-summary", &msg);
    };
    let trace = detail(client, item_id, &latest.run_id).await?;

    let mut summary = json!({
        "automation_id": automation_entity_id(item_id),
        "total_traces": traces.len(),
        "outcomes": count_outcomes(&traces),
        "last_run": {
            "run_id": latest.run_id,
            "state": latest.script_execution,
            "timestamp": latest.timestamp,
        },
        "trigger": trace.trigger,
    });
    if let Some(error) = &trace.error {
        summary["last_error"] = json!(error);
    }
    out.data(&mut io::stdout().lock(), "trace-summary", &summary)
}

#[derive(Debug, PartialEq, Serialize)]
struct VarsRow<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    changed_variables: Option<&'a Map<String, Value>>,
}

/// One row per step that set or changed variables, in execution order.
fn vars_rows(trace: &TraceDetail) -> Vec<VarsRow<'_>> {
    let mut rows = Vec::new();
    for (path, step) in trace.steps() {
        if let Some(vars) = &step.variables {
            rows.push(VarsRow {
                path,
                variables: Some(vars),
                changed_variables: None,
            });
        }
        if let Some(changed) = &step.changed_variables {
            rows.push(VarsRow {
                path,
                variables: None,
                changed_variables: Some(changed),
            });
        }
    }
    rows
}

/// `ha-ws trace-vars <automation_id> <run_id>`.
pub async fn trace_vars(
    client: &HaClient,
    out: &Output,
    automation_id: &str,
    run_id: &str,
) -> Result<()> {
    let trace = detail(client, automation_id, run_id).await?;
    let rows = vars_rows(&trace);
    let title = format!("Variables for trace {run_id}");
    out.list(&mut io::stdout().lock(), "trace-vars", &title, &rows, |r| {
        match (r.variables, r.changed_variables) {
            (Some(v), _) => format!("{} variables: {}", r.path, Value::Object(v.clone())),
            (None, Some(v)) => format!("{} changed: {}", r.path, Value::Object(v.clone())),
            (None, None) => r.path.to_string(),
        }
    })
}

#[derive(Debug, PartialEq, Serialize)]
struct TimelineRow<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a Value>,
}

fn timeline_rows(trace: &TraceDetail) -> Vec<TimelineRow<'_>> {
    trace
        .steps()
        .into_iter()
        .map(|(path, step)| TimelineRow {
            path,
            timestamp: step.timestamp.as_deref(),
            error: step.error.as_ref(),
        })
        .collect()
}

/// `ha-ws trace-timeline <automation_id> <run_id>`: steps in order.
pub async fn trace_timeline(
    client: &HaClient,
    out: &Output,
    automation_id: &str,
    run_id: &str,
) -> Result<()> {
    let trace = detail(client, automation_id, run_id).await?;
    let rows = timeline_rows(&trace);
    let title = format!("Execution timeline for {run_id}");
    out.list(&mut io::stdout().lock(), "trace-timeline", &title, &rows, |r| {
        let error = r.error.map(|e| format!(" ERROR: {e}")).unwrap_or_default();
        let at = r.timestamp.and_then(output::parse_time);
        out.stamped(at, &format!("{}{error}", r.path))
    })
}

/// `ha-ws trace-trigger <automation_id> <run_id>`: what set the run off.
pub async fn trace_trigger(
    client: &HaClient,
    out: &Output,
    automation_id: &str,
    run_id: &str,
) -> Result<()> {
    let trace = detail(client, automation_id, run_id).await?;
    let mut w = io::stdout().lock();
    match (trace.trigger_variables(), &trace.trigger) {
        (Some(vars), _) => out.data(&mut w, "trace-trigger", vars),
        (None, Some(description)) => out.data(&mut w, "trace-trigger", description),
        (None, None) => out.message(&mut w, "trace-trigger", "No trigger information available"),
    }
}

#[derive(Debug, PartialEq, Serialize)]
struct ActionRow<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
}

fn action_rows(trace: &TraceDetail) -> Vec<ActionRow<'_>> {
    trace
        .steps()
        .into_iter()
        .filter(|(path, _)| path.starts_with("action/"))
        .map(|(path, step)| ActionRow {
            path,
            result: step.result.as_ref(),
        })
        .collect()
}

/// `ha-ws trace-actions <automation_id> <run_id>`: each action's result.
pub async fn trace_actions(
    client: &HaClient,
    out: &Output,
    automation_id: &str,
    run_id: &str,
) -> Result<()> {
    let trace = detail(client, automation_id, run_id).await?;
    let rows = action_rows(&trace);
    let title = format!("Actions for trace {run_id}");
    out.list(&mut io::stdout().lock(), "trace-actions", &title, &rows, |a| {
        action_line(out, a)
    })
}

fn action_line(out: &Output, a: &ActionRow) -> String {
    if out.format == Format::Compact {
        return a.path.to_string();
    }
    let result = a
        .result
        .and_then(|r| r.get("response"))
        .filter(|r| !r.is_null())
        .map(Value::to_string)
        .unwrap_or_else(|| "no result".to_string());
    format!("{}: {result}", a.path)
}

/// `ha-ws automation-config <entity_id>`. The newest trace carries the
/// config with blueprint inputs resolved, so it wins when it has a body.
pub async fn automation_config(client: &HaClient, out: &Output, entity_id: &str) -> Result<()> {
    let entity_id = automation_entity_id(entity_id);

    if let Ok(Some(latest)) = latest_run(client, &entity_id).await {
        if let Ok(trace) = detail(client, &entity_id, &latest.run_id).await {
            if let Some(config) = trace.config.filter(|c| c.has_body()) {
                return out.data(&mut io::stdout().lock(), "automation-config", &config);
            }
        }
    }

    let config = api::automation_config(client, &entity_id)
        .await
        .with_context(|| format!("failed to fetch config for {entity_id}"))?;
    if !config.has_body() && config.use_blueprint.is_none() && !out.is_json() {
        eprintln!(
            "Limited config available for {entity_id}. Run it once and use \
             trace-latest to see the resolved config."
        );
    }
    out.data(&mut io::stdout().lock(), "automation-config", &config)
}

/// `ha-ws blueprint-inputs <entity_id>`.
pub async fn blueprint_inputs(client: &HaClient, out: &Output, entity_id: &str) -> Result<()> {
    let entity_id = automation_entity_id(entity_id);
    let config = api::automation_config(client, &entity_id)
        .await
        .with_context(|| format!("failed to fetch config for {entity_id}"))?;

    let mut w = io::stdout().lock();
    match config.use_blueprint {
        Some(blueprint) => {
            let data = json!({ "blueprint_path": blueprint.path, "inputs": blueprint.input });
            out.data(&mut w, "blueprint-inputs", &data)
        }
        None => out.message(
            &mut w,
            "blueprint-inputs",
            &format!("{entity_id} does not report a blueprint; try trace-vars for resolved values"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(run_id: &str, start: &str) -> TraceInfo {
        serde_json::from_value(json!({
            "item_id": "morning_lights",
            "run_id": run_id,
            "state": "stopped",
            "script_execution": "finished",
            "timestamp": {"start": start}
        }))
        .unwrap()
    }

    fn detail_fixture() -> TraceDetail {
        serde_json::from_value(json!({
            "run_id": "r1",
            "trace": {
                "action/0": [{
                    "path": "action/0",
                    "timestamp": "2024-01-01T06:00:02+00:00",
                    "result": {"response": {"ok": true}},
                    "changed_variables": {"brightness": 80}
                }],
                "action/1": [{
                    "path": "action/1",
                    "timestamp": "2024-01-01T06:00:03+00:00",
                    "error": "Service not found"
                }],
                "trigger/0": [{
                    "path": "trigger/0",
                    "timestamp": "2024-01-01T06:00:00+00:00",
                    "variables": {"trigger": {"platform": "time"}}
                }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn newest_first() {
        let mut traces = vec![
            trace("a", "2024-01-01T06:00:00+00:00"),
            trace("c", "2024-01-03T06:00:00+00:00"),
            trace("b", "2024-01-02T06:00:00+00:00"),
        ];
        sort_newest_first(&mut traces);
        let ids: Vec<&str> = traces.iter().map(|t| t.run_id.as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
    }

    #[test]
    fn compact_trace_line() {
        let out = Output {
            format: Format::Compact,
            ..Default::default()
        };
        let t = trace("r1", "2024-01-01T06:00:00+00:00");
        assert_eq!(trace_line(&out, &t), "morning_lights r1 2024-01-01T06:00:00+00:00");
    }

    #[test]
    fn outcome_counts() {
        let mut failed = trace("b", "2024-01-02T06:00:00+00:00");
        failed.script_execution = Some("error".into());
        let mut running = trace("c", "2024-01-03T06:00:00+00:00");
        running.script_execution = None;
        running.state = Some("running".into());

        let counts = count_outcomes(&[trace("a", "2024-01-01T06:00:00+00:00"), failed, running]);
        assert_eq!(
            counts,
            Outcomes {
                finished: 1,
                errors: 1,
                other: 1
            }
        );
    }

    #[test]
    fn vars_follow_execution_order() {
        let d = detail_fixture();
        let rows = vars_rows(&d);
        let paths: Vec<&str> = rows.iter().map(|r| r.path).collect();
        assert_eq!(paths, ["trigger/0", "action/0"]);
        assert!(rows[0].variables.is_some());
        assert_eq!(rows[1].changed_variables.unwrap()["brightness"], 80);
    }

    #[test]
    fn timeline_marks_errors() {
        let d = detail_fixture();
        let rows = timeline_rows(&d);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].path, "trigger/0");
        assert_eq!(rows[2].error, Some(&json!("Service not found")));
    }

    #[test]
    fn action_results() {
        let d = detail_fixture();
        let rows = action_rows(&d);
        assert_eq!(rows.len(), 2);
        assert_eq!(action_line(&Output::default(), &rows[0]), "action/0: {\"ok\":true}");
        assert_eq!(action_line(&Output::default(), &rows[1]), "action/1: no result");
    }
}
