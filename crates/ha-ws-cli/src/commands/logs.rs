//! `ha-ws syslog` and `ha-ws context`: what went wrong, and what caused what.

use std::io;

use anyhow::{Context as _, Result};

use ha_ws_client::api;
use ha_ws_client::HaClient;
use ha_ws_core::types::{HaContext, HaState, SysLogEntry};

use crate::output::{self, Format, Output};

/// `ha-ws syslog`: warnings and errors the hub has logged.
pub async fn syslog(client: &HaClient, out: &Output) -> Result<()> {
    let entries = api::system_log(client)
        .await
        .context("failed to fetch system log")?;
    out.list(
        &mut io::stdout().lock(),
        "syslog",
        "System log entries",
        &entries,
        |e| syslog_line(out, e),
    )
}

fn syslog_line(out: &Output, e: &SysLogEntry) -> String {
    let repeated = match e.count {
        0 | 1 => String::new(),
        n => format!(" (x{n})"),
    };
    let (level, source, message) = (&e.level, e.source_text(), e.message_text());
    let body = match out.format {
        Format::Compact => format!("[{level}] {source}: {message}{repeated}"),
        _ => format!("[{level}] {source}{repeated}\n  {message}"),
    };
    out.stamped(output::from_epoch(e.timestamp), &body)
}

/// What `context` found for its argument.
#[derive(Debug, PartialEq)]
struct Related<'a> {
    context_id: String,
    /// Set when the argument named an entity.
    target: Option<&'a HaState>,
    matches: Vec<&'a HaState>,
}

/// States sharing the context of `arg`, which is either an entity id or a
/// context id. States caused by the target's parent context count too.
fn related<'a>(states: &'a [HaState], arg: &str) -> Related<'a> {
    let target = states.iter().find(|s| s.entity_id == arg);
    let target_context = target.and_then(|t| t.context.as_ref());
    let context_id = target_context.map_or_else(|| arg.to_string(), |c| c.id.clone());

    let mut matches: Vec<&HaState> = states
        .iter()
        .filter(|s| {
            s.context.as_ref().is_some_and(|c| {
                c.id == context_id || c.parent_id.as_deref() == Some(context_id.as_str())
            })
        })
        .collect();

    if let Some(parent) = target_context.and_then(|c| c.parent_id.as_deref()) {
        for s in states {
            let in_parent = s.context.as_ref().is_some_and(|c| c.id == parent);
            if in_parent && !matches.iter().any(|m| m.entity_id == s.entity_id) {
                matches.push(s);
            }
        }
    }

    Related {
        context_id,
        target,
        matches,
    }
}

fn context_suffix(context: Option<&HaContext>) -> String {
    match context {
        Some(HaContext {
            id,
            parent_id: Some(parent),
            ..
        }) => format!(" (context: {id}, parent: {parent})"),
        Some(c) => format!(" (context: {})", c.id),
        None => String::new(),
    }
}

/// `ha-ws context <entity_id|context_id>`.
pub async fn context(client: &HaClient, out: &Output, arg: &str) -> Result<()> {
    let states = api::get_states(client)
        .await
        .context("failed to fetch states")?;
    let found = related(&states, arg);
    let mut w = io::stdout().lock();

    if found.matches.is_empty() {
        let msg = match found.target {
            Some(_) => format!(
                "No related state changes found for {arg} (context {}). \
                 Try 'logbook {arg}' to see recent history with context.",
                found.context_id
            ),
            None => format!("No states found with context ID: {}", found.context_id),
        };
        return out.message(&mut w, "context", &msg);
    }

    let title = match found.target {
        Some(_) => format!("Related state changes for {arg}"),
        None => format!("States with context {}", found.context_id),
    };
    out.list(&mut w, "context", &title, &found.matches, |s| {
        let suffix = context_suffix(s.context.as_ref());
        match out.format {
            Format::Compact => format!("{} {}{suffix}", s.entity_id, s.state),
            _ => format!("{}: {}{suffix}", s.entity_id, s.state),
        }
    })
}
