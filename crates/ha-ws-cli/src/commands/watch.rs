//! Streaming commands: `watch`, `monitor`, `monitor-multi` and `template`.
//!
//! Subscription callbacks run on the client's delivery task; they only
//! forward events over a channel and all printing happens here.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use ha_ws_client::api;
use ha_ws_client::{HaClient, Subscription};
use ha_ws_core::types::SubscriptionEvent;

use crate::batch;
use crate::output::{Format, Output};

/// Why a stream loop stopped.
#[derive(Debug, PartialEq, Eq)]
enum Stop {
    Deadline,
    Interrupted,
    Closed,
    Done,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Drain `rx` until `handle` says stop, the deadline passes, Ctrl-C, or the
/// connection closes.
async fn pump<T, F>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    seconds: u64,
    mut handle: F,
) -> Result<Stop>
where
    F: FnMut(T) -> Result<bool>,
{
    let deadline = (seconds > 0).then(|| Instant::now() + Duration::from_secs(seconds));
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    if !handle(event)? {
                        return Ok(Stop::Done);
                    }
                }
                None => return Ok(Stop::Closed),
            },
            _ = sleep_until(deadline) => return Ok(Stop::Deadline),
            _ = tokio::signal::ctrl_c() => return Ok(Stop::Interrupted),
        }
    }
}

async fn finish(sub: Subscription, stop: Stop) -> Result<()> {
    debug!(id = sub.id(), ?stop, "stream finished");
    if stop == Stop::Closed {
        bail!("connection closed by hub");
    }
    sub.cancel().await.context("failed to unsubscribe")?;
    Ok(())
}

async fn finish_all(subs: Vec<Subscription>, stop: Stop) -> Result<()> {
    debug!(count = subs.len(), ?stop, "streams finished");
    if stop == Stop::Closed {
        bail!("connection closed by hub");
    }
    for sub in subs {
        sub.cancel().await.context("failed to unsubscribe")?;
    }
    Ok(())
}

/// `ha-ws watch <entity_id> [seconds]`: print state changes as they happen.
pub async fn watch(client: &HaClient, out: &Output, entity_id: &str, seconds: u64) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = api::watch_entity(client, entity_id, move |event| {
        let _ = tx.send(event);
    })
    .await
    .with_context(|| format!("failed to watch {entity_id}"))?;

    if out.headers && !out.is_json() {
        let span = match seconds {
            0 => "until Ctrl-C".to_string(),
            s => format!("for {s}s"),
        };
        println!("Watching {entity_id} {span}");
    }

    let mut changes = 0usize;
    let stop = pump(&mut rx, seconds, |event| {
        let mut w = io::stdout().lock();
        if out.is_json() {
            out.data(&mut w, "watch", &event)?;
        } else if let Some(line) = change_line(out, entity_id, &event, Utc::now()) {
            writeln!(w, "{line}")?;
        } else {
            warn!("trigger event without a state change");
            return Ok(true);
        }
        w.flush()?;
        changes += 1;
        Ok(true)
    })
    .await?;

    if out.headers && !out.is_json() {
        println!("{changes} change(s)");
    }
    finish(sub, stop).await
}

fn state_of(trigger: &serde_json::Map<String, Value>, key: &str) -> String {
    trigger
        .get(key)
        .and_then(|s| s.get("state"))
        .and_then(Value::as_str)
        .unwrap_or("-")
        .to_string()
}

fn change_line(
    out: &Output,
    entity_id: &str,
    event: &SubscriptionEvent,
    now: DateTime<Utc>,
) -> Option<String> {
    let trigger = event.trigger()?;
    let from = state_of(trigger, "from_state");
    let to = state_of(trigger, "to_state");
    Some(match out.format {
        Format::Compact => format!("{entity_id} {from}->{to}"),
        _ => format!("[{}] {entity_id}: {from} -> {to}", out.time(now)),
    })
}

/// One observed change, as printed by `monitor`.
#[derive(Debug, Serialize, PartialEq)]
struct Change {
    timestamp: String,
    entity_id: String,
    from_state: String,
    to_state: String,
    change_num: usize,
}

fn change(
    entity_id: &str,
    event: &SubscriptionEvent,
    n: usize,
    now: DateTime<Utc>,
) -> Option<Change> {
    let trigger = event.trigger()?;
    Some(Change {
        timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        entity_id: entity_id.to_string(),
        from_state: state_of(trigger, "from_state"),
        to_state: state_of(trigger, "to_state"),
        change_num: n,
    })
}

fn monitor_line(out: &Output, c: &Change, now: DateTime<Utc>, name_entity: bool) -> String {
    let entity = if name_entity {
        format!(" {}", c.entity_id)
    } else {
        String::new()
    };
    let (n, from, to) = (c.change_num, &c.from_state, &c.to_state);
    match out.format {
        Format::Compact => format!("{n} {} {from}->{to}", c.entity_id),
        _ if out.timestamps => format!("[{n}] {}{entity}: {from} -> {to}", out.time(now)),
        _ => format!("[{n}]{entity}: {from} -> {to}"),
    }
}

/// `ha-ws monitor <entity_id> [seconds]` and `ha-ws monitor-multi
/// <entity>... [seconds]`: numbered state changes across one or more
/// entities. Subscriptions are set up concurrently; entities that fail to
/// subscribe are reported and the rest are still monitored.
pub async fn monitor(
    client: &HaClient,
    out: &Output,
    entity_ids: Vec<String>,
    seconds: u64,
) -> Result<()> {
    if entity_ids.is_empty() {
        bail!("monitor needs at least one entity");
    }
    let total = entity_ids.len();
    let multi = total > 1;
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, SubscriptionEvent)>();

    let outcomes = batch::run_all(entity_ids, 0, |entity_id| {
        let tx = tx.clone();
        async move {
            let key = entity_id.clone();
            let sub = api::watch_entity(client, &entity_id, move |event| {
                let _ = tx.send((key.clone(), event));
            })
            .await
            .with_context(|| format!("failed to subscribe to {entity_id}"))?;
            Ok(sub)
        }
    })
    .await;
    drop(tx);

    let (subscribed, failed) = batch::partition(outcomes);
    for (entity_id, e) in &failed {
        warn!(entity_id = %entity_id, "subscribe failed: {:#}", e);
    }
    if subscribed.is_empty() {
        bail!("failed to subscribe to any entities");
    }
    let subs: Vec<Subscription> = subscribed.into_iter().map(|(_, sub)| sub).collect();

    let chatty = out.headers && !out.is_json();
    if chatty {
        let span = match seconds {
            0 => "until Ctrl-C".to_string(),
            s => format!("for {s}s"),
        };
        println!("Monitoring {}/{total} entities {span}", subs.len());
    }

    let mut changes = 0usize;
    let stop = pump(&mut rx, seconds, |(entity_id, event)| {
        let now = Utc::now();
        let Some(c) = change(&entity_id, &event, changes + 1, now) else {
            return Ok(true);
        };
        changes += 1;
        let mut w = io::stdout().lock();
        if out.is_json() {
            out.data(&mut w, "monitor", &c)?;
        } else {
            writeln!(w, "{}", monitor_line(out, &c, now, multi))?;
        }
        w.flush()?;
        Ok(true)
    })
    .await?;

    if chatty {
        println!("Monitoring complete. {changes} state change(s) observed.");
    }
    finish_all(subs, stop).await
}

/// `ha-ws template <template|-> [seconds]`: render once, or keep printing
/// re-renders for `seconds`. `-` reads the template from stdin.
pub async fn template(client: &HaClient, out: &Output, template: &str, seconds: u64) -> Result<()> {
    let template = super::arg_or_stdin(template)?;
    if template.trim().is_empty() {
        bail!("template is empty");
    }
    let template = template.as_str();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = api::render_template(client, template, move |event| {
        let _ = tx.send(event);
    })
    .await
    .context("failed to render template")?;

    let mut renders = 0usize;
    let stop = pump(&mut rx, seconds, |event| {
        if let Some(error) = &event.error {
            if renders == 0 {
                bail!("template error: {error}");
            }
            warn!("template error: {}", error);
            return Ok(true);
        }
        let Some(result) = event.result else {
            return Ok(true);
        };
        renders += 1;

        let mut w = io::stdout().lock();
        if out.is_json() {
            out.data(&mut w, "template", &result)?;
        } else {
            writeln!(w, "{}", rendered(&result))?;
        }
        w.flush()?;
        Ok(seconds > 0)
    })
    .await;

    // Unsubscribe even when the first render failed.
    let stop = match stop {
        Ok(stop) => stop,
        Err(e) => {
            let _ = sub.cancel().await;
            return Err(e);
        }
    };
    finish(sub, stop).await
}

/// Strings print bare; anything else as JSON.
fn rendered(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
