//! One-shot queries: `ping`, `state`, `states`, `states-json`,
//! `states-filter`, `config`, `services`, `call`.

use std::io::{self, Write};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use ha_ws_client::api;
use ha_ws_client::HaClient;
use ha_ws_core::types::{HaState, ServiceMap};

use crate::output::{self, Output};

/// `ha-ws ping`: round-trip latency.
pub async fn ping(client: &HaClient, out: &Output) -> Result<()> {
    let started = Instant::now();
    api::ping(client).await.context("ping failed")?;
    let elapsed = started.elapsed();
    debug!(?elapsed, "pong");

    out.message(
        &mut io::stdout().lock(),
        "ping",
        &format!("pong ({} ms)", elapsed.as_millis()),
    )
}

/// `ha-ws state <entity_id>`.
pub async fn state(client: &HaClient, out: &Output, entity_id: &str) -> Result<()> {
    let state = api::get_state(client, entity_id).await?;
    out.entity(&mut io::stdout().lock(), &state)
}

/// `ha-ws states [domain]`: every entity, optionally one domain.
pub async fn states(client: &HaClient, out: &Output, domain: Option<&str>) -> Result<()> {
    let mut states = api::get_states(client)
        .await
        .context("failed to fetch states")?;
    if let Some(domain) = domain {
        states.retain(|s| s.domain() == domain);
    }
    states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

    let now = Utc::now();
    let title = match domain {
        Some(d) => format!("States ({d})"),
        None => "States".to_string(),
    };
    out.list(&mut io::stdout().lock(), "states", &title, &states, |s| {
        state_line(out, s, now)
    })
}

/// `ha-ws states-json`: every state, unabridged.
pub async fn states_json(client: &HaClient, out: &Output) -> Result<()> {
    let states = api::get_states(client)
        .await
        .context("failed to fetch states")?;
    out.data(&mut io::stdout().lock(), "states-json", &states)
}

/// `ha-ws states-filter <pattern>`: entity ids matching a `*` pattern.
/// Unlike the registry searches this is case-sensitive.
pub async fn states_filter(client: &HaClient, out: &Output, pattern: &str) -> Result<()> {
    let re = super::glob(pattern, false)?;
    let mut states = api::get_states(client)
        .await
        .context("failed to fetch states")?;
    states.retain(|s| re.is_match(&s.entity_id));
    states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

    let now = Utc::now();
    let title = format!("States matching {pattern}");
    out.list(&mut io::stdout().lock(), "states-filter", &title, &states, |s| {
        filter_line(out, s, now)
    })
}

fn filter_line(out: &Output, s: &HaState, now: DateTime<Utc>) -> String {
    let age = s
        .last_updated
        .as_deref()
        .filter(|_| out.show_age)
        .and_then(|ts| output::age(ts, now))
        .map(|a| format!(" ({a} ago)"))
        .unwrap_or_default();
    format!("{}: {}{age}", s.entity_id, s.state)
}

fn state_line(out: &Output, s: &HaState, now: DateTime<Utc>) -> String {
    if out.format == output::Format::Compact {
        return format!("{}={}", s.entity_id, s.state);
    }
    let age = s
        .last_changed
        .as_deref()
        .and_then(|ts| output::age(ts, now))
        .map(|a| format!(" ({a} ago)"))
        .unwrap_or_default();
    format!("{:<40} {}{}", s.entity_id, s.state, age)
}

/// `ha-ws config`: hub configuration summary.
pub async fn config(client: &HaClient, out: &Output) -> Result<()> {
    let config = api::get_config(client)
        .await
        .context("failed to fetch config")?;
    let mut w = io::stdout().lock();

    if out.format != output::Format::Default {
        return out.data(&mut w, "config", &config);
    }

    writeln!(w, "Version:    {}", config.version)?;
    writeln!(w, "Location:   {}", config.location_name)?;
    writeln!(w, "Time zone:  {}", config.time_zone)?;
    writeln!(w, "State:      {}", config.state)?;
    if !config.unit_system.is_empty() {
        let units: Vec<String> = config
            .unit_system
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        writeln!(w, "Units:      {}", units.join(" "))?;
    }
    writeln!(w, "Components: {}", config.components.len())?;
    Ok(())
}

#[derive(Serialize)]
struct ServiceRow {
    service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

fn service_rows(services: ServiceMap, domain: Option<&str>) -> Vec<ServiceRow> {
    services
        .into_iter()
        .filter(|(d, _)| domain.map_or(true, |want| want == d.as_str()))
        .flat_map(|(d, entries)| {
            entries.into_iter().map(move |(service, info)| ServiceRow {
                service: format!("{d}.{service}"),
                name: info.name,
            })
        })
        .collect()
}

/// `ha-ws services [domain]`.
pub async fn services(client: &HaClient, out: &Output, domain: Option<&str>) -> Result<()> {
    let services = api::get_services(client)
        .await
        .context("failed to fetch services")?;
    if let Some(d) = domain {
        if !services.contains_key(d) {
            bail!("no services in domain '{d}'");
        }
    }

    let rows = service_rows(services, domain);
    out.list(&mut io::stdout().lock(), "services", "Services", &rows, |r| {
        match &r.name {
            Some(name) if out.format == output::Format::Default => {
                format!("{:<48} {}", r.service, name)
            }
            _ => r.service.clone(),
        }
    })
}

/// Parse the optional service-data argument of `call`.
pub fn parse_service_data(data: Option<&str>) -> Result<Value> {
    let Some(text) = data else {
        return Ok(Value::Null);
    };
    let value: Value =
        serde_json::from_str(text).with_context(|| format!("invalid service data: {text}"))?;
    if !value.is_object() {
        bail!("service data must be a JSON object");
    }
    Ok(value)
}

/// `ha-ws call <domain> <service> [json]`.
pub async fn call(
    client: &HaClient,
    out: &Output,
    domain: &str,
    service: &str,
    data: Option<&str>,
) -> Result<()> {
    let data = parse_service_data(data)?;
    let result = api::call_service(client, domain, service, data)
        .await
        .with_context(|| format!("{domain}.{service} failed"))?;

    let mut w = io::stdout().lock();
    match result.get("response") {
        Some(response) if !response.is_null() => out.data(&mut w, "call", response),
        _ if out.is_json() => out.data(&mut w, "call", &result),
        _ => out.message(&mut w, "call", &format!("called {domain}.{service}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn service_data_must_be_an_object() {
        assert_eq!(parse_service_data(None).unwrap(), Value::Null);
        assert_eq!(
            parse_service_data(Some(r#"{"entity_id":"light.a"}"#)).unwrap(),
            json!({"entity_id": "light.a"})
        );
        assert!(parse_service_data(Some("[1,2]")).is_err());
        assert!(parse_service_data(Some("{oops")).is_err());
    }

    #[test]
    fn services_flatten_and_filter() {
        let services: ServiceMap = serde_json::from_value(json!({
            "light": {"turn_on": {"name": "Turn on"}, "turn_off": {}},
            "switch": {"toggle": {"name": "Toggle"}}
        }))
        .unwrap();

        let all = service_rows(services.clone(), None);
        let names: Vec<&str> = all.iter().map(|r| r.service.as_str()).collect();
        assert_eq!(names, ["light.turn_off", "light.turn_on", "switch.toggle"]);

        let light = service_rows(services, Some("light"));
        assert_eq!(light.len(), 2);
        assert_eq!(light[1].name.as_deref(), Some("Turn on"));
    }

    #[test]
    fn state_lines() {
        let now = DateTime::parse_from_rfc3339("2024-01-01T00:10:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let s: HaState = serde_json::from_value(json!({
            "entity_id": "sun.sun",
            "state": "above_horizon",
            "last_changed": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        let compact = Output {
            format: output::Format::Compact,
            ..Default::default()
        };
        assert_eq!(state_line(&compact, &s, now), "sun.sun=above_horizon");
        assert!(state_line(&Output::default(), &s, now).ends_with("above_horizon (10m ago)"));
    }

    #[test]
    fn filter_lines_show_age_on_request() {
        let now = DateTime::parse_from_rfc3339("2024-01-01T02:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let s: HaState = serde_json::from_value(json!({
            "entity_id": "light.porch",
            "state": "off",
            "last_updated": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(filter_line(&Output::default(), &s, now), "light.porch: off");
        let aged = Output {
            show_age: true,
            ..Default::default()
        };
        assert_eq!(filter_line(&aged, &s, now), "light.porch: off (2h ago)");
    }
}
