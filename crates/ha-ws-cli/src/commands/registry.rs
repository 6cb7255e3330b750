//! `ha-ws entities | devices | areas`: registry listings.
//!
//! `entities` and `devices` take an optional `*` pattern, matched without
//! regard to case against ids and names.

use std::io;

use anyhow::{Context, Result};
use regex::Regex;

use ha_ws_client::api;
use ha_ws_client::HaClient;
use ha_ws_core::types::{AreaEntry, DeviceEntry, EntityEntry};

use super::glob;
use crate::output::{Format, Output};

fn compile(pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern.map(|p| glob(p, true)).transpose()
}

/// Keep items where any field matches; everything when there is no pattern.
fn retain_matching<T>(items: &mut Vec<T>, re: Option<&Regex>, fields: impl Fn(&T) -> Vec<&str>) {
    if let Some(re) = re {
        items.retain(|item| fields(item).into_iter().any(|f| re.is_match(f)));
    }
}

fn entity_fields(e: &EntityEntry) -> Vec<&str> {
    [Some(e.entity_id.as_str()), e.name.as_deref(), e.original_name.as_deref()]
        .into_iter()
        .flatten()
        .collect()
}

fn device_fields(d: &DeviceEntry) -> Vec<&str> {
    [Some(device_name(d)), Some(d.id.as_str()), d.manufacturer.as_deref(), d.model.as_deref()]
        .into_iter()
        .flatten()
        .collect()
}

pub async fn entities(client: &HaClient, out: &Output, pattern: Option<&str>) -> Result<()> {
    let re = compile(pattern)?;
    let mut entries = api::entity_registry(client)
        .await
        .context("failed to fetch entity registry")?;
    retain_matching(&mut entries, re.as_ref(), entity_fields);
    entries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    out.list(&mut io::stdout().lock(), "entities", "Entities", &entries, |e| {
        entity_line(out, e)
    })
}

fn entity_line(out: &Output, e: &EntityEntry) -> String {
    let name = e.name.as_deref().or(e.original_name.as_deref()).unwrap_or("");
    let disabled = if e.disabled_by.is_some() { " [disabled]" } else { "" };
    match out.format {
        Format::Compact => format!("{}{}", e.entity_id, disabled),
        _ => format!("{:<48} {}{}", e.entity_id, name, disabled)
            .trim_end()
            .to_string(),
    }
}

pub async fn devices(client: &HaClient, out: &Output, pattern: Option<&str>) -> Result<()> {
    let re = compile(pattern)?;
    let mut entries = api::device_registry(client)
        .await
        .context("failed to fetch device registry")?;
    retain_matching(&mut entries, re.as_ref(), device_fields);
    entries.sort_by(|a, b| device_name(a).cmp(device_name(b)));
    out.list(&mut io::stdout().lock(), "devices", "Devices", &entries, |d| {
        let model = [d.manufacturer.as_deref(), d.model.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        match out.format {
            Format::Compact => format!("{} {}", d.id, device_name(d)),
            _ if model.is_empty() => device_name(d).to_string(),
            _ => format!("{:<40} {}", device_name(d), model),
        }
    })
}

/// The user's name for a device, falling back to the integration's.
fn device_name(d: &DeviceEntry) -> &str {
    d.name_by_user
        .as_deref()
        .or(d.name.as_deref())
        .unwrap_or(&d.id)
}

pub async fn areas(client: &HaClient, out: &Output) -> Result<()> {
    let mut entries = api::area_registry(client)
        .await
        .context("failed to fetch area registry")?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    out.list(&mut io::stdout().lock(), "areas", "Areas", &entries, |a| {
        area_line(out, a)
    })
}

fn area_line(out: &Output, a: &AreaEntry) -> String {
    match out.format {
        Format::Compact => format!("{}={}", a.area_id, a.name),
        _ => format!("{:<24} {}", a.area_id, a.name),
    }
}
