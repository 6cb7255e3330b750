//! CLI subcommand implementations.

pub mod automation;
pub mod basic;
pub mod history;
pub mod logs;
pub mod registry;
pub mod stats;
pub mod watch;

use std::io::Read;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use tracing::info;

use ha_ws_client::{ConnectConfig, HaClient};

use crate::config::Settings;

/// Open an authenticated connection to the hub.
pub async fn connect(settings: &Settings) -> Result<HaClient> {
    let config = ConnectConfig {
        access_token: settings.token.clone(),
        call_timeout: settings.timeout,
        ..Default::default()
    };
    let client = HaClient::connect(&settings.url, config)
        .await
        .with_context(|| format!("failed to connect to {}", settings.url))?;

    if let Some(version) = client.ha_version().await {
        info!(version = %version, "connected to hub");
    }
    Ok(client)
}

/// Compile a shell-style pattern, where `*` matches anything, into a regex
/// that matches anywhere in the text.
pub fn glob(pattern: &str, ignore_case: bool) -> Result<Regex> {
    let source = regex::escape(pattern).replace(r"\*", ".*");
    RegexBuilder::new(&source)
        .case_insensitive(ignore_case)
        .build()
        .with_context(|| format!("invalid pattern: {pattern}"))
}

/// The argument itself, or all of stdin when it is `-`.
pub fn arg_or_stdin(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("failed to read from stdin")?;
    Ok(text)
}

/// Strip an `automation.` prefix: trace commands want the bare id.
pub fn automation_item_id(id: &str) -> &str {
    id.strip_prefix("automation.").unwrap_or(id)
}

/// Add an `automation.` prefix when missing.
pub fn automation_entity_id(id: &str) -> String {
    if id.starts_with("automation.") {
        id.to_string()
    } else {
        format!("automation.{id}")
    }
}

/// Split trailing `[number]` off a list of names, e.g. `a b c 12`.
pub fn split_trailing_number(args: &[String], default: u64) -> (Vec<String>, u64) {
    if args.len() > 1 {
        if let Some((last, rest)) = args.split_last() {
            if let Ok(n) = last.parse() {
                return (rest.to_vec(), n);
            }
        }
    }
    (args.to_vec(), default)
}
