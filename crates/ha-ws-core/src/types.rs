//! Typed payloads returned by the hub.
//!
//! These are decoded at the edge from the untyped `result`/`event` bodies.
//! Unknown fields are ignored so newer hub versions keep decoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An entity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HaContext>,
}

impl HaState {
    /// The `friendly_name` attribute, if set.
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(Value::as_str)
    }

    /// The entity's domain (`light` for `light.kitchen`).
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.entity_id)
    }
}

/// Causation context attached to states and events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaContext {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Hub configuration (`get_config`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaConfig {
    pub version: String,
    #[serde(default)]
    pub location_name: String,
    #[serde(default)]
    pub time_zone: String,
    #[serde(default)]
    pub unit_system: BTreeMap<String, String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub components: Vec<String>,
}

/// One service description from `get_services`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `domain -> service -> description`.
pub type ServiceMap = BTreeMap<String, BTreeMap<String, ServiceInfo>>;

/// A compressed state row from `history/history_during_period` with
/// `minimal_response` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryState {
    #[serde(rename = "s")]
    pub state: String,
    #[serde(rename = "a", default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    /// Last changed, seconds since the Unix epoch.
    #[serde(rename = "lc", default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<f64>,
    /// Last updated, seconds since the Unix epoch.
    #[serde(rename = "lu", default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<f64>,
}

impl HistoryState {
    /// The row's timestamp: `last_changed` when present, else `last_updated`.
    pub fn timestamp(&self) -> Option<f64> {
        self.last_changed.or(self.last_updated)
    }
}

/// `entity_id -> rows`.
pub type History = BTreeMap<String, Vec<HistoryState>>;

/// Payload of an `event` message on a trigger or template subscription.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    /// Rendered value (template subscriptions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Trigger variables (trigger subscriptions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
    /// Render error reported by a template subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubscriptionEvent {
    /// The `trigger` object of a trigger subscription event.
    pub fn trigger(&self) -> Option<&Map<String, Value>> {
        self.variables.as_ref()?.get("trigger")?.as_object()
    }
}

/// Automation/script trace summary (`trace/list`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceInfo {
    pub item_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_execution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HaContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamp {
    pub start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<String>,
}

/// Full trace of one automation run (`trace/get`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TraceDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_execution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HaContext>,
    /// Human-readable trigger description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Value>,
    /// Steps keyed by path (`trigger/0`, `condition/0`, `action/1`, ...).
    #[serde(default)]
    pub trace: BTreeMap<String, Vec<TraceStep>>,
    /// The automation config the run used, blueprint inputs resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AutomationConfig>,
}

impl TraceDetail {
    /// The trigger variables of the run, taken from the first trigger step.
    pub fn trigger_variables(&self) -> Option<&Value> {
        self.trace
            .iter()
            .filter(|(path, _)| path.starts_with("trigger"))
            .flat_map(|(_, steps)| steps)
            .find_map(|step| step.variables.as_ref()?.get("trigger"))
    }

    /// Steps in execution order, each with its path.
    pub fn steps(&self) -> Vec<(&str, &TraceStep)> {
        let mut steps: Vec<(&str, &TraceStep)> = self
            .trace
            .iter()
            .flat_map(|(path, steps)| steps.iter().map(move |s| (path.as_str(), s)))
            .collect();
        steps.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp));
        steps
    }
}

/// One step of a run trace.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TraceStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_variables: Option<Map<String, Value>>,
}

/// Automation configuration. Accepts both the old singular keys and the
/// newer plural ones; everything else is kept as-is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_blueprint: Option<BlueprintRef>,
    #[serde(default, alias = "triggers", skip_serializing_if = "Vec::is_empty")]
    pub trigger: Vec<Value>,
    #[serde(default, alias = "conditions", skip_serializing_if = "Vec::is_empty")]
    pub condition: Vec<Value>,
    #[serde(default, alias = "actions", skip_serializing_if = "Vec::is_empty")]
    pub action: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AutomationConfig {
    /// Whether the config carries any triggers or actions.
    pub fn has_body(&self) -> bool {
        !self.trigger.is_empty() || !self.action.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintRef {
    pub path: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

/// Logbook entry (`logbook/get_events`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogbookEntry {
    /// Seconds since the Unix epoch.
    pub when: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    /// Set when the change was caused by an automation or script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_entity_id: Option<String>,
}

/// System log record (`system_log/list`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysLogEntry {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub name: String,
    /// `[file, line]`.
    #[serde(default)]
    pub source: Vec<Value>,
    /// A string, or a list of the distinct messages seen.
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub count: u64,
}

impl SysLogEntry {
    /// The (first) message text.
    pub fn message_text(&self) -> &str {
        match &self.message {
            Value::String(s) => s,
            Value::Array(items) => items.first().and_then(Value::as_str).unwrap_or(""),
            _ => "",
        }
    }

    /// `file:line`, or the logger name when the source is missing.
    pub fn source_text(&self) -> String {
        match self.source.as_slice() {
            [file, line, ..] => format!("{}:{}", file.as_str().unwrap_or("?"), line),
            _ => self.name.clone(),
        }
    }
}

/// One statistics bucket (`recorder/statistics_during_period`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatEntry {
    /// Bucket start: milliseconds since the epoch, or an ISO-8601 string on
    /// older hubs.
    pub start: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<f64>,
}

impl StatEntry {
    /// Bucket start in seconds since the epoch, when sent as a number.
    pub fn start_secs(&self) -> Option<f64> {
        self.start.as_f64().map(|ms| ms / 1000.0)
    }
}

/// `statistic_id -> buckets`.
pub type Statistics = BTreeMap<String, Vec<StatEntry>>;

/// Entity registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEntry {
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<String>,
}

/// Device registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_by_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
}

/// Area registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaEntry {
    pub area_id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}
