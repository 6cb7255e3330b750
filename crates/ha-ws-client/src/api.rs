//! Typed helpers for the hub's WebSocket commands.
//!
//! Each helper builds the request payload, issues it through the client's
//! call/subscribe facade with the client's default timeout, and decodes the
//! reply into a type from `ha_ws_core::types`.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use ha_ws_core::error::{HaError, HaResult};
use ha_ws_core::types::{
    AreaEntry, AutomationConfig, DeviceEntry, EntityEntry, HaConfig, HaState, History,
    LogbookEntry, ServiceMap, Statistics, SubscriptionEvent, SysLogEntry, TraceDetail, TraceInfo,
};

use crate::client::HaClient;
use crate::subscription::Subscription;

/// Round-trip a `ping`.
pub async fn ping(client: &HaClient) -> HaResult<()> {
    client
        .call("ping", Value::Null, client.default_timeout())
        .await
        .map(|_| ())
}

/// All entity states.
pub async fn get_states(client: &HaClient) -> HaResult<Vec<HaState>> {
    client
        .call_typed("get_states", Value::Null, client.default_timeout())
        .await
}

/// One entity's state. The hub has no single-entity query, so this filters
/// `get_states`.
pub async fn get_state(client: &HaClient, entity_id: &str) -> HaResult<HaState> {
    get_states(client)
        .await?
        .into_iter()
        .find(|s| s.entity_id == entity_id)
        .ok_or_else(|| HaError::NotFound(format!("entity {entity_id}")))
}

/// Hub configuration.
pub async fn get_config(client: &HaClient) -> HaResult<HaConfig> {
    client
        .call_typed("get_config", Value::Null, client.default_timeout())
        .await
}

/// Every registered service, grouped by domain.
pub async fn get_services(client: &HaClient) -> HaResult<ServiceMap> {
    client
        .call_typed("get_services", Value::Null, client.default_timeout())
        .await
}

/// Call `domain.service` with `data` (a JSON object or null). Returns the
/// hub's raw result (context and optional service response).
pub async fn call_service(
    client: &HaClient,
    domain: &str,
    service: &str,
    data: Value,
) -> HaResult<Value> {
    if !(data.is_object() || data.is_null()) {
        return Err(HaError::Codec("service data must be a JSON object".into()));
    }

    let mut params = Map::new();
    params.insert("domain".into(), json!(domain));
    params.insert("service".into(), json!(service));
    if !data.is_null() {
        params.insert("service_data".into(), data);
    }

    debug!("calling service {}.{}", domain, service);
    client
        .call("call_service", Value::Object(params), client.default_timeout())
        .await
}

/// State history for `entity_ids` between two ISO-8601 timestamps.
pub async fn history(
    client: &HaClient,
    entity_ids: &[&str],
    start_time: &str,
    end_time: Option<&str>,
) -> HaResult<History> {
    history_during_period(client, entity_ids, start_time, end_time, false).await
}

/// Like [`history`], with every row carrying the entity's attributes.
pub async fn history_full(
    client: &HaClient,
    entity_ids: &[&str],
    start_time: &str,
    end_time: Option<&str>,
) -> HaResult<History> {
    history_during_period(client, entity_ids, start_time, end_time, true).await
}

async fn history_during_period(
    client: &HaClient,
    entity_ids: &[&str],
    start_time: &str,
    end_time: Option<&str>,
    attributes: bool,
) -> HaResult<History> {
    let mut params = json!({
        "entity_ids": entity_ids,
        "start_time": start_time,
        "minimal_response": !attributes,
        "no_attributes": !attributes,
        "significant_changes_only": false,
    });
    if let Some(end) = end_time {
        params["end_time"] = json!(end);
    }

    client
        .call_typed("history/history_during_period", params, client.default_timeout())
        .await
}

/// Logbook entries for `entity_ids` from `start_time` on.
pub async fn logbook(
    client: &HaClient,
    entity_ids: &[&str],
    start_time: &str,
    end_time: Option<&str>,
) -> HaResult<Vec<LogbookEntry>> {
    let mut params = json!({
        "entity_ids": entity_ids,
        "start_time": start_time,
    });
    if let Some(end) = end_time {
        params["end_time"] = json!(end);
    }
    client
        .call_typed("logbook/get_events", params, client.default_timeout())
        .await
}

/// Recent warnings and errors from the hub's system log.
pub async fn system_log(client: &HaClient) -> HaResult<Vec<SysLogEntry>> {
    client
        .call_typed("system_log/list", Value::Null, client.default_timeout())
        .await
}

/// Long-term statistics for `statistic_ids`, bucketed by `period`
/// (`5minute`, `hour`, `day`, `week` or `month`).
pub async fn statistics(
    client: &HaClient,
    statistic_ids: &[&str],
    start_time: &str,
    end_time: Option<&str>,
    period: &str,
) -> HaResult<Statistics> {
    let mut params = json!({
        "statistic_ids": statistic_ids,
        "start_time": start_time,
        "period": period,
    });
    if let Some(end) = end_time {
        params["end_time"] = json!(end);
    }
    client
        .call_typed(
            "recorder/statistics_during_period",
            params,
            client.default_timeout(),
        )
        .await
}

/// Entity registry.
pub async fn entity_registry(client: &HaClient) -> HaResult<Vec<EntityEntry>> {
    client
        .call_typed("config/entity_registry/list", Value::Null, client.default_timeout())
        .await
}

/// Device registry.
pub async fn device_registry(client: &HaClient) -> HaResult<Vec<DeviceEntry>> {
    client
        .call_typed("config/device_registry/list", Value::Null, client.default_timeout())
        .await
}

/// Area registry.
pub async fn area_registry(client: &HaClient) -> HaResult<Vec<AreaEntry>> {
    client
        .call_typed("config/area_registry/list", Value::Null, client.default_timeout())
        .await
}

/// Stored automation traces, optionally for a single automation
/// (`item_id` is the automation's id, not its entity id).
pub async fn trace_list(client: &HaClient, item_id: Option<&str>) -> HaResult<Vec<TraceInfo>> {
    let mut params = json!({ "domain": "automation" });
    if let Some(item_id) = item_id {
        params["item_id"] = json!(item_id);
    }
    client
        .call_typed("trace/list", params, client.default_timeout())
        .await
}

/// The full trace of one automation run.
pub async fn trace_get(client: &HaClient, item_id: &str, run_id: &str) -> HaResult<TraceDetail> {
    client
        .call_typed(
            "trace/get",
            json!({ "domain": "automation", "item_id": item_id, "run_id": run_id }),
            client.default_timeout(),
        )
        .await
}

/// An automation's stored configuration, by entity id.
pub async fn automation_config(client: &HaClient, entity_id: &str) -> HaResult<AutomationConfig> {
    #[derive(serde::Deserialize)]
    struct Reply {
        config: AutomationConfig,
    }
    let reply: Reply = client
        .call_typed(
            "automation/config",
            json!({ "entity_id": entity_id }),
            client.default_timeout(),
        )
        .await?;
    Ok(reply.config)
}

/// Subscribe to an automation trigger definition.
pub async fn subscribe_trigger<F>(
    client: &HaClient,
    trigger: Value,
    callback: F,
) -> HaResult<Subscription>
where
    F: FnMut(SubscriptionEvent) + Send + 'static,
{
    client
        .subscribe(
            "subscribe_trigger",
            json!({ "trigger": trigger }),
            client.default_timeout(),
            typed_callback("subscribe_trigger", callback),
        )
        .await
}

/// Watch one entity: fires on every state change.
pub async fn watch_entity<F>(
    client: &HaClient,
    entity_id: &str,
    callback: F,
) -> HaResult<Subscription>
where
    F: FnMut(SubscriptionEvent) + Send + 'static,
{
    subscribe_trigger(
        client,
        json!({ "platform": "state", "entity_id": entity_id }),
        callback,
    )
    .await
}

/// Render a template now and again whenever the entities it reads change.
pub async fn render_template<F>(
    client: &HaClient,
    template: &str,
    callback: F,
) -> HaResult<Subscription>
where
    F: FnMut(SubscriptionEvent) + Send + 'static,
{
    client
        .subscribe(
            "render_template",
            json!({ "template": template, "report_errors": true }),
            client.default_timeout(),
            typed_callback("render_template", callback),
        )
        .await
}

/// Subscribe to bus events, optionally of a single type.
pub async fn subscribe_events<F>(
    client: &HaClient,
    event_type: Option<&str>,
    callback: F,
) -> HaResult<Subscription>
where
    F: FnMut(Value) + Send + 'static,
{
    let params = match event_type {
        Some(t) => json!({ "event_type": t }),
        None => Value::Null,
    };
    client
        .subscribe("subscribe_events", params, client.default_timeout(), callback)
        .await
}

/// Wrap a typed callback so it can sit behind the untyped registry. Events
/// that do not decode are logged and skipped.
fn typed_callback<T, F>(what: &'static str, mut callback: F) -> impl FnMut(Value) + Send + 'static
where
    T: DeserializeOwned,
    F: FnMut(T) + Send + 'static,
{
    move |raw| match serde_json::from_value::<T>(raw) {
        Ok(event) => callback(event),
        Err(e) => warn!("{} event did not decode: {}", what, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_hub;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn get_state_filters_states() {
        let (client, mut hub) = mock_hub::connected("t").await;
        let hub_task = tokio::spawn(async move {
            for _ in 0..2 {
                let req = hub.recv().await;
                assert_eq!(req["type"], "get_states");
                hub.send(json!({
                    "id": req["id"],
                    "type": "result",
                    "success": true,
                    "result": [
                        {"entity_id": "light.living_room", "state": "on"},
                        {"entity_id": "sensor.temperature", "state": "21.5",
                         "attributes": {"unit_of_measurement": "°C"}}
                    ],
                }))
                .await;
            }
            hub
        });

        let state = get_state(&client, "sensor.temperature").await.unwrap();
        assert_eq!(state.state, "21.5");
        assert_eq!(
            get_state(&client, "light.kitchen").await.unwrap_err(),
            HaError::NotFound("entity light.kitchen".into())
        );
        let _hub = hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn call_service_builds_request() {
        let (client, mut hub) = mock_hub::connected("t").await;
        let hub_task = tokio::spawn(async move {
            let req = hub.recv().await;
            assert_eq!(req["type"], "call_service");
            assert_eq!(req["domain"], "light");
            assert_eq!(req["service"], "turn_on");
            assert_eq!(req["service_data"], json!({"entity_id": "light.living_room"}));
            hub.send(json!({
                "id": req["id"],
                "type": "result",
                "success": true,
                "result": {"context": {"id": "abc"}},
            }))
            .await;
            hub
        });

        let result = call_service(
            &client,
            "light",
            "turn_on",
            json!({"entity_id": "light.living_room"}),
        )
        .await
        .unwrap();
        assert_eq!(result["context"]["id"], "abc");
        let _hub = hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn call_service_rejects_non_object_data() {
        let client = HaClient::new(Default::default());
        assert!(matches!(
            call_service(&client, "light", "turn_on", json!([1])).await,
            Err(HaError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn history_request_and_decode() {
        let (client, mut hub) = mock_hub::connected("t").await;
        let hub_task = tokio::spawn(async move {
            let req = hub.recv().await;
            assert_eq!(req["type"], "history/history_during_period");
            assert_eq!(req["entity_ids"], json!(["sensor.temperature"]));
            assert_eq!(req["start_time"], "2024-01-01T00:00:00Z");
            assert!(req.get("end_time").is_none());
            hub.send(json!({
                "id": req["id"],
                "type": "result",
                "success": true,
                "result": {"sensor.temperature": [{"s": "20.0", "lu": 1704067200.0}, {"s": "21.0", "lu": 1704070800.0}]},
            }))
            .await;
            hub
        });

        let history = history(&client, &["sensor.temperature"], "2024-01-01T00:00:00Z", None)
            .await
            .unwrap();
        let rows = &history["sensor.temperature"];
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].state, "21.0");
        let _hub = hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn history_full_asks_for_attributes() {
        let (client, mut hub) = mock_hub::connected("t").await;
        let hub_task = tokio::spawn(async move {
            let req = hub.recv().await;
            assert_eq!(req["minimal_response"], false);
            assert_eq!(req["no_attributes"], false);
            assert_eq!(req["end_time"], "2024-01-02T00:00:00Z");
            hub.send(json!({
                "id": req["id"],
                "type": "result",
                "success": true,
                "result": {"light.desk": [{"s": "on", "a": {"brightness": 128}, "lu": 1704067200.0}]},
            }))
            .await;
            hub
        });

        let history = history_full(
            &client,
            &["light.desk"],
            "2024-01-01T00:00:00Z",
            Some("2024-01-02T00:00:00Z"),
        )
        .await
        .unwrap();
        assert_eq!(history["light.desk"][0].attributes["brightness"], 128);
        let _hub = hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn trace_get_and_automation_config() {
        let (client, mut hub) = mock_hub::connected("t").await;
        let hub_task = tokio::spawn(async move {
            let req = hub.recv().await;
            assert_eq!(req["type"], "trace/get");
            assert_eq!(req["domain"], "automation");
            assert_eq!(req["item_id"], "morning");
            assert_eq!(req["run_id"], "r1");
            hub.send(json!({
                "id": req["id"],
                "type": "result",
                "success": true,
                "result": {"run_id": "r1", "script_execution": "finished", "trace": {}},
            }))
            .await;

            let req = hub.recv().await;
            assert_eq!(req["type"], "automation/config");
            assert_eq!(req["entity_id"], "automation.morning");
            hub.send(json!({
                "id": req["id"],
                "type": "result",
                "success": true,
                "result": {"config": {"id": "morning", "use_blueprint": {"path": "motion.yaml", "input": {"delay": 5}}}},
            }))
            .await;
            hub
        });

        let detail = trace_get(&client, "morning", "r1").await.unwrap();
        assert_eq!(detail.script_execution.as_deref(), Some("finished"));

        let config = automation_config(&client, "automation.morning").await.unwrap();
        assert!(!config.has_body());
        assert_eq!(config.use_blueprint.unwrap().input["delay"], 5);
        let _hub = hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn statistics_request_shape() {
        let (client, mut hub) = mock_hub::connected("t").await;
        let hub_task = tokio::spawn(async move {
            let req = hub.recv().await;
            assert_eq!(req["type"], "recorder/statistics_during_period");
            assert_eq!(req["statistic_ids"], json!(["sensor.power"]));
            assert_eq!(req["period"], "hour");
            hub.send(json!({
                "id": req["id"],
                "type": "result",
                "success": true,
                "result": {"sensor.power": [{"start": 1704067200000u64, "mean": 1.5, "min": 1.0, "max": 2.0}]},
            }))
            .await;
            hub
        });

        let stats = statistics(&client, &["sensor.power"], "2024-01-01T00:00:00Z", None, "hour")
            .await
            .unwrap();
        assert_eq!(stats["sensor.power"][0].max, Some(2.0));
        let _hub = hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn watch_entity_decodes_trigger_events() {
        let (client, mut hub) = mock_hub::connected("t").await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let hub_task = tokio::spawn(async move {
            let req = hub.recv().await;
            assert_eq!(req["type"], "subscribe_trigger");
            assert_eq!(
                req["trigger"],
                json!({"platform": "state", "entity_id": "binary_sensor.motion"})
            );
            let id = req["id"].clone();
            hub.send(json!({"id": id, "type": "result", "success": true, "result": null}))
                .await;
            // Does not decode as an object: skipped.
            hub.send(json!({"id": id, "type": "event", "event": "garbage"})).await;
            hub.send(json!({
                "id": id,
                "type": "event",
                "event": {"variables": {"trigger": {
                    "platform": "state",
                    "entity_id": "binary_sensor.motion",
                    "from_state": {"state": "off"},
                    "to_state": {"state": "on"}
                }}},
            }))
            .await;
            hub
        });

        let _sub = watch_entity(&client, "binary_sensor.motion", move |event| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        let trigger = event.trigger().unwrap();
        assert_eq!(trigger["to_state"]["state"], "on");
        let _hub = hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn render_template_streams_results() {
        let (client, mut hub) = mock_hub::connected("t").await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let hub_task = tokio::spawn(async move {
            let req = hub.recv().await;
            assert_eq!(req["template"], "{{ states('sun.sun') }}");
            let id = req["id"].clone();
            hub.send(json!({"id": id, "type": "result", "success": true, "result": null}))
                .await;
            hub.send(json!({"id": id, "type": "event", "event": {"result": "above_horizon"}}))
                .await;
            hub.send(json!({"id": id, "type": "event", "event": {"result": "below_horizon"}}))
                .await;
            hub
        });

        let _sub = render_template(&client, "{{ states('sun.sun') }}", move |event| {
            let _ = tx.send(event.result);
        })
        .await
        .unwrap();

        assert_eq!(rx.recv().await.unwrap(), Some(json!("above_horizon")));
        assert_eq!(rx.recv().await.unwrap(), Some(json!("below_horizon")));
        let _hub = hub_task.await.unwrap();
    }
}
