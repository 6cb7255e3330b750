//! ha-ws-client: Rust client library for the Home Assistant WebSocket API.
//!
//! One authenticated websocket carries any number of concurrent exchanges.
//! Each exchange is tagged with a correlation id; request/response calls
//! resolve once, subscriptions deliver events until cancelled.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use ha_ws_client::{api, ConnectConfig, HaClient};
//!
//! # async fn example() -> ha_ws_core::HaResult<()> {
//! let client = HaClient::connect("http://homeassistant.local:8123", ConnectConfig {
//!     access_token: "long-lived-token".into(),
//!     ..Default::default()
//! }).await?;
//!
//! let state = api::get_state(&client, "light.kitchen").await?;
//! println!("{} is {}", state.entity_id, state.state);
//!
//! let watch = api::watch_entity(&client, "binary_sensor.motion", |event| {
//!     println!("trigger: {:?}", event.trigger());
//! }).await?;
//! tokio::time::sleep(Duration::from_secs(30)).await;
//! watch.cancel().await?;
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
mod dispatch;
pub mod registry;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod mock_hub;

// Re-export primary public types.
pub use client::{ConnectConfig, ConnectionState, HaClient};
pub use registry::{Registry, Reply};
pub use subscription::Subscription;

// Re-export ha-ws-core error types for convenience.
pub use ha_ws_core::{HaError, HaResult};
