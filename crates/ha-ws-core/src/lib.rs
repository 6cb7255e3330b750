//! ha-ws-core: Shared protocol library for the Home Assistant WebSocket API.
//!
//! Provides the error taxonomy, the JSON wire messages, the frame codec and
//! the typed hub payloads (states, config, registries, traces).

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;

// Re-export commonly used items at crate root.
pub use codec::{decode_frames, encode_auth, encode_call, split_frames};
pub use error::{HaError, HaResult};
pub use messages::{Frame, RemoteErrorInfo};
pub use types::{HaConfig, HaContext, HaState};
