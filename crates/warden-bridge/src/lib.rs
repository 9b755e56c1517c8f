//! Realtime push bridge.
//!
//! Keeps one websocket open to the platform's push pipeline, authenticated
//! with a token derived through [`warden_api::TokenSource`]. Frames are
//! deduplicated, decoded, classified into the shared event vocabulary and
//! published on the [`warden_types::EventBus`]. Connection lifecycle changes
//! are broadcast separately as [`ConnectionEvent`]s.

mod bridge;
mod config;
mod error;
pub mod message;
mod state;

pub use bridge::EventBridge;
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use state::{ConnectionEvent, ConnectionStatus, Phase};
