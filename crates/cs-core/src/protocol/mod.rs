//! Wire protocol for the single JSON event lane used by the realtime hub.
//!
//! The teacher gateway split inbound traffic into an "Ext" (JSON) and "Hot"
//! (binary) lane; this domain has no latency-critical binary payload, so only
//! the JSON lane survives here (see SPEC_FULL.md §9).

pub mod events;

pub use events::{ClientEvent, ErrorPayload, ServerEvent, WsAck};
