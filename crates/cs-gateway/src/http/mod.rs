//! `/api/v1` HTTP surface (§6).

pub mod auth;
pub mod messages;
pub mod ops;
pub mod sessions;
pub mod tickets;
