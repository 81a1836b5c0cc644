//! Domain types, error taxonomy, and wire protocol shared by every other
//! crate in the workspace. Transport-agnostic: no tokio, no axum here.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod clock;
pub mod domain;
pub mod error;
pub mod ids;
pub mod lang;
pub mod protocol;

pub use error::{ClientCode, CsError, Result};
