//! Pure priority scoring for queued sessions (§4.4). No I/O, no async.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod rules;
pub mod score;

pub use rules::{UrgencyRule, UrgencyRuleConditions, UrgencyRulesSnapshot};
pub use score::{ordering_key, score};
