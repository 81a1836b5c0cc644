//! AI triage/chat and translation adapters (§4.2, §4.3).

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod adapter;
pub mod crypto;
pub mod sanitize;
pub mod translation;

pub use adapter::{AIAdapter, ChatResult, GameCredentials, HttpAIAdapter, TriageResult};
pub use crypto::EncryptionKey;
pub use translation::{HttpTranslationAdapter, Translation, TranslationAdapter};
