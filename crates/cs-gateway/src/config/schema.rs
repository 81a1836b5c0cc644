//! Config schema with strict parsing. `deny_unknown_fields` prevents silent
//! misconfiguration of a deployed gateway.

use serde::Deserialize;

use cs_core::{CsError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub version: u32,
    #[serde(default)]
    pub gateway: GatewaySection,
    pub database_url: String,
    pub ai: AiSection,
    #[serde(default)]
    pub translation: TranslationSection,
    pub jwt_secret: String,
    #[serde(default)]
    pub cors_allow_origins: Vec<String>,
    #[serde(default)]
    pub rate_limits: RateLimitSection,
    pub metrics_key: String,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(CsError::validation("unsupported config version"));
        }
        if self.jwt_secret.trim().is_empty() {
            return Err(CsError::validation("jwt_secret must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_presence_grace_ms")]
    pub presence_grace_ms: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            presence_grace_ms: default_presence_grace_ms(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_ping_interval_ms() -> u64 {
    20_000
}
fn default_idle_timeout_ms() -> u64 {
    60_000
}
fn default_presence_grace_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AiSection {
    /// Base64 AES-256-GCM key used to decrypt each game's stored AI credential.
    pub encryption_key_b64: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslationSection {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for TranslationSection {
    fn default() -> Self {
        Self { base_url: String::new(), api_key: String::new() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSection {
    #[serde(default = "default_player_rpm")]
    pub player_per_minute: u32,
    #[serde(default = "default_player_burst")]
    pub player_burst: u32,
    #[serde(default = "default_agent_rpm")]
    pub agent_per_minute: u32,
    #[serde(default = "default_agent_burst")]
    pub agent_burst: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            player_per_minute: default_player_rpm(),
            player_burst: default_player_burst(),
            agent_per_minute: default_agent_rpm(),
            agent_burst: default_agent_burst(),
        }
    }
}

fn default_player_rpm() -> u32 {
    200
}
fn default_player_burst() -> u32 {
    20
}
fn default_agent_rpm() -> u32 {
    600
}
fn default_agent_burst() -> u32 {
    60
}
