//! Gateway config loader (strict YAML parsing, §1a).

pub mod schema;

use std::fs;

use cs_core::{CsError, Result};

pub use schema::{AiSection, GatewayConfig, GatewaySection, RateLimitSection, TranslationSection};

pub fn load_from_file(path: &str) -> Result<GatewayConfig> {
    let s = fs::read_to_string(path).map_err(|e| CsError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<GatewayConfig> {
    let cfg: GatewayConfig =
        serde_yaml::from_str(s).map_err(|e| CsError::validation(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
