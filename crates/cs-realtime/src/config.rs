//! Deployment-tunable knobs for the hub (§4.7), mirroring the teacher's
//! `HandshakeConfig` as a plain struct passed in at construction rather than
//! read from disk here — `cs-gateway`'s config layer owns parsing.

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// HMAC secret verifying the JWT carried by AGENT/ADMIN connections.
    pub jwt_secret: String,
    pub ping_interval_ms: u64,
    pub idle_timeout_ms: u64,
    /// How long a disconnected agent's presence lingers before `isOnline`
    /// flips to false, to tolerate a quick reconnect.
    pub presence_grace_ms: u64,
    pub player_rate_per_minute: u32,
    pub player_rate_burst: u32,
    pub agent_rate_per_minute: u32,
    pub agent_rate_burst: u32,
    /// Minimum gap between repeated `error{code:429001}` notices to the same
    /// connection.
    pub rate_limit_notice_cooldown_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            ping_interval_ms: 20_000,
            idle_timeout_ms: 60_000,
            presence_grace_ms: 30_000,
            player_rate_per_minute: 200,
            player_rate_burst: 20,
            agent_rate_per_minute: 600,
            agent_rate_burst: 60,
            rate_limit_notice_cooldown_ms: 1_000,
        }
    }
}
