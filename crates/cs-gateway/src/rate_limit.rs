//! HTTP-layer rate limiting (§6 env inputs "player/agent rate-limit
//! overrides", §9 decision 2): keyed by `userId`, `sessionId`, `ticketToken`,
//! or the caller's IP as a last resort, with `conversationHandle` tried
//! *first* for AI-adapter-calling endpoints so a single external AI
//! conversation is throttled as one unit regardless of which local identity
//! is driving it.
//!
//! Reuses [`cs_realtime::TokenBucket`] (the same per-connection limiter the
//! WebSocket hub uses) keyed through a `DashMap` the way the teacher's
//! `HandshakeDefender` keys its own `LeakyBucket` table per remote address.

use std::sync::Mutex;

use cs_realtime::TokenBucket;
use dashmap::DashMap;

pub enum RateLimitClass {
    Player,
    Agent,
}

pub struct HttpRateLimiter {
    player_per_minute: u32,
    player_burst: u32,
    agent_per_minute: u32,
    agent_burst: u32,
    buckets: DashMap<String, Mutex<TokenBucket>>,
}

impl HttpRateLimiter {
    pub fn new(player_per_minute: u32, player_burst: u32, agent_per_minute: u32, agent_burst: u32) -> Self {
        Self {
            player_per_minute,
            player_burst,
            agent_per_minute,
            agent_burst,
            buckets: DashMap::new(),
        }
    }

    /// Returns `true` if the request may proceed.
    pub fn check(&self, key: &str, class: RateLimitClass) -> bool {
        if let Some(bucket) = self.buckets.get(key) {
            return bucket
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .try_take_one();
        }
        let bucket = match class {
            RateLimitClass::Player => TokenBucket::new(self.player_per_minute, self.player_burst),
            RateLimitClass::Agent => TokenBucket::new(self.agent_per_minute, self.agent_burst),
        };
        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| Mutex::new(bucket));
        entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).try_take_one()
    }
}

/// Precedence chain for a general HTTP request: `userId` > `sessionId` >
/// `ticketToken` > remote IP.
pub fn general_key(user_id: Option<&str>, session_id: Option<&str>, ticket_token: Option<&str>, ip: &str) -> String {
    user_id
        .or(session_id)
        .or(ticket_token)
        .map(|s| s.to_string())
        .unwrap_or_else(|| ip.to_string())
}

/// Precedence chain for an AI-adapter-calling endpoint: `conversationHandle`
/// first, then the general chain (§9 decision 2).
pub fn ai_key(
    conversation_handle: Option<&str>,
    user_id: Option<&str>,
    session_id: Option<&str>,
    ticket_token: Option<&str>,
    ip: &str,
) -> String {
    conversation_handle
        .map(|s| s.to_string())
        .unwrap_or_else(|| general_key(user_id, session_id, ticket_token, ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_burst_then_blocks() {
        let limiter = HttpRateLimiter::new(60_000, 2, 60_000, 2);
        assert!(limiter.check("k", RateLimitClass::Player));
        assert!(limiter.check("k", RateLimitClass::Player));
        assert!(!limiter.check("k", RateLimitClass::Player));
    }

    #[test]
    fn ai_key_prefers_conversation_handle() {
        let key = ai_key(Some("conv-1"), Some("user-1"), None, None, "127.0.0.1");
        assert_eq!(key, "conv-1");
        let key = ai_key(None, Some("user-1"), None, None, "127.0.0.1");
        assert_eq!(key, "user-1");
    }
}
