//! Shared application state (§1a, §4): the wiring point for every crate this
//! binary composes. `Arc`-friendly and cheaply `Clone`.

use std::sync::Arc;

use cs_ai::TranslationAdapter;
use cs_engine::SessionEngine;
use cs_realtime::RealtimeHub;
use cs_repo::Repo;

use crate::config::GatewayConfig;
use crate::obs::metrics::GatewayMetrics;
use crate::rate_limit::HttpRateLimiter;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: GatewayConfig,
    repo: Arc<dyn Repo>,
    engine: Arc<SessionEngine>,
    hub: Arc<RealtimeHub>,
    translation: Arc<dyn TranslationAdapter>,
    rate_limiter: HttpRateLimiter,
    metrics: GatewayMetrics,
}

impl AppState {
    pub fn new(
        cfg: GatewayConfig,
        repo: Arc<dyn Repo>,
        engine: Arc<SessionEngine>,
        hub: Arc<RealtimeHub>,
        translation: Arc<dyn TranslationAdapter>,
    ) -> Self {
        let rate_limiter = HttpRateLimiter::new(
            cfg.rate_limits.player_per_minute,
            cfg.rate_limits.player_burst,
            cfg.rate_limits.agent_per_minute,
            cfg.rate_limits.agent_burst,
        );
        Self {
            inner: Arc::new(AppStateInner {
                cfg,
                repo,
                engine,
                hub,
                translation,
                rate_limiter,
                metrics: GatewayMetrics::default(),
            }),
        }
    }

    pub fn cfg(&self) -> &GatewayConfig {
        &self.inner.cfg
    }

    pub fn repo(&self) -> &Arc<dyn Repo> {
        &self.inner.repo
    }

    pub fn engine(&self) -> &Arc<SessionEngine> {
        &self.inner.engine
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.inner.hub
    }

    pub fn translation(&self) -> &Arc<dyn TranslationAdapter> {
        &self.inner.translation
    }

    pub fn rate_limiter(&self) -> &HttpRateLimiter {
        &self.inner.rate_limiter
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.inner.metrics
    }
}
