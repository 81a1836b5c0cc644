//! cs-gateway: the HTTP/WebSocket front door for the dispatch engine.
//!
//! - REST surface: ticket/session creation, transfer, agent actions (§6)
//! - WebSocket endpoint: `/v1/ws?token=...` (§4.7)
//! - Background tick: periodic `rescore_all` so queued sessions age (§4.5)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing_subscriber::{fmt, EnvFilter};

use cs_ai::{EncryptionKey, HttpAIAdapter, HttpTranslationAdapter};
use cs_engine::SessionEngine;
use cs_realtime::{RealtimeConfig, RealtimeHub};
use cs_repo::Repo;

use cs_gateway::{app_state, config, router};

const RESCORE_TICK: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config_path = std::env::var("CS_GATEWAY_CONFIG").unwrap_or_else(|_| "cs-gateway.yaml".to_string());
    let cfg = config::load_from_file(&config_path)?;
    let listen: SocketAddr = cfg.gateway.listen.parse()?;

    let repo: Arc<dyn Repo> = build_repo(&cfg.database_url).await?;

    let encryption_key_raw = BASE64.decode(cfg.ai.encryption_key_b64.as_bytes())?;
    let encryption_key = EncryptionKey::from_bytes(&encryption_key_raw)?;
    let ai = Arc::new(HttpAIAdapter::new(encryption_key));
    let translation = Arc::new(HttpTranslationAdapter::new(cfg.translation.base_url.clone(), cfg.translation.api_key.clone()));

    let realtime_config = RealtimeConfig {
        jwt_secret: cfg.jwt_secret.clone(),
        ping_interval_ms: cfg.gateway.ping_interval_ms,
        idle_timeout_ms: cfg.gateway.idle_timeout_ms,
        presence_grace_ms: cfg.gateway.presence_grace_ms,
        player_rate_per_minute: cfg.rate_limits.player_per_minute,
        player_rate_burst: cfg.rate_limits.player_burst,
        agent_rate_per_minute: cfg.rate_limits.agent_per_minute,
        agent_rate_burst: cfg.rate_limits.agent_burst,
        ..Default::default()
    };
    let hub = RealtimeHub::new(repo.clone(), realtime_config);
    let engine = SessionEngine::new(repo.clone(), ai, hub.clone());
    hub.set_engine(engine.clone());

    spawn_rescore_tick(engine.clone());

    let state = app_state::AppState::new(cfg, repo, engine, hub, translation);
    let app = router::build_router(state);

    tracing::info!(%listen, "cs-gateway starting");
    let listener = tokio::net::TcpListener::bind(listen).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

#[cfg(feature = "postgres")]
async fn build_repo(database_url: &str) -> anyhow::Result<Arc<dyn Repo>> {
    let repo = cs_repo::PostgresRepo::connect(database_url).await?;
    repo.run_migrations().await?;
    Ok(Arc::new(repo))
}

#[cfg(not(feature = "postgres"))]
async fn build_repo(_database_url: &str) -> anyhow::Result<Arc<dyn Repo>> {
    Ok(Arc::new(cs_repo::MemoryRepo::new()))
}

fn spawn_rescore_tick(engine: Arc<SessionEngine>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RESCORE_TICK);
        loop {
            interval.tick().await;
            if let Err(err) = engine.queue().rescore_all().await {
                tracing::warn!(%err, "rescore_all tick failed");
            }
        }
    });
}
