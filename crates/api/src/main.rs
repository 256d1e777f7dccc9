use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use forgeguard_api::{app::services::AppServices, config::ApiConfig};
use forgeguard_core::SystemClock;
use forgeguard_infra::TracingAuditSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forgeguard_observability::init();

    let config = ApiConfig::from_env()?;

    let services = if config.use_persistent_stores {
        AppServices::persistent(&config, Arc::new(TracingAuditSink)).await?
    } else {
        tracing::warn!("USE_PERSISTENT_STORES not set; sessions and profiles are in-memory");
        let (services, dev) =
            AppServices::in_memory(&config, Arc::new(SystemClock), Arc::new(TracingAuditSink));
        if let Some((login, password)) = &config.dev_admin {
            let id = dev.seed_admin(login, password)?;
            tracing::info!(principal_id = %id, login = %login, "seeded dev admin");
        }
        services
    };
    let services = Arc::new(services);

    let _sweeper = services
        .sessions
        .spawn_sweeper(config.session_sweep_interval);

    let app = forgeguard_api::app::build_app(services, &config);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
