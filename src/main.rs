use std::{net::SocketAddr, sync::Arc};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_checkout::{
    app::build_app,
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    payments::StripeClient,
    services::webhook_service::spawn_retry_worker,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,storefront_checkout=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let processor = Arc::new(StripeClient::new(&config.stripe));
    let addr = SocketAddr::from((config.host.parse::<std::net::IpAddr>()?, config.port));
    let reconcile_interval = config.payments.reconcile_interval;

    let state = AppState::new(orm, processor, config);
    let _retry_worker = spawn_retry_worker(state.clone(), reconcile_interval);

    let app = build_app(state);

    tracing::info!("listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}
