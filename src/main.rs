//! Shopcore - checkout, order lifecycle and payment webhooks

use anyhow::Result;
use shopcore::notify::{NatsNotifier, NoopNotifier, OrderNotifier};
use shopcore::store::{InMemoryStore, Stores};
use shopcore::{router, AppConfig, AppState};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = AppConfig::from_env()?;

    let stores = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Stores::postgres(db)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running on the in-memory store");
            Stores::in_memory(InMemoryStore::new())
        }
    };

    let notifier: Arc<dyn OrderNotifier> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsNotifier::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, order events will not be published");
                Arc::new(NoopNotifier)
            }
        },
        None => Arc::new(NoopNotifier),
    };

    let state = AppState::build(&config, stores, notifier, reqwest::Client::new());
    let app = router(state).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("🚀 Shopcore listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
