//! MedixMall Checkout - cart to paid order service

use anyhow::{Context, Result};
use medixmall_checkout::api::{self, AppState};
use medixmall_checkout::gateway::RazorpayClient;
use medixmall_checkout::notify::{EventPublisher, LogPublisher, NatsPublisher};
use medixmall_checkout::{AppConfig, CheckoutService, MemoryStore, PgStore, Store};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = AppConfig::from_env().context("invalid configuration")?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await.context("connecting to postgres")?),
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let publisher: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsPublisher::new(client)),
            Err(error) => {
                tracing::warn!(%error, "NATS unavailable, logging events instead");
                Arc::new(LogPublisher)
            }
        },
        None => Arc::new(LogPublisher),
    };

    let gateway = Arc::new(RazorpayClient::new(&config.razorpay));
    let service = Arc::new(CheckoutService::new(store, gateway, publisher, config.pricing.clone()));
    let app = api::router(AppState { service, admin_token: config.admin_token.clone() });

    tracing::info!("MedixMall Checkout listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}
