//! src/main.rs
mod config;
mod content;
mod delivery;
mod enrich;
mod generate;
mod locale;
mod pipeline;
mod prospect;
mod routes;
mod state;
mod store;

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router, Server,
};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::delivery::{DeliveryClient, HttpTransport};
use crate::enrich::HttpEnricher;
use crate::generate::OpenAiGenerator;
use crate::pipeline::AppContext;
use crate::routes::{get_status, post_run};
use crate::store::JsonStore;

fn build_context(settings: Settings) -> Result<AppContext> {
    let store = Arc::new(JsonStore::new(settings.store_path.clone()));
    let enricher = Arc::new(HttpEnricher::new(
        settings.enrich_api_url.clone(),
        settings.enrich_api_key.clone(),
        settings.http_timeout,
    )?);
    let transport = Arc::new(HttpTransport::new(
        settings.delivery_api_url.clone(),
        settings.delivery_api_key.clone(),
        settings.http_timeout,
    )?);
    let delivery = Arc::new(DeliveryClient::new(
        transport,
        settings.sender_email.clone(),
        settings.sender_name.clone(),
    ));
    let generator = Arc::new(OpenAiGenerator::new(
        settings.openai_api_key.clone(),
        settings.openai_model.clone(),
    ));
    Ok(AppContext {
        settings,
        store,
        enricher,
        delivery,
        generator,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // ── 1. settings + clients: missing credentials abort before any phase ──
    let settings = Settings::from_env().context("load settings")?;
    let bind_addr: SocketAddr = settings.bind_addr.parse().context("parse BIND_ADDR")?;
    let ctx = Arc::new(build_context(settings).context("initialize clients")?);

    // ── 2. build router ────────────────────────────────────────────────
    let app = Router::new()
        .route("/run", post(post_run))
        .route("/status", get(get_status))
        .with_state(ctx);

    // ── 3. serve ───────────────────────────────────────────────────────
    tracing::info!(%bind_addr, "outreach agent listening");
    Server::bind(&bind_addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
