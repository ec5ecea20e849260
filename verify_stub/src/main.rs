use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        Method, StatusCode,
    },
    response::{IntoResponse, Json},
    routing::{get, post},
    serve, Router,
};
use clap::Parser;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tier_catalog::SubscriptionTier;

use crate::cfg::Cfg;
use crate::storage::PaymentStore;

mod cfg;
mod http;
mod storage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Arc::new(Cfg::parse());
    let store = Arc::new(Mutex::new(seeded_store(&cfg)?));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers([ACCEPT, CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/verify-payment",
            post({
                let store = store.clone();
                let cfg = cfg.clone();
                move |body| http::handle_verify_payment(store.clone(), cfg.clone(), body)
            }),
        )
        .route(
            "/api/payment-status/{signature}",
            get({
                let store = store.clone();
                let cfg = cfg.clone();
                move |path| http::handle_payment_status(store.clone(), cfg.clone(), path)
            }),
        )
        .route(
            "/api/referral-info/{wallet}",
            get({
                let cfg = cfg.clone();
                move |path| http::handle_referral_info(cfg.clone(), path)
            }),
        )
        .route(
            "/api/prorate-quote",
            get({
                let store = store.clone();
                let cfg = cfg.clone();
                move |params| http::handle_prorate_quote(store.clone(), cfg.clone(), params)
            }),
        )
        .layer(cors);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", cfg.port)).await?;
    info!("Starting server at port {}", cfg.port);
    serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shutdown complete");
    Ok(())
}

// Graceful shutdown on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

fn seeded_store(cfg: &Cfg) -> Result<PaymentStore> {
    let mut store = PaymentStore::new();
    for entry in &cfg.seed_subscriptions {
        let (wallet, tier) = entry.split_once(':').ok_or_else(|| {
            anyhow!("Invalid seed subscription '{}', expected wallet:tier", entry)
        })?;
        let tier: SubscriptionTier = tier
            .parse()
            .with_context(|| format!("Invalid tier in seed subscription '{}'", entry))?;
        store.seed_subscription(wallet.to_string(), tier);
    }
    Ok(store)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    message: String,
}

async fn health_check() -> impl IntoResponse {
    let response = HealthResponse {
        status: "success".to_string(),
        message: "Service is healthy".to_string(),
    };
    (StatusCode::OK, Json(response))
}
