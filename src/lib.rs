pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod qris;
pub mod services;
pub mod upstream;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::config::Config;
use crate::middleware::rate_limit::MerchantRateLimiter;
use crate::services::WebhookSender;
use crate::upstream::CreditProvider;

/// Long-lived process resources, constructed once in `main` (or a test)
/// and injected everywhere else.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub upstream: Arc<dyn CreditProvider>,
    pub rate_limiter: MerchantRateLimiter,
    pub webhook_sender: WebhookSender,
}

impl AppState {
    pub fn new(db: sqlx::SqlitePool, config: Config, upstream: Arc<dyn CreditProvider>) -> Self {
        let rate_limiter = MerchantRateLimiter::new(config.rate_limit_per_min);
        let webhook_sender = WebhookSender::new(config.webhook_timeout_ms);
        Self {
            db,
            config,
            upstream,
            rate_limiter,
            webhook_sender,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/invoices",
            post(handlers::invoices::create).get(handlers::invoices::list),
        )
        .route("/invoices/:id", get(handlers::invoices::get_one))
        .route("/invoices/:id/check", post(handlers::invoices::check))
        .route("/invoices/:id/events", get(handlers::invoices::events))
        .route("/invoices/:id/refunds", post(handlers::invoices::refund))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::require_signed_request,
        ))
        .with_state(state)
}
