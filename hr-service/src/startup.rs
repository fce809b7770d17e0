//! Application startup and lifecycle management.

use crate::config::Config;
use crate::handlers;
use crate::models::ProfileStatus;
use crate::services::{init_metrics, Database, MercadoPagoClient, PayuClient};
use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::cache::TtlCache;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub payu: PayuClient,
    pub mercadopago: MercadoPagoClient,
    /// Profile tier lookups for plan-limit checks; injected so tests can
    /// construct and reset their own instance.
    pub profile_cache: Arc<TtlCache<Uuid, ProfileStatus>>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the harness.
    pub async fn build_without_migrations(config: Config) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: Config, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            secrecy::ExposeSecret::expose_secret(&config.database.url),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }
        let db = Arc::new(db);

        let payu = PayuClient::new(config.payu.clone());
        if payu.is_configured() {
            tracing::info!("PayU client initialized");
        } else {
            tracing::warn!("PayU credentials not configured - PayU webhooks will be rejected");
        }

        let mercadopago = MercadoPagoClient::new(config.mercadopago.clone())?;
        if !mercadopago.is_configured() {
            tracing::warn!(
                "MercadoPago credentials not configured - payment lookups will be limited"
            );
        }

        let profile_cache = Arc::new(TtlCache::new(Duration::from_secs(
            config.plan_limits.profile_cache_ttl_seconds,
        )));

        let state = AppState {
            config: config.clone(),
            db,
            payu,
            mercadopago,
            profile_cache,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "hr-service listener bound");

        Ok(Self {
            port,
            listener,
            router: build_router(state),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = "hr-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, self.router).await
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_handler))
        // Payroll (company-scoped)
        .route(
            "/api/payroll/configs",
            post(handlers::payroll::create_config).get(handlers::payroll::list_configs),
        )
        .route("/api/payroll/configs/:year", get(handlers::payroll::get_config))
        .route("/api/payroll/deductions", post(handlers::payroll::calculate))
        .route("/api/payroll/summary", get(handlers::payroll::summary))
        .route(
            "/api/employees",
            post(handlers::employees::create_employee).get(handlers::employees::list_employees),
        )
        // Subscription lifecycle
        .route("/api/subscriptions", post(handlers::subscriptions::create_checkout))
        .route(
            "/api/subscriptions/:user_id",
            get(handlers::subscriptions::get_status),
        )
        .route("/api/subscriptions/cancel", post(handlers::subscriptions::cancel))
        .route(
            "/api/subscriptions/reconcile",
            post(handlers::subscriptions::reconcile),
        )
        // Provider webhooks; /api/payu/confirmation is the legacy alias PayU
        // accounts were configured with.
        .route("/api/webhooks/payu", post(handlers::payu::confirmation))
        .route("/api/payu/confirmation", post(handlers::payu::confirmation))
        .route("/api/payu/response", post(handlers::payu::response))
        .route("/api/payu/signature", post(handlers::payu::checkout_signature))
        .route(
            "/api/webhooks/mercadopago",
            post(handlers::mercadopago::webhook),
        )
        .route(
            "/api/webhooks/cancel",
            post(handlers::subscriptions::cancel_webhook),
        )
        // Scheduled cleanup
        .route(
            "/api/cron/subscription-cleanup",
            post(handlers::cleanup::run_cleanup).get(handlers::cleanup::liveness),
        )
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .with_state(state)
}
