//! API server for Wardline

use anyhow::Result;
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::context::AppContext;

use super::middleware::auth_middleware;
use super::rate_limit::rate_limit_middleware;
use super::routes::{
    agent_query, health_check, list_alerts, login, logout, notify, patient, publish_alert,
    record_vitals, verify,
};
use super::ws::ws_handler;

/// API server
pub struct ApiServer {
    ctx: Arc<AppContext>,
}

impl ApiServer {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Build the route table
    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route("/logout", post(logout))
            .route("/verify", get(verify))
            .route("/api/agents/query", post(agent_query))
            .route("/api/patients/:id", get(patient))
            .route("/api/vitals/:patient_id", post(record_vitals))
            .route("/api/alerts", get(list_alerts).post(publish_alert))
            .route("/api/notifications", post(notify))
            .route_layer(from_fn_with_state(self.ctx.clone(), auth_middleware))
            // outermost, so rejected credentials still count
            .route_layer(from_fn_with_state(self.ctx.clone(), rate_limit_middleware));

        Router::new()
            // Public routes
            .route("/health", get(health_check))
            .route("/login", post(login))
            .route("/ws", get(ws_handler))
            .merge(protected)
            .layer(CorsLayer::permissive())
            .with_state(self.ctx.clone())
    }

    /// Serve until ctrl-c
    pub async fn start(self) -> Result<()> {
        self.start_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serve until `signal` resolves, then detach from the bus
    pub async fn start_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        let addr = self.ctx.config.addr();
        info!("Starting API server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(signal)
            .await?;

        self.ctx.shutdown().await;
        info!("API server stopped");
        Ok(())
    }
}
