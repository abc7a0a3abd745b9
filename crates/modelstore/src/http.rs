//! HTTP trigger: `GET|POST /?project=..&region=..` runs one harvest.
//!
//! Responses are plain text `OK` / `NOK`. Harvests run on the blocking
//! pool; a scope already being harvested by this process is refused.

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use modelstore_harvest::HarvestReport;
use modelstore_protocol::defaults::{RESPONSE_NOK, RESPONSE_OK};
use modelstore_protocol::Scope;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Runs one harvest for a scope. Called on a blocking thread.
pub trait HarvestBackend: Send + Sync + 'static {
    fn harvest(&self, scope: &Scope) -> Result<HarvestReport>;
}

#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn HarvestBackend>,
    in_flight: Arc<Mutex<HashSet<Scope>>>,
}

impl AppState {
    pub fn new(backend: Arc<dyn HarvestBackend>) -> Self {
        Self {
            backend,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn claim(&self, scope: &Scope) -> Option<InFlightGuard> {
        let mut scopes = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !scopes.insert(scope.clone()) {
            return None;
        }
        Some(InFlightGuard {
            scopes: self.in_flight.clone(),
            scope: scope.clone(),
        })
    }
}

/// Releases the scope when the request finishes, including on panic.
struct InFlightGuard {
    scopes: Arc<Mutex<HashSet<Scope>>>,
    scope: Scope,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes.remove(&self.scope);
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerParams {
    pub project: Option<String>,
    pub region: Option<String>,
}

impl TriggerParams {
    fn scope(self) -> Option<Scope> {
        let project = self.project.filter(|p| !p.trim().is_empty())?;
        let region = self.region.filter(|r| !r.trim().is_empty())?;
        Some(Scope::new(project, region))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(trigger).post(trigger))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    RESPONSE_OK
}

async fn trigger(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
) -> (StatusCode, &'static str) {
    let described = format!("project={:?} region={:?}", params.project, params.region);
    let Some(scope) = params.scope() else {
        error!("Missing required parameters: {}", described);
        return (StatusCode::BAD_REQUEST, RESPONSE_NOK);
    };

    let Some(_guard) = state.claim(&scope) else {
        warn!("[{}] Harvest already running, refusing request", scope);
        return (StatusCode::CONFLICT, RESPONSE_NOK);
    };

    let backend = state.backend.clone();
    let task_scope = scope.clone();
    match tokio::task::spawn_blocking(move || backend.harvest(&task_scope)).await {
        Ok(Ok(report)) => {
            info!(
                "[{}] Harvest complete: {} runs, {} rows written",
                scope, report.harvested, report.rows_written
            );
            (StatusCode::OK, RESPONSE_OK)
        }
        Ok(Err(err)) => {
            error!("[{}] Harvest failed: {:#}", scope, err);
            (StatusCode::INTERNAL_SERVER_ERROR, RESPONSE_NOK)
        }
        Err(err) => {
            error!("[{}] Harvest task aborted: {}", scope, err);
            (StatusCode::INTERNAL_SERVER_ERROR, RESPONSE_NOK)
        }
    }
}

/// Serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
