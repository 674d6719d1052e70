//! Operator control server
//!
//! Provides an HTTP API for the emergency kill switch and status
//! inspection. A halt issued here takes effect immediately: the
//! governor rejects every proposal and the orchestrator re-checks the
//! stop right before submission, so a late halt still prevents the
//! broadcast.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use poolwarden_core::{Batch, BalanceSnapshot, ControlConfig, DailyUsage};
use poolwarden_ledger::{
    BatchRepository, ContributionRepository, Database, DailyUsageRepository, SnapshotRepository,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::governor::SafetyGovernor;

/// Control server error
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Shared state for the control server
pub struct ControlState {
    governor: Arc<SafetyGovernor>,
    db: Database,
}

impl ControlState {
    pub fn new(governor: Arc<SafetyGovernor>, db: Database) -> Self {
        Self { governor, db }
    }
}

/// Control server for the emergency kill switch
pub struct ControlServer {
    config: ControlConfig,
    state: Arc<ControlState>,
}

impl ControlServer {
    pub fn new(config: ControlConfig, governor: Arc<SafetyGovernor>, db: Database) -> Self {
        let state = Arc::new(ControlState::new(governor, db));
        Self { config, state }
    }

    /// Build the axum router
    fn build_router(&self) -> Router {
        let auth_token = self.config.auth_token.clone();

        let router = Router::new()
            .route("/halt", post(halt_handler))
            .route("/resume", post(resume_handler))
            .route("/status", get(status_handler))
            .route("/contributions", post(contribution_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone());

        // Add auth middleware if token is configured
        if let Some(token) = auth_token {
            router.layer(middleware::from_fn(move |req, next| {
                auth_middleware(req, next, token.clone())
            }))
        } else {
            router
        }
    }

    /// Run the control server
    pub async fn run(self) -> Result<(), ControlError> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        info!(address = %self.config.listen_addr, "Control server listening");

        let router = self.build_router();
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "Control server error");
        }

        Ok(())
    }
}

/// Authentication middleware
async fn auth_middleware(req: Request, next: Next, expected_token: String) -> Response {
    // Allow health check without auth
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(header) if header.starts_with("Bearer ") => {
            let token = header.trim_start_matches("Bearer ");
            if token == expected_token {
                next.run(req).await
            } else {
                (StatusCode::UNAUTHORIZED, "Invalid token").into_response()
            }
        }
        _ => (StatusCode::UNAUTHORIZED, "Missing or invalid Authorization header").into_response(),
    }
}

/// Response for status endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub emergency_stop: bool,
    pub latest_snapshot: Option<BalanceSnapshot>,
    pub open_batch: Option<Batch>,
    pub today_usage: Option<DailyUsage>,
}

/// Request for halt endpoint
#[derive(Debug, Deserialize)]
pub struct HaltRequest {
    pub reason: Option<String>,
}

/// Request for resume endpoint
#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub confirmation: Option<String>,
}

/// Response for generic operations
#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /halt - Immediately halt batch execution
async fn halt_handler(
    State(state): State<Arc<ControlState>>,
    Json(req): Json<HaltRequest>,
) -> impl IntoResponse {
    let reason = req.reason.unwrap_or_else(|| "Manual halt via API".to_string());
    state.governor.halt(&reason);

    info!(reason = %reason, "Execution halted via control API");

    Json(OperationResponse {
        success: true,
        message: format!("Execution halted: {}", reason),
    })
}

/// POST /resume - Resume batch execution
async fn resume_handler(
    State(state): State<Arc<ControlState>>,
    Json(req): Json<ResumeRequest>,
) -> impl IntoResponse {
    // Require explicit confirmation
    if req.confirmation.as_deref() != Some("CONFIRM_RESUME") {
        return (
            StatusCode::BAD_REQUEST,
            Json(OperationResponse {
                success: false,
                message: "Must provide confirmation: CONFIRM_RESUME".to_string(),
            }),
        );
    }

    state.governor.resume();
    info!("Execution resumed via control API");

    (
        StatusCode::OK,
        Json(OperationResponse {
            success: true,
            message: "Execution resumed".to_string(),
        }),
    )
}

/// Request body for the contribution attribution feed
#[derive(Debug, Deserialize)]
pub struct ContributionRequest {
    pub depositor: String,
    pub amount_a: Decimal,
    pub amount_b: Decimal,
}

/// POST /contributions - Ingest point for the external attribution
/// feed. Appends a record crediting a depositor; consumed records are
/// stamped by the attribution ledger, never through this API.
async fn contribution_handler(
    State(state): State<Arc<ControlState>>,
    Json(req): Json<ContributionRequest>,
) -> impl IntoResponse {
    if req.amount_a < Decimal::ZERO || req.amount_b < Decimal::ZERO {
        return (
            StatusCode::BAD_REQUEST,
            Json(OperationResponse {
                success: false,
                message: "Contribution amounts must be non-negative".to_string(),
            }),
        );
    }

    match ContributionRepository::new(&state.db)
        .insert(&req.depositor, req.amount_a, req.amount_b, chrono::Utc::now())
        .await
    {
        Ok(id) => {
            info!(
                contribution_id = id,
                depositor = %req.depositor,
                amount_a = %req.amount_a,
                amount_b = %req.amount_b,
                "Contribution recorded"
            );
            (
                StatusCode::OK,
                Json(OperationResponse {
                    success: true,
                    message: format!("Contribution {} recorded", id),
                }),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(OperationResponse {
                success: false,
                message: e.to_string(),
            }),
        ),
    }
}

/// GET /status - Current engine status
async fn status_handler(State(state): State<Arc<ControlState>>) -> impl IntoResponse {
    let halted = state.governor.is_halted();
    let halt_reason = state.governor.halt_reason().await;
    let emergency_stop = state.governor.current_config().await.emergency_stop;

    let latest_snapshot = SnapshotRepository::new(&state.db)
        .latest()
        .await
        .unwrap_or(None);
    let open_batch = BatchRepository::new(&state.db)
        .current_open()
        .await
        .unwrap_or(None);
    let today = poolwarden_core::utc_day(chrono::Utc::now());
    let today_usage = DailyUsageRepository::new(&state.db)
        .get(&today)
        .await
        .unwrap_or(None);

    Json(StatusResponse {
        halted,
        halt_reason,
        emergency_stop,
        latest_snapshot,
        open_batch,
        today_usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::GrantAll;
    use poolwarden_core::SafetyConfig;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn halt_and_resume_drive_the_governor() {
        let governor = Arc::new(SafetyGovernor::new(
            SafetyConfig::default(),
            Arc::new(GrantAll),
        ));
        let db = Database::in_memory().await.unwrap();
        let state = Arc::new(ControlState::new(governor.clone(), db));

        halt_handler(
            State(state.clone()),
            Json(HaltRequest {
                reason: Some("drill".to_string()),
            }),
        )
        .await;
        assert!(governor.is_halted());
        assert_eq!(governor.halt_reason().await.as_deref(), Some("drill"));

        // Resume without confirmation is refused
        resume_handler(
            State(state.clone()),
            Json(ResumeRequest { confirmation: None }),
        )
        .await;
        assert!(governor.is_halted());

        resume_handler(
            State(state),
            Json(ResumeRequest {
                confirmation: Some("CONFIRM_RESUME".to_string()),
            }),
        )
        .await;
        assert!(!governor.is_halted());
    }

    #[tokio::test]
    async fn contribution_feed_appends_records() {
        let governor = Arc::new(SafetyGovernor::new(
            SafetyConfig::default(),
            Arc::new(GrantAll),
        ));
        let db = Database::in_memory().await.unwrap();
        let state = Arc::new(ControlState::new(governor, db.clone()));

        contribution_handler(
            State(state.clone()),
            Json(ContributionRequest {
                depositor: "0xdep1".to_string(),
                amount_a: dec!(25),
                amount_b: dec!(2.5),
            }),
        )
        .await;

        let open = ContributionRepository::new(&db).unstamped().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].depositor, "0xdep1");
        assert_eq!(open[0].amount_a, dec!(25));

        // Negative amounts are refused and leave no record
        contribution_handler(
            State(state),
            Json(ContributionRequest {
                depositor: "0xdep2".to_string(),
                amount_a: dec!(-1),
                amount_b: dec!(0),
            }),
        )
        .await;
        assert_eq!(
            ContributionRepository::new(&db).unstamped().await.unwrap().len(),
            1
        );
    }
}
