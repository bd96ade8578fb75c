// Filing Consolidator - Web Server
// Read-only REST API over the consolidated state

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use filing_consolidator::{
    AliasQuery, AuditEvent, ConsolidatedTransaction, Consolidator, ConsolidatorConfig, EntityKind, MasterEntity,
    MasterId, PeriodId, Quarantined, Resolution, ReviewDecision,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    consolidator: Arc<Mutex<Consolidator>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (StatusCode::OK, Json(Self { success: true, data: Some(data), error: None })).into_response()
    }

    fn fail(status: StatusCode, message: impl Into<String>) -> Response {
        let message = message.into();
        if status.is_server_error() {
            error!("{}", message);
        }
        (status, Json(Self { success: false, data: None, error: Some(message) })).into_response()
    }
}

#[derive(Deserialize)]
struct ResolveParams {
    name: Option<String>,
    ticker: Option<String>,
    cik: Option<String>,
    period: Option<String>,
    kind: Option<EntityKind>,
    as_of: NaiveDate,
}

#[derive(Deserialize)]
struct TransactionParams {
    company: Option<String>,
    insider: Option<String>,
}

#[derive(Serialize)]
struct ReviewItemResponse {
    candidate_id: String,
    kind: EntityKind,
    left: String,
    right: String,
    score: f64,
    reason: String,
    detail: String,
    decided_by: Option<String>,
    age_days: i64,
    stale: bool,
}

#[derive(Deserialize)]
struct QuarantineParams {
    period: Option<String>,
}

#[derive(Serialize)]
struct DecisionResponse {
    #[serde(flatten)]
    decision: ReviewDecision,
    outcome: String,
}

#[derive(Serialize)]
struct MasterResponse {
    master: MasterEntity,
    surviving: Option<MasterId>,
    versions: usize,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// GET /api/resolve?ticker=ACM&as_of=2006-02-01
async fn resolve(State(state): State<AppState>, Query(params): Query<ResolveParams>) -> Response {
    let period = match params.period.as_deref().map(str::parse::<PeriodId>).transpose() {
        Ok(p) => p,
        Err(e) => return ApiResponse::<Resolution>::fail(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let query = match (params.name, params.ticker, params.cik) {
        (Some(name), _, _) => AliasQuery::Name { kind: params.kind, name },
        (_, Some(ticker), _) => AliasQuery::Ticker { ticker },
        (_, _, Some(local_id)) => AliasQuery::LocalId { kind: params.kind, local_id, period },
        _ => {
            return ApiResponse::<Resolution>::fail(StatusCode::BAD_REQUEST, "one of name, ticker or cik is required")
        }
    };

    let consolidator = state.consolidator.lock();
    match consolidator.resolve(&query, params.as_of) {
        Ok(Some(hit)) => ApiResponse::ok(hit),
        Ok(None) => ApiResponse::<Resolution>::fail(StatusCode::NOT_FOUND, format!("no master known as {}", query)),
        Err(e) => ApiResponse::<Resolution>::fail(StatusCode::CONFLICT, e.to_string()),
    }
}

/// GET /api/masters/:id - Current version of a master
async fn get_master(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let consolidator = state.consolidator.lock();
    let id = MasterId::from_raw(id);
    let registry = consolidator.registry();
    match registry.get(&id) {
        Some(master) => ApiResponse::ok(MasterResponse {
            surviving: registry.surviving(&id),
            versions: registry.all_versions(&id).len(),
            master,
        }),
        None => ApiResponse::<MasterResponse>::fail(StatusCode::NOT_FOUND, format!("unknown master {}", id)),
    }
}

/// GET /api/masters/:id/audit - Audit trail of a master
async fn get_master_audit(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let consolidator = state.consolidator.lock();
    match consolidator.history(&MasterId::from_raw(id)) {
        Ok(history) => ApiResponse::ok(history.events),
        Err(e) => ApiResponse::<Vec<AuditEvent>>::fail(StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// GET /api/transactions?company=MC-…&insider=MI-…
async fn get_transactions(State(state): State<AppState>, Query(params): Query<TransactionParams>) -> Response {
    let consolidator = state.consolidator.lock();
    let view = consolidator.view();
    let rows: Vec<ConsolidatedTransaction> = view
        .rows()
        .iter()
        .filter(|r| params.company.as_deref().map_or(true, |c| r.master_company_id.as_str() == c))
        .filter(|r| params.insider.as_deref().map_or(true, |i| r.master_insider_id.as_str() == i))
        .cloned()
        .collect();
    ApiResponse::ok(rows)
}

/// GET /api/review - Open review items, oldest first
async fn get_review(State(state): State<AppState>) -> Response {
    let consolidator = state.consolidator.lock();
    let now = Utc::now();
    let max_age = consolidator.config().review.stale_after_days;
    let items: Vec<ReviewItemResponse> = consolidator
        .review_items()
        .into_iter()
        .map(|item| {
            let age_days = item.age(now).num_days();
            ReviewItemResponse {
                candidate_id: item.candidate.id.to_string(),
                kind: item.candidate.kind,
                left: item.candidate.left.to_string(),
                right: item.candidate.right.to_string(),
                score: item.candidate.score,
                reason: item.reason.reason_code().to_string(),
                detail: item.reason.to_string(),
                decided_by: item.candidate.decided_by.clone(),
                age_days,
                stale: age_days > max_age,
            }
        })
        .collect();
    ApiResponse::ok(items)
}

/// GET /api/review/decisions - Every decision received, oldest first
async fn get_review_decisions(State(state): State<AppState>) -> Response {
    let consolidator = state.consolidator.lock();
    match consolidator.review_decisions() {
        Ok(decisions) => {
            let rows: Vec<DecisionResponse> = decisions
                .into_iter()
                .map(|(decision, outcome)| DecisionResponse { decision, outcome })
                .collect();
            ApiResponse::ok(rows)
        }
        Err(e) => ApiResponse::<Vec<DecisionResponse>>::fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /api/quarantine?period=2006Q1
async fn get_quarantine(State(state): State<AppState>, Query(params): Query<QuarantineParams>) -> Response {
    let period = match params.period.as_deref().map(str::parse::<PeriodId>).transpose() {
        Ok(p) => p,
        Err(e) => return ApiResponse::<Vec<Quarantined>>::fail(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let consolidator = state.consolidator.lock();
    match consolidator.quarantine() {
        Ok(items) => {
            let items: Vec<Quarantined> = items
                .into_iter()
                .filter(|item| period.map_or(true, |p| item.period == p))
                .collect();
            ApiResponse::ok(items)
        }
        Err(e) => ApiResponse::<Vec<Quarantined>>::fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("filing_consolidator=info,consolidator_server=info,tower_http=info")),
        )
        .init();

    println!("🌐 Filing Consolidator - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = ConsolidatorConfig::from_env()?;
    let db_path = config.storage.db_path.clone();
    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: filing-consolidator ingest <DIR> && filing-consolidator run");
        std::process::exit(1);
    }

    let consolidator = Consolidator::open(config)?;
    println!("✓ Database opened: {:?}", db_path);
    info!(masters = consolidator.registry().master_count(), "state loaded");

    // Create shared state
    let state = AppState {
        consolidator: Arc::new(Mutex::new(consolidator)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/resolve", get(resolve))
        .route("/masters/:id", get(get_master))
        .route("/masters/:id/audit", get(get_master_audit))
        .route("/transactions", get(get_transactions))
        .route("/review", get(get_review))
        .route("/review/decisions", get(get_review_decisions))
        .route("/quarantine", get(get_quarantine))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    // Start server
    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr).await?;

    println!("\n🚀 Server running on http://localhost:3000");
    println!("   API: http://localhost:3000/api/transactions");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
