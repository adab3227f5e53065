// EPS Vintage - Web Server
// Read-only REST API over the point-in-time ledger (Axum)
//
// Environment:
//   EPS_DB      ledger path            (default eps.db)
//   EPS_PRICES  Date,Price CSV         (optional; enables /api/ratios)
//   EPS_ADDR    bind address           (default 0.0.0.0:3000)
//   EPS_VERBOSE any value turns on structured logs

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use eps_vintage::{
    logging, store, EstimateTable, PriceSeries, QuarterEstimate, RatioEngine, RatioRow, RatioType,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    prices: Option<Arc<PriceSeries>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
        .into_response()
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(message.into()),
    };
    (status, Json(body)).into_response()
}

/// One vintage row as served by /api/vintage
#[derive(Serialize)]
struct VintageResponse {
    requested: NaiveDate,
    report_date: NaiveDate,
    estimates: Vec<QuarterEstimate>,
}

impl AppState {
    fn table(&self) -> Result<EstimateTable, Response> {
        let conn = self
            .db
            .lock()
            .map_err(|_| failure(StatusCode::INTERNAL_SERVER_ERROR, "ledger lock poisoned"))?;
        store::load_table(&conn).map_err(|e| {
            tracing::error!(error = %e, "failed to load ledger");
            failure(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        })
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Response {
    ApiResponse::ok("OK")
}

/// GET /api/estimates - The whole point-in-time table
async fn get_estimates(State(state): State<AppState>) -> Response {
    match state.table() {
        Ok(table) => ApiResponse::ok(table),
        Err(response) => response,
    }
}

/// GET /api/vintage/:date - The row in effect on a given day
async fn get_vintage(State(state): State<AppState>, Path(date): Path<String>) -> Response {
    let Ok(requested) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") else {
        return failure(StatusCode::BAD_REQUEST, format!("bad date {:?}, expected YYYY-MM-DD", date));
    };
    let table = match state.table() {
        Ok(table) => table,
        Err(response) => return response,
    };

    match table.effective_vintage(requested) {
        Some((report_date, row)) => ApiResponse::ok(VintageResponse {
            requested,
            report_date,
            estimates: row.values().copied().collect(),
        }),
        None => failure(
            StatusCode::NOT_FOUND,
            format!("no report published on or before {}", requested),
        ),
    }
}

/// GET /api/ratios/:kind - forward | trailing
async fn get_ratios(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    let kind: RatioType = match kind.parse() {
        Ok(kind) => kind,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let Some(prices) = state.prices.clone() else {
        return failure(StatusCode::SERVICE_UNAVAILABLE, "EPS_PRICES not configured");
    };
    let table = match state.table() {
        Ok(table) => table,
        Err(response) => return response,
    };

    let rows: Vec<RatioRow> = RatioEngine::compute(&table, &prices, kind);
    ApiResponse::ok(rows)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(std::env::var_os("EPS_VERBOSE").is_some())?;

    println!("🌐 EPS Vintage - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::var("EPS_DB").unwrap_or_else(|_| "eps.db".to_string());
    let db_path = std::path::Path::new(&db_path);
    if !db_path.exists() {
        eprintln!("❌ Ledger not found at {:?}", db_path);
        eprintln!("   Run: eps-vintage ingest <charts>");
        std::process::exit(1);
    }
    let conn = store::open(db_path)?;
    println!("✓ Ledger opened: {:?}", db_path);

    let prices = match std::env::var("EPS_PRICES") {
        Ok(path) => {
            let series = PriceSeries::load_csv(std::path::Path::new(&path))?;
            println!("✓ Prices loaded: {} trading day(s)", series.len());
            Some(Arc::new(series))
        }
        Err(_) => {
            println!("⚠️  EPS_PRICES not set; /api/ratios disabled");
            None
        }
    };

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        prices,
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/estimates", get(get_estimates))
        .route("/vintage/:date", get(get_vintage))
        .route("/ratios/:kind", get(get_ratios))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = std::env::var("EPS_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/estimates", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .context("Server stopped with an error")?;

    Ok(())
}
