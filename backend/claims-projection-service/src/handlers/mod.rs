//! HTTP presentation layer over [`QueryService`]
//!
//! Query routes answer 503 until the session has replayed the topic backlog.

use actix_web::{get, web, HttpResponse};
use prometheus::Registry;
use serde::Serialize;

use crate::error::{ProjectionError, Result};
use crate::metrics;
use crate::query::QueryService;
use crate::services::cdc::{Record, SessionHealth};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub health: SessionHealth,
    pub registry: Registry,
    pub port: u16,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ready: bool,
    pub rows: usize,
    pub consecutive_errors: u32,
    pub seconds_since_last_success: u64,
}

fn ensure_ready(state: &AppState) -> Result<()> {
    if state.query.is_ready() {
        Ok(())
    } else {
        Err(ProjectionError::NotReady)
    }
}

fn quote_response(state: &AppState, id: &str) -> Result<HttpResponse> {
    ensure_ready(state)?;
    let record = state
        .query
        .get_by_key(id)
        .ok_or_else(|| ProjectionError::NotFound(format!("No quote with id {}", id)))?;
    Ok(HttpResponse::Ok().json(&*record))
}

fn all_quotes_response(state: &AppState) -> Result<HttpResponse> {
    ensure_ready(state)?;
    let rows = state.query.get_all();
    let body: Vec<&Record> = rows.iter().map(|row| &**row).collect();
    Ok(HttpResponse::Ok().json(body))
}

#[get("/")]
pub async fn banner(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain").body(format!(
        "Claims projection service running on port {}\n\
         GET /quoteid={{id}} or /quotes/{{id}} for one quote, /getalldata or /quotes for all\n",
        state.port
    ))
}

/// Get a quote by id
/// GET /quoteid={id}
#[get("/quoteid={id}")]
pub async fn get_quote_by_id(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    quote_response(&state, &id)
}

/// Get a quote by id
/// GET /quotes/{id}
#[get("/quotes/{id}")]
pub async fn get_quote(state: web::Data<AppState>, id: web::Path<String>) -> Result<HttpResponse> {
    quote_response(&state, &id)
}

/// Every projected quote
/// GET /getalldata
#[get("/getalldata")]
pub async fn get_all_data(state: web::Data<AppState>) -> Result<HttpResponse> {
    all_quotes_response(&state)
}

/// Every projected quote
/// GET /quotes
#[get("/quotes")]
pub async fn list_quotes(state: web::Data<AppState>) -> Result<HttpResponse> {
    all_quotes_response(&state)
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let status = state.health.status();

    HttpResponse::Ok().json(HealthResponse {
        status: if status.healthy { "ok" } else { "degraded" },
        ready: status.ready,
        rows: status.rows,
        consecutive_errors: status.consecutive_errors,
        seconds_since_last_success: status.time_since_last_success.as_secs(),
    })
}

#[get("/ready")]
pub async fn ready(state: web::Data<AppState>) -> Result<HttpResponse> {
    ensure_ready(&state)?;
    Ok(HttpResponse::Ok().body("READY"))
}

#[get("/metrics")]
pub async fn metrics_handler(state: web::Data<AppState>) -> Result<HttpResponse> {
    let (content_type, body) = metrics::render(&state.registry)?;
    Ok(HttpResponse::Ok().content_type(content_type).body(body))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(banner)
        .service(get_quote_by_id)
        .service(get_quote)
        .service(get_all_data)
        .service(list_quotes)
        .service(health)
        .service(ready)
        .service(metrics_handler);
}
