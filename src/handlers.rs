// HTTP request handlers for the play-money market API

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::app_state::SharedState;
use crate::auth::{Action, Actor};
use crate::error::{EngineError, ErrorKind};
use crate::models::MarketStatus;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

// ===== ERRORS =====

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn forbidden() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            kind: "forbidden",
            message: "not allowed".into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: ErrorKind::Validation.as_str(),
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::Validation | ErrorKind::InsufficientFunds => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::StateConflict => StatusCode::CONFLICT,
            ErrorKind::TransactionConflict => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %err, "request failed");
        }
        // storage details stay in the logs
        let message = match kind {
            ErrorKind::Internal => "internal error".to_string(),
            _ => err.to_string(),
        };
        Self {
            status,
            kind: kind.as_str(),
            message,
        }
    }
}

// malformed bodies and query strings get the same error shape as engine errors
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
            "kind": self.kind,
        }));
        (self.status, body).into_response()
    }
}

pub type ApiResult = Result<Json<Value>, ApiError>;

fn require(state: &SharedState, headers: &HeaderMap, action: Action) -> Result<Actor, ApiError> {
    let actor = Actor::from_headers(headers);
    if state.authorizer.authorize(&action, &actor) {
        Ok(actor)
    } else {
        warn!(?action, user_id = ?actor.user_id, "request denied");
        Err(ApiError::forbidden())
    }
}

fn list_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
}

// ===== REQUEST TYPES =====

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub user_id: Option<String>,
    pub display_name: String,
    pub initial_balance: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SetDisabledRequest {
    pub disabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMarketRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub options: Vec<String>,
    pub close_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct PlaceBetRequest {
    pub user_id: String,
    pub option: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub winning_option: String,
}

// ===== HEALTH =====

pub async fn health_check() -> Json<Value> {
    Json(json!({ "success": true, "service": "playmoney-market", "status": "ok" }))
}

// ===== USERS & WALLETS =====

pub async fn create_user(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult {
    require(&state, &headers, Action::ManageUsers)?;
    let Json(req) = payload?;
    let user = state
        .engine
        .create_user(req.user_id.as_deref(), &req.display_name, req.initial_balance)?;
    let balance = state.engine.get_balance(&user.user_id)?;
    Ok(Json(json!({ "success": true, "user": user, "balance": balance })))
}

pub async fn list_users(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    require(&state, &headers, Action::ManageUsers)?;
    let users = state.engine.list_users()?;
    Ok(Json(json!({ "success": true, "count": users.len(), "users": users })))
}

pub async fn set_user_disabled(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    payload: Result<Json<SetDisabledRequest>, JsonRejection>,
) -> ApiResult {
    require(&state, &headers, Action::ManageUsers)?;
    let Json(req) = payload?;
    let user = state.engine.set_user_disabled(&user_id, req.disabled)?;
    Ok(Json(json!({ "success": true, "user": user })))
}

pub async fn get_balance(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult {
    require(&state, &headers, Action::ViewWallet { user_id: user_id.clone() })?;
    let balance = state.engine.get_balance(&user_id)?;
    Ok(Json(json!({ "success": true, "user_id": user_id, "balance": balance })))
}

pub async fn get_ledger(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult {
    require(&state, &headers, Action::ViewWallet { user_id: user_id.clone() })?;
    let Query(query) = query?;
    let entries = state.engine.list_ledger(&user_id, list_limit(query.limit))?;
    Ok(Json(json!({ "success": true, "user_id": user_id, "entries": entries })))
}

// ===== MARKETS =====

pub async fn list_markets(
    State(state): State<SharedState>,
    query: Result<Query<MarketsQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            MarketStatus::parse(raw).ok_or_else(|| ApiError::bad_request(format!("unknown status '{}'", raw)))?,
        ),
    };
    let markets = state.engine.list_markets(status, list_limit(query.limit))?;
    Ok(Json(json!({ "success": true, "count": markets.len(), "markets": markets })))
}

pub async fn create_market(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<CreateMarketRequest>, JsonRejection>,
) -> ApiResult {
    require(&state, &headers, Action::ManageMarkets)?;
    let Json(req) = payload?;
    let market = state
        .engine
        .create_market(&req.title, &req.description, req.options, req.close_time)?;
    Ok(Json(json!({ "success": true, "market_id": market.id, "market": market })))
}

pub async fn get_market(State(state): State<SharedState>, Path(market_id): Path<String>) -> ApiResult {
    let market = state
        .engine
        .get_market(&market_id)?
        .ok_or_else(|| EngineError::MarketNotFound(market_id.clone()))?;
    let settling = state.engine.get_settlement(&market_id)?.is_some();
    Ok(Json(json!({ "success": true, "market": market, "settling": settling })))
}

pub async fn delete_market(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(market_id): Path<String>,
) -> ApiResult {
    require(&state, &headers, Action::ManageMarkets)?;
    let deleted = state.engine.delete_market(&market_id)?;
    Ok(Json(json!({ "success": true, "market_id": deleted.market_id, "bets_deleted": deleted.bets_deleted })))
}

// ===== BETTING & SETTLEMENT =====

pub async fn list_bets(State(state): State<SharedState>, Path(market_id): Path<String>) -> ApiResult {
    let bets = state.engine.list_bets(&market_id)?;
    Ok(Json(json!({ "success": true, "market_id": market_id, "count": bets.len(), "bets": bets })))
}

pub async fn place_bet(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(market_id): Path<String>,
    payload: Result<Json<PlaceBetRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload?;
    require(&state, &headers, Action::PlaceBet { user_id: req.user_id.clone() })?;
    let bet = state
        .engine
        .place_bet(&market_id, &req.user_id, &req.option, req.amount)
        .inspect_err(|e| warn!(market_id = %market_id, user_id = %req.user_id, error = %e, "bet rejected"))?;
    let balance = state.engine.get_balance(&req.user_id)?;
    Ok(Json(json!({ "success": true, "bet": bet, "balance": balance })))
}

pub async fn resolve_market(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(market_id): Path<String>,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> ApiResult {
    require(&state, &headers, Action::ManageMarkets)?;
    let Json(req) = payload?;
    let report = state
        .engine
        .resolve_market(&market_id, &req.winning_option)
        .inspect_err(|e| warn!(market_id = %market_id, error = %e, "resolve rejected"))?;
    Ok(Json(json!({ "success": true, "settlement": report })))
}

pub async fn cancel_market(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(market_id): Path<String>,
) -> ApiResult {
    require(&state, &headers, Action::ManageMarkets)?;
    let report = state
        .engine
        .cancel_market(&market_id)
        .inspect_err(|e| warn!(market_id = %market_id, error = %e, "cancel rejected"))?;
    Ok(Json(json!({ "success": true, "settlement": report })))
}
