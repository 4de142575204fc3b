// Routes module - wires every HTTP endpoint to its handler

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::SharedState;
use crate::handlers::*;

pub fn router(state: SharedState) -> Router {
    Router::new()
        // ===== HEALTH CHECK =====
        .route("/", get(health_check))
        .route("/health", get(health_check))
        // ===== USER ADMINISTRATION =====
        .route("/users", post(create_user).get(list_users))
        .route("/users/:id/disabled", put(set_user_disabled))
        // ===== WALLET ENDPOINTS =====
        .route("/balance/:user_id", get(get_balance))
        .route("/ledger/:user_id", get(get_ledger))
        // ===== MARKET ENDPOINTS =====
        .route("/markets", get(list_markets).post(create_market))
        .route("/markets/:id", get(get_market).delete(delete_market))
        // ===== BETTING & SETTLEMENT =====
        .route("/markets/:id/bets", get(list_bets).post(place_bet))
        .route("/markets/:id/resolve", post(resolve_market))
        .route("/markets/:id/cancel", post(cancel_market))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Endpoint summary printed at startup
pub const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("GET", "/health", "liveness"),
    ("POST", "/users", "create user + wallet (admin)"),
    ("GET", "/users", "list users with balances (admin)"),
    ("PUT", "/users/:id/disabled", "enable or disable a user (admin)"),
    ("GET", "/balance/:user_id", "wallet balance (owner or admin)"),
    ("GET", "/ledger/:user_id", "ledger history, newest first (owner or admin)"),
    ("GET", "/markets", "list markets (?status=&limit=)"),
    ("POST", "/markets", "create market (admin)"),
    ("GET", "/markets/:id", "market details"),
    ("DELETE", "/markets/:id", "delete a resolved or cancelled market (admin)"),
    ("GET", "/markets/:id/bets", "bets on a market"),
    ("POST", "/markets/:id/bets", "place a bet (as x-user-id)"),
    ("POST", "/markets/:id/resolve", "resolve and pay winners (admin)"),
    ("POST", "/markets/:id/cancel", "cancel and refund (admin)"),
];
