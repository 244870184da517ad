//! Operator HTTP API over a running membership client.
//!
//! # Data Flow
//! ```text
//! iman-cli / curl
//!     → auth.rs (bearer key)
//!     → handlers.rs
//!     → MembershipClient reads (table read lock)
//!       or register/deregister (registry pass-through)
//! ```

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::membership::MembershipClient;

#[derive(Clone)]
pub struct AdminState {
    pub client: MembershipClient,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(client: MembershipClient, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/instances", get(get_instances).post(register_instance))
        .route("/admin/instances/{hostname}", delete(deregister_instance))
        .route("/admin/holder/{key}", get(get_holder))
        .route("/admin/holders/{key}", get(get_holders))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
