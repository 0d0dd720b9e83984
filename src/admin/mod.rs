//! Admin HTTP API.
//!
//! # Routes
//! - `GET /admin/status`: store status
//! - `GET /admin/groups`: groups announced to the admin context
//! - `POST /admin/rpc`: one JSON command
//! - `POST /admin/rpc/line`: one command in the FIFO line form
//!
//! Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::rpc::RpcDriver;
use crate::store::ConfigStore;

/// Shared state of the admin handlers.
///
/// All operators share one change context, so `set_delayed` from one request
/// is committed by a later `commit`.
#[derive(Clone)]
pub struct AdminState {
    pub store: ConfigStore,
    pub rpc: Arc<RpcDriver>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(store: ConfigStore, rpc: Arc<RpcDriver>, api_key: &str) -> Self {
        Self {
            store,
            rpc,
            api_key: api_key.into(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/groups", get(get_groups))
        .route("/admin/rpc", post(post_rpc))
        .route("/admin/rpc/line", post(post_rpc_line))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
