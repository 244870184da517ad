use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::membership::{ClientError, Instance, LookupError};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub service: String,
    pub rings: usize,
    pub alive: usize,
    pub pending: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub hostname: String,
    pub address: String,
}

/// Handler failures mapped onto HTTP statuses.
#[derive(Debug)]
pub enum AdminError {
    /// Ring empty or transiently out of step with the table.
    Lookup(LookupError),
    /// Registry write failed.
    Registry(ClientError),
    BadRequest(&'static str),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminError::Lookup(e) => (StatusCode::NOT_FOUND, e.to_string()),
            AdminError::Registry(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            AdminError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<LookupError> for AdminError {
    fn from(e: LookupError) -> Self {
        AdminError::Lookup(e)
    }
}

impl From<ClientError> for AdminError {
    fn from(e: ClientError) -> Self {
        AdminError::Registry(e)
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let (alive, pending) = state.client.counts();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if state.client.is_running() {
            "operational"
        } else {
            "stopped"
        },
        service: state.client.config().service_name.clone(),
        rings: state.client.ring_count(),
        alive,
        pending,
    })
}

pub async fn get_instances(State(state): State<AdminState>) -> Json<Vec<Instance>> {
    let mut instances = state.client.instances();
    instances.sort_by(|a, b| a.name().cmp(b.name()));
    Json(instances)
}

pub async fn get_holder(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> Result<Json<Instance>, AdminError> {
    Ok(Json(state.client.data_holder(&key)?))
}

pub async fn get_holders(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<Instance>>, AdminError> {
    Ok(Json(state.client.data_holders(&key)?))
}

pub async fn register_instance(
    State(state): State<AdminState>,
    Json(request): Json<RegisterRequest>,
) -> Result<StatusCode, AdminError> {
    if request.hostname.trim().is_empty() {
        return Err(AdminError::BadRequest("hostname must not be empty"));
    }
    if request.address.trim().is_empty() {
        return Err(AdminError::BadRequest("address must not be empty"));
    }

    state
        .client
        .register(&request.hostname, &request.address)
        .await?;
    // Visible after the next registry poll.
    Ok(StatusCode::ACCEPTED)
}

pub async fn deregister_instance(
    State(state): State<AdminState>,
    Path(hostname): Path<String>,
) -> Result<StatusCode, AdminError> {
    state.client.deregister(&hostname).await?;
    Ok(StatusCode::ACCEPTED)
}
