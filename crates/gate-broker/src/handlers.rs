use axum::extract::{Query, State};
use axum::Json;
use gate_core::{AcquireRequest, Mode, StatusSnapshot};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AcquireBody {
    path: Option<String>,
    mode: Option<String>,
    owner: Option<String>,
    timeout_ms: Option<u64>,
    lease_ms: Option<u64>,
    max_hold_ms: Option<u64>,
}

pub async fn acquire(State(state): State<AppState>, Json(body): Json<AcquireBody>) -> ApiResult<Json<Value>> {
    let path = body.path.filter(|p| !p.is_empty()).ok_or(ApiError::InvalidRequest)?;
    let owner = body.owner.filter(|o| !o.is_empty()).ok_or(ApiError::InvalidRequest)?;
    let mode: Mode = body
        .mode
        .as_deref()
        .ok_or(ApiError::InvalidRequest)?
        .parse()
        .map_err(|_| ApiError::InvalidRequest)?;

    let request = AcquireRequest {
        path,
        mode,
        owner,
        timeout_ms: body.timeout_ms.or(state.config.acquire_timeout_ms),
        lease_ms: body.lease_ms.unwrap_or(state.config.lease_ms),
        max_hold_ms: body.max_hold_ms.or(state.config.max_hold_ms),
    };

    let store = state.store.clone();
    let outcome = tokio::task::spawn_blocking(move || store.acquire(request))
        .await
        .expect("lock store acquire task panicked")?;

    match outcome {
        Some(lock) => Ok(Json(json!({"status": "granted", "lock": lock}))),
        None => Err(ApiError::Timeout),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReleaseBody {
    lock_id: Option<String>,
    owner: Option<String>,
}

pub async fn release(State(state): State<AppState>, Json(body): Json<ReleaseBody>) -> ApiResult<Json<Value>> {
    let lock_id = body.lock_id.filter(|v| !v.is_empty()).ok_or(ApiError::InvalidRequest)?;
    let owner = body.owner.filter(|v| !v.is_empty()).ok_or(ApiError::InvalidRequest)?;

    let store = state.store.clone();
    let ok = tokio::task::spawn_blocking(move || store.release(&lock_id, &owner))
        .await
        .expect("lock store release task panicked")?;

    if !ok {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({"status": "released"})))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    lock_id: Option<String>,
    owner: Option<String>,
    lease_ms: Option<u64>,
}

pub async fn heartbeat(State(state): State<AppState>, Json(body): Json<HeartbeatBody>) -> ApiResult<Json<Value>> {
    let lock_id = body.lock_id.filter(|v| !v.is_empty()).ok_or(ApiError::InvalidRequest)?;
    let owner = body.owner.filter(|v| !v.is_empty()).ok_or(ApiError::InvalidRequest)?;
    let lease_ms = body.lease_ms.unwrap_or(state.config.lease_ms);

    let store = state.store.clone();
    let owner_for_store = owner.clone();
    let ok = tokio::task::spawn_blocking(move || store.heartbeat(&lock_id, &owner_for_store, lease_ms))
        .await
        .expect("lock store heartbeat task panicked")?;

    if !ok {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    path: Option<String>,
}

pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<StatusSnapshot>> {
    let store = state.store.clone();
    let snapshot = tokio::task::spawn_blocking(move || store.status(query.path.as_deref()))
        .await
        .expect("lock store status task panicked")?;
    Ok(Json(snapshot))
}
