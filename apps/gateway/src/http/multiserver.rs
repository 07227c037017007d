use super::{ApiResult, AppState};
use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

/// `GET /multiserver/status`, grounded on
/// `original_source/app/api/views.py::get_multiserver_status`.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let statuses = state.ctx.connections.servers_status().await;
    Json(json!({ "statuses": statuses }))
}

/// `POST /multiserver/change/<id>`, grounded on
/// `original_source/app/api/views.py::multiserver_change_server`. `ConnectionManager::switch_to`
/// already bounds-checks the index, so the handler just maps its `Validation` error to the
/// original's `{status: "error", msg}` shape.
pub async fn change(State(state): State<AppState>, Path(id): Path<usize>) -> ApiResult<Json<Value>> {
    state.ctx.connections.switch_to(id).await?;
    Ok(Json(json!({ "status": "success", "msg": format!("Changing server to {id}") })))
}

/// `POST /multiserver/switch-to-best`, grounded on
/// `original_source/app/api/views.py::multiserver_switch_to_best`.
pub async fn switch_to_best(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let changed = state.ctx.connections.refresh_best_server().await?;
    let msg = if changed { "switched to a new best server".to_string() } else { "already on the best server".to_string() };
    Ok(Json(json!({ "status": "success", "msg": msg })))
}
