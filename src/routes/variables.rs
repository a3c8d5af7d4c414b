use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use crate::db::models::Variable;
use crate::db::VariableRepository;
use crate::error::{AppError, AppResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_variables))
        .route("/:name", put(put_variable))
}

#[derive(Debug, Deserialize)]
pub struct VariableBody {
    #[serde(default)]
    pub value: String,
}

async fn list_variables(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Variable>>> {
    Ok(Json(VariableRepository::list_all(&state.db).await?))
}

/// Create a variable triggers can write to, or overwrite its value.
async fn put_variable(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<VariableBody>,
) -> AppResult<Json<Variable>> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name: Required".to_string()));
    }
    Ok(Json(
        VariableRepository::upsert(&state.db, name, &body.value).await?,
    ))
}
