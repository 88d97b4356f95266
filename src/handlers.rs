use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::forecast::Forecaster;
use crate::types::{DateQuery, Health, PrecipitationResponse, RainResponse, ServiceInfo, HEALTH, SERVICE_INFO};

pub type AppState = Arc<Forecaster>;

pub async fn root() -> Json<ServiceInfo> {
    Json(SERVICE_INFO)
}

pub async fn health() -> Json<Health> {
    Json(HEALTH)
}

pub async fn predict_rain(
    State(state): State<AppState>,
    Query(q): Query<DateQuery>,
) -> Result<Json<RainResponse>, ApiError> {
    let date = required_date(q)?;
    Ok(Json(state.rain(&date)?))
}

pub async fn predict_precipitation(
    State(state): State<AppState>,
    Query(q): Query<DateQuery>,
) -> Result<Json<PrecipitationResponse>, ApiError> {
    let date = required_date(q)?;
    Ok(Json(state.precipitation(&date)?))
}

fn required_date(q: DateQuery) -> Result<String, ApiError> {
    q.date
        .ok_or_else(|| ApiError::BadRequest("Missing required query parameter 'date' (YYYY-MM-DD).".into()))
}
