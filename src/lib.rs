//! HTTP service predicting Sydney rain (7 days out) and 3-day cumulative
//! precipitation from a date, backed by two pre-trained models.

use axum::{routing::get, Router};

pub mod booster;
pub mod config;
pub mod error;
pub mod features;
pub mod forecast;
pub mod handlers;
pub mod model;
#[cfg(feature = "torch")]
pub mod torch;
pub mod types;

pub use forecast::Forecaster;
pub use handlers::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health/", get(handlers::health))
        .route("/predict/rain/", get(handlers::predict_rain))
        .route("/predict/precipitation/fall/", get(handlers::predict_precipitation))
        .with_state(state)
}
