use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------- Request ----------

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    /// Input date, `YYYY-MM-DD`.
    pub date: Option<String>,
}

// ---------- Predictions ----------

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RainPrediction {
    pub date: NaiveDate,
    pub will_rain: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RainResponse {
    pub input_date: String,
    pub prediction: RainPrediction,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PrecipitationPrediction {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub precipitation_fall: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PrecipitationResponse {
    pub input_date: String,
    pub prediction: PrecipitationPrediction,
}

// ---------- Static payloads ----------

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub health: &'static str,
    pub predict_rain: &'static str,
    pub predict_precipitation: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub project: &'static str,
    pub description: &'static str,
    pub endpoints: Endpoints,
    pub github_repo: &'static str,
}

pub const SERVICE_INFO: ServiceInfo = ServiceInfo {
    project: "Sydney Weather Forecast",
    description: "Predicting rain in 7 days and 3-day cumulative precipitation.",
    endpoints: Endpoints {
        health: "/health/",
        predict_rain: "/predict/rain/?date=YYYY-MM-DD",
        predict_precipitation: "/predict/precipitation/fall/?date=YYYY-MM-DD",
    },
    github_repo: "https://github.com/",
};

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

pub const HEALTH: Health = Health {
    status: "API is running successfully!",
};
