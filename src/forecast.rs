use anyhow::Result;
use chrono::{Days, NaiveDate};

use crate::config::ServiceConfig;
use crate::error::ApiError;
use crate::features::{self, FeatureSchema, FeatureVector};
use crate::model::{self, ModelAdapter};
use crate::types::{PrecipitationPrediction, PrecipitationResponse, RainPrediction, RainResponse};

pub const RAIN_HORIZON_DAYS: u64 = 7;
pub const PRECIP_START_OFFSET_DAYS: u64 = 1;
pub const PRECIP_END_OFFSET_DAYS: u64 = 3;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Default)]
pub struct ForecastOptions {
    pub log_predictions: bool,
    pub clamp_negative_precipitation: bool,
}

/// Everything a request needs: the schema and both models, immutable once built.
pub struct Forecaster {
    schema: FeatureSchema,
    rain: ModelAdapter,
    precipitation: ModelAdapter,
    options: ForecastOptions,
}

impl Forecaster {
    pub fn new(
        schema: FeatureSchema,
        rain: ModelAdapter,
        precipitation: ModelAdapter,
        options: ForecastOptions,
    ) -> Self {
        // a mismatch only fails the affected endpoint, per request
        for adapter in [&rain, &precipitation] {
            if let Err(e) = adapter.check_schema(&schema) {
                tracing::warn!(
                    "{} model does not fit the feature schema, its predictions will fail: {}",
                    adapter.name(),
                    e
                );
            }
        }
        Self {
            schema,
            rain,
            precipitation,
            options,
        }
    }

    /// Loads both artifacts named in `cfg`; any failure is fatal for startup.
    pub fn from_config(cfg: &ServiceConfig) -> Result<Self> {
        let rain = model::load(&cfg.rain.model, cfg.rain.meta.as_deref())?;
        let precipitation = model::load(&cfg.precipitation.model, cfg.precipitation.meta.as_deref())?;

        let rain = ModelAdapter::new("rain", rain);
        let precipitation = ModelAdapter::new("precipitation", precipitation);
        for (adapter, path) in [(&rain, &cfg.rain.model), (&precipitation, &cfg.precipitation.model)] {
            tracing::info!(
                "loaded {} model from {}: {}; columns: {}",
                adapter.name(),
                path.display(),
                adapter.describe(),
                match adapter.columns() {
                    Some(c) => format!("{} from model", c.len()),
                    None => "schema order".to_string(),
                }
            );
        }

        Ok(Self::new(
            cfg.schema.clone(),
            rain,
            precipitation,
            ForecastOptions {
                log_predictions: cfg.log_predictions,
                clamp_negative_precipitation: cfg.clamp_negative_precipitation,
            },
        ))
    }

    /// Will it rain `RAIN_HORIZON_DAYS` after `raw`?
    pub fn rain(&self, raw: &str) -> Result<RainResponse, ApiError> {
        let input = parse_date(raw)?;
        let target = offset(input, RAIN_HORIZON_DAYS)?;

        let vector = features::build(input, &self.schema);
        let out = self.rain.predict(&vector)?;
        self.log_prediction("rain", raw, &vector, out);

        Ok(RainResponse {
            input_date: raw.to_string(),
            prediction: RainPrediction {
                date: target,
                will_rain: out != 0.0,
            },
        })
    }

    /// Cumulative precipitation over days +1..=+3 after `raw`.
    pub fn precipitation(&self, raw: &str) -> Result<PrecipitationResponse, ApiError> {
        let input = parse_date(raw)?;
        let start = offset(input, PRECIP_START_OFFSET_DAYS)?;
        let end = offset(input, PRECIP_END_OFFSET_DAYS)?;

        let vector = features::build(input, &self.schema);
        let out = self.precipitation.predict(&vector)?;
        self.log_prediction("precipitation", raw, &vector, out);

        let mut fall = out as f64;
        if self.options.clamp_negative_precipitation && fall < 0.0 {
            fall = 0.0;
        }

        Ok(PrecipitationResponse {
            input_date: raw.to_string(),
            prediction: PrecipitationPrediction {
                start_date: start,
                end_date: end,
                precipitation_fall: fall,
            },
        })
    }

    fn log_prediction(&self, endpoint: &str, raw: &str, vector: &FeatureVector<'_>, out: f32) {
        if !self.options.log_predictions {
            return;
        }
        let vec = vector.values();
        let nz = vec.iter().filter(|x| **x != 0.0).count();
        let mean = if vec.is_empty() { 0.0 } else { vec.iter().sum::<f32>() / (vec.len() as f32) };
        let std = if vec.len() < 2 {
            0.0
        } else {
            (vec.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / (vec.len() as f32)).sqrt()
        };
        let sample: Vec<String> = vector
            .iter()
            .filter(|(name, _)| matches!(*name, "hour" | "day" | "month" | "weekday"))
            .map(|(name, v)| format!("{}={:.3}", name, v))
            .collect();
        tracing::info!(
            "{} date={} in_dim={} nonzero={} mean={:.3} std={:.3} sample=[{}] out={}",
            endpoint,
            raw,
            vec.len(),
            nz,
            mean,
            std,
            sample.join(", "),
            out
        );
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    let invalid = || ApiError::BadRequest("Invalid date format. Use YYYY-MM-DD.".into());
    // chrono's %Y also takes signs, padding and short years
    if !has_date_shape(raw) {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| invalid())
}

/// Four-digit year, then one or two digit month and day.
fn has_date_shape(raw: &str) -> bool {
    let parts: Vec<&str> = raw.split('-').collect();
    let [year, month, day] = parts.as_slice() else {
        return false;
    };
    let digits = |s: &str, min: usize, max: usize| {
        (min..=max).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
    };
    digits(*year, 4, 4) && digits(*month, 1, 2) && digits(*day, 1, 2)
}

fn offset(date: NaiveDate, days: u64) -> Result<NaiveDate, ApiError> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| ApiError::BadRequest(format!("date out of range: {} + {} days", date, days)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::model::PredictiveModel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Returns `value`, or fails with `fail`, counting calls.
    struct Fixed {
        value: f32,
        fail: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl PredictiveModel for Fixed {
        fn predict_rows(&self, rows: &[Vec<f32>]) -> Result<Vec<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail {
                Some(msg) => Err(InferenceError::Backend(msg.to_string())),
                None => Ok(vec![self.value; rows.len()]),
            }
        }
        fn describe(&self) -> String {
            "fixed".into()
        }
    }

    fn forecaster(rain: f32, precip: f32, options: ForecastOptions) -> (Forecaster, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let rain = Fixed { value: rain, fail: None, calls: Arc::clone(&calls) };
        let precip = Fixed { value: precip, fail: None, calls: Arc::clone(&calls) };
        let f = Forecaster::new(
            FeatureSchema::default(),
            ModelAdapter::new("rain", Box::new(rain)),
            ModelAdapter::new("precipitation", Box::new(precip)),
            options,
        );
        (f, calls)
    }

    fn ymd(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn rain_date_is_seven_days_out_across_boundaries() {
        let (f, _) = forecaster(1.0, 0.0, ForecastOptions::default());
        for (input, expected) in [
            ("2024-02-26", "2024-03-04"),
            ("2023-02-26", "2023-03-05"),
            ("2023-12-28", "2024-01-04"),
            ("2024-06-10", "2024-06-17"),
        ] {
            let r = f.rain(input).unwrap();
            assert_eq!(r.input_date, input);
            assert_eq!(r.prediction.date, ymd(expected), "{input}");
            assert!(r.prediction.will_rain);
        }
    }

    #[test]
    fn rain_output_is_coerced_to_bool() {
        let (f, _) = forecaster(0.0, 0.0, ForecastOptions::default());
        assert!(!f.rain("2024-01-01").unwrap().prediction.will_rain);
        let (f, _) = forecaster(-0.3, 0.0, ForecastOptions::default());
        assert!(f.rain("2024-01-01").unwrap().prediction.will_rain);
    }

    #[test]
    fn precipitation_window_is_day_one_to_three() {
        let (f, _) = forecaster(0.0, 12.5, ForecastOptions::default());
        let p = f.precipitation("2024-01-01").unwrap();
        assert_eq!(p.prediction.start_date, ymd("2024-01-02"));
        assert_eq!(p.prediction.end_date, ymd("2024-01-04"));
        assert_eq!(p.prediction.precipitation_fall, 12.5);

        let p = f.precipitation("2024-12-30").unwrap();
        assert_eq!(p.prediction.start_date, ymd("2024-12-31"));
        assert_eq!(p.prediction.end_date, ymd("2025-01-02"));
    }

    #[test]
    fn negative_precipitation_is_kept_unless_clamping() {
        let (f, _) = forecaster(0.0, -1.5, ForecastOptions::default());
        assert_eq!(f.precipitation("2024-01-01").unwrap().prediction.precipitation_fall, -1.5);

        let opts = ForecastOptions { clamp_negative_precipitation: true, ..Default::default() };
        let (f, _) = forecaster(0.0, -1.5, opts);
        assert_eq!(f.precipitation("2024-01-01").unwrap().prediction.precipitation_fall, 0.0);
    }

    #[test]
    fn malformed_dates_never_reach_the_model() {
        let (f, calls) = forecaster(1.0, 1.0, ForecastOptions::default());
        for raw in [
            "2024-13-40",
            "not-a-date",
            "",
            "2023-02-29",
            "2024-01-01T00:00:00",
            "+2024-01-01",
            " 2024-01-01",
            "999-01-01",
            "02024-01-01",
            "2024-001-01",
            "2024-01-01-",
        ] {
            assert!(matches!(f.rain(raw), Err(ApiError::BadRequest(_))), "{raw:?}");
            assert!(matches!(f.precipitation(raw), Err(ApiError::BadRequest(_))), "{raw:?}");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn single_digit_month_and_day_are_accepted() {
        assert_eq!(parse_date("2024-1-5").unwrap(), ymd("2024-01-05"));
        assert_eq!(parse_date("2024-01-05").unwrap(), ymd("2024-01-05"));
    }

    #[test]
    fn leap_day_is_accepted() {
        let (f, calls) = forecaster(1.0, 1.0, ForecastOptions::default());
        assert_eq!(f.rain("2024-02-29").unwrap().prediction.date, ymd("2024-03-07"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn end_of_calendar_is_a_bad_request() {
        let (f, _) = forecaster(1.0, 1.0, ForecastOptions::default());
        let raw = NaiveDate::MAX.format(DATE_FORMAT).to_string();
        assert!(matches!(f.rain(&raw), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn model_failure_keeps_its_message() {
        let calls = Arc::new(AtomicUsize::new(0));
        let broken = Fixed { value: 0.0, fail: Some("booster exploded"), calls: Arc::clone(&calls) };
        let ok = Fixed { value: 0.0, fail: None, calls };
        let f = Forecaster::new(
            FeatureSchema::default(),
            ModelAdapter::new("rain", Box::new(ok)),
            ModelAdapter::new("precipitation", Box::new(broken)),
            ForecastOptions::default(),
        );

        let err = f.precipitation("2024-01-01").unwrap_err();
        assert!(matches!(err, ApiError::Inference(InferenceError::Backend(_))));
        assert_eq!(err.to_string(), "Prediction failed: booster exploded");
    }

    #[test]
    fn schema_mismatch_fails_only_the_affected_endpoint() {
        struct Picky(Vec<String>);
        impl PredictiveModel for Picky {
            fn predict_rows(&self, _: &[Vec<f32>]) -> Result<Vec<f32>, InferenceError> {
                Ok(vec![0.0])
            }
            fn expected_columns(&self) -> Option<&[String]> {
                Some(&self.0)
            }
            fn describe(&self) -> String {
                "picky".into()
            }
        }

        let f = Forecaster::new(
            FeatureSchema::default(),
            ModelAdapter::new("rain", Box::new(Picky(vec!["day".into()]))),
            ModelAdapter::new("precipitation", Box::new(Picky(vec!["day".into(), "rain_sum".into()]))),
            ForecastOptions::default(),
        );

        assert!(f.rain("2024-01-01").is_ok());
        let err = f.precipitation("2024-01-01").unwrap_err();
        assert!(matches!(err, ApiError::Inference(InferenceError::ColumnMismatch(ref c)) if c == "rain_sum"));
        assert!(err
            .to_string()
            .starts_with("Prediction failed: model expects feature 'rain_sum'"));
    }
}
