use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf};

use crate::features::FeatureSchema;

pub const DEFAULT_PORT: u16 = 8080;

/// Optional JSON file pointed to by `CONFIG_PATH`; every field may be
/// overridden by the matching environment variable.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub rain_model_path: Option<PathBuf>,
    pub rain_meta_path: Option<PathBuf>,
    pub precipitation_model_path: Option<PathBuf>,
    pub precipitation_meta_path: Option<PathBuf>,
    pub log_predictions: Option<bool>,
    pub clamp_negative_precipitation: Option<bool>,
    pub feature_schema: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("config file not found at {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("invalid config JSON in {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelPaths {
    pub model: PathBuf,
    pub meta: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub rain: ModelPaths,
    pub precipitation: ModelPaths,
    /// Per-request feature/prediction logging (`LOG_PRED=1`).
    pub log_predictions: bool,
    pub clamp_negative_precipitation: bool,
    pub schema: FeatureSchema,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Builds the config from `env` lookups, layered over `CONFIG_PATH` when set.
    pub fn resolve(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match env("CONFIG_PATH") {
            Some(p) if !p.is_empty() => FileConfig::load(Path::new(&p))?,
            _ => FileConfig::default(),
        };

        let port = match env("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| anyhow!("PORT: '{}' is not a valid port", raw))?,
            None => file.port.unwrap_or(DEFAULT_PORT),
        };

        let rain = ModelPaths {
            model: env("RAIN_MODEL_PATH")
                .map(PathBuf::from)
                .or(file.rain_model_path)
                .context("RAIN_MODEL_PATH not set")?,
            meta: env("RAIN_META_PATH").map(PathBuf::from).or(file.rain_meta_path),
        };
        let precipitation = ModelPaths {
            model: env("PRECIP_MODEL_PATH")
                .map(PathBuf::from)
                .or(file.precipitation_model_path)
                .context("PRECIP_MODEL_PATH not set")?,
            meta: env("PRECIP_META_PATH")
                .map(PathBuf::from)
                .or(file.precipitation_meta_path),
        };

        let log_predictions = match env("LOG_PRED") {
            Some(raw) => parse_flag("LOG_PRED", &raw)?,
            None => file.log_predictions.unwrap_or(false),
        };
        let clamp_negative_precipitation = match env("PRECIP_CLAMP_NEGATIVE") {
            Some(raw) => parse_flag("PRECIP_CLAMP_NEGATIVE", &raw)?,
            None => file.clamp_negative_precipitation.unwrap_or(false),
        };

        let schema = match file.feature_schema {
            Some(names) => FeatureSchema::new(names).map_err(|e| anyhow!("feature_schema: {e}"))?,
            None => FeatureSchema::default(),
        };

        Ok(Self {
            port,
            rain,
            precipitation,
            log_predictions,
            clamp_negative_precipitation,
            schema,
        })
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => bail!("{name}: '{raw}' is not a boolean"),
    }
}
