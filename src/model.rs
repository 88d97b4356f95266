use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::booster::Booster;
use crate::error::InferenceError;
use crate::features::{FeatureSchema, FeatureVector};

/// A loaded, read-only predictive artifact.
pub trait PredictiveModel: Send + Sync {
    /// Scores each row; one output per row.
    fn predict_rows(&self, rows: &[Vec<f32>]) -> Result<Vec<f32>, InferenceError>;

    /// Column order the artifact was fitted with, when it records one.
    fn expected_columns(&self) -> Option<&[String]> {
        None
    }

    fn describe(&self) -> String;
}

// ---------- Adapter ----------

pub struct ModelAdapter {
    name: &'static str,
    model: Box<dyn PredictiveModel>,
    /// Read once from the model; `None` means schema order.
    columns: Option<Vec<String>>,
}

impl ModelAdapter {
    pub fn new(name: &'static str, model: Box<dyn PredictiveModel>) -> Self {
        let columns = model.expected_columns().map(<[String]>::to_vec);
        Self { name, model, columns }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn describe(&self) -> String {
        self.model.describe()
    }

    /// Fails on the first model column the schema cannot supply.
    pub fn check_schema(&self, schema: &FeatureSchema) -> Result<(), InferenceError> {
        match &self.columns {
            Some(cols) => match schema.missing(cols).first() {
                Some(c) => Err(InferenceError::ColumnMismatch(c.to_string())),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Single-row inference, returning the first output.
    pub fn predict(&self, vector: &FeatureVector<'_>) -> Result<f32, InferenceError> {
        let row = match &self.columns {
            Some(cols) => vector.select(cols)?,
            None => vector.values().to_vec(),
        };
        let out = self.model.predict_rows(&[row])?;
        let first = *out.first().ok_or(InferenceError::EmptyOutput)?;
        if !first.is_finite() {
            return Err(InferenceError::NonFinite(first as f64));
        }
        Ok(first)
    }
}

// ---------- Loading ----------

/// Loads a model artifact, picking the backend from the file extension.
pub fn load(model_path: &Path, meta_path: Option<&Path>) -> Result<Box<dyn PredictiveModel>> {
    let ext = model_path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "json" => {
            if meta_path.is_some() {
                tracing::warn!(
                    "ignoring meta file for {}; xgboost models carry their own feature names",
                    model_path.display()
                );
            }
            let booster = Booster::load(model_path)
                .with_context(|| format!("failed to load xgboost model {}", model_path.display()))?;
            Ok(Box::new(booster))
        }
        "pt" | "ts" | "torchscript" => load_torch(model_path, meta_path),
        _ => bail!(
            "unrecognised model format for {} (expected .json, .pt, .ts or .torchscript)",
            model_path.display()
        ),
    }
}

#[cfg(feature = "torch")]
fn load_torch(model_path: &Path, meta_path: Option<&Path>) -> Result<Box<dyn PredictiveModel>> {
    let meta = meta_path
        .with_context(|| format!("TorchScript model {} needs a meta file", model_path.display()))?;
    Ok(Box::new(crate::torch::TorchModel::new(model_path, meta)?))
}

#[cfg(not(feature = "torch"))]
fn load_torch(model_path: &Path, _meta_path: Option<&Path>) -> Result<Box<dyn PredictiveModel>> {
    bail!(
        "{} is a TorchScript model but this build lacks the `torch` feature",
        model_path.display()
    )
}
