use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{fs, path::Path};
use tch::{kind::Kind, CModule, Device, Tensor};

use crate::error::InferenceError;
use crate::model::PredictiveModel;

#[derive(Deserialize)]
struct MetaJson {
    feat_list: Vec<String>,
    in_dim: Option<usize>,
}

/// TorchScript module taking `[1, in_dim]` and returning one value per row.
pub struct TorchModel {
    model: CModule,
    device: Device,
    in_dim: usize,
    feat_list: Vec<String>,
}

impl TorchModel {
    pub fn new(model_path: &Path, meta_path: &Path) -> Result<Self> {
        let device = Device::Cpu;

        // meta.json carries the fitted feature ordering
        let meta_txt = fs::read_to_string(meta_path)
            .with_context(|| format!("failed to read meta at {}", meta_path.display()))?;
        let meta: MetaJson = serde_json::from_str(&meta_txt)
            .with_context(|| format!("failed to parse {}", meta_path.display()))?;

        let in_dim = meta.in_dim.unwrap_or(meta.feat_list.len());
        if in_dim != meta.feat_list.len() {
            bail!(
                "meta.in_dim ({}) != feat_list.len() ({}) in {}",
                in_dim,
                meta.feat_list.len(),
                meta_path.display()
            );
        }

        let model = CModule::load_on_device(model_path, device)
            .with_context(|| format!("failed to load TorchScript {}", model_path.display()))?;

        // Warmup forward; also proves the module accepts [1, in_dim]
        let dummy = Tensor::zeros([1, in_dim as i64], (Kind::Float, device));
        let t = model.forward_ts(&[dummy])?;
        if t.numel() == 0 {
            bail!("TorchScript {} produced an empty output", model_path.display());
        }
        tracing::debug!("warmup forward ok, output size {:?}", t.size());

        Ok(Self {
            model,
            device,
            in_dim,
            feat_list: meta.feat_list,
        })
    }
}

impl PredictiveModel for TorchModel {
    fn predict_rows(&self, rows: &[Vec<f32>]) -> Result<Vec<f32>, InferenceError> {
        let mut out = Vec::with_capacity(rows.len());
        for x in rows {
            if x.len() != self.in_dim {
                return Err(InferenceError::ShapeMismatch {
                    got: x.len(),
                    expected: self.in_dim,
                });
            }
            let input = Tensor::from_slice(x)
                .reshape([1, self.in_dim as i64])
                .to_device(self.device);

            let t = self
                .model
                .forward_ts(&[input])
                .map_err(|e| InferenceError::Backend(e.to_string()))?;

            let flat = t.to_kind(Kind::Float).flatten(0, -1);
            if flat.numel() == 0 {
                return Err(InferenceError::EmptyOutput);
            }
            out.push(flat.double_value(&[0]) as f32);
        }
        Ok(out)
    }

    fn expected_columns(&self) -> Option<&[String]> {
        Some(&self.feat_list)
    }

    fn describe(&self) -> String {
        format!("torchscript ({} features)", self.in_dim)
    }
}
