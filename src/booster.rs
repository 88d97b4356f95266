//! Pure-Rust scorer for gradient boosted tree models saved by XGBoost
//! (`Booster.save_model("model.json")`).
//!
//! Only single-output `gbtree` / `dart` boosters with numerical splits are
//! supported, which covers the regressors and binary classifiers this
//! service serves.

use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};
use thiserror::Error;

use crate::error::InferenceError;
use crate::model::PredictiveModel;

#[derive(Debug, Error)]
pub enum BoosterError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed model JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("only gbtree and dart boosters are supported")]
    UnsupportedBooster,
    #[error("unsupported objective '{0}'")]
    UnsupportedObjective(String),
    #[error("multi-output models are not supported (num_class={num_class}, num_target={num_target})")]
    MultiOutput { num_class: usize, num_target: usize },
    #[error("tree {tree} uses categorical splits, which are not supported")]
    Categorical { tree: usize },
    #[error("tree {tree} is invalid: {reason}")]
    InvalidTree { tree: usize, reason: String },
    #[error("invalid learner parameter {name}='{value}'")]
    InvalidParam { name: &'static str, value: String },
}

// ---------- On-disk layout ----------

#[derive(Deserialize)]
struct ModelFile {
    learner: LearnerJson,
}

#[derive(Deserialize)]
struct LearnerJson {
    #[serde(default)]
    attributes: HashMap<String, String>,
    #[serde(default)]
    feature_names: Vec<String>,
    gradient_booster: GradientBoosterJson,
    learner_model_param: LearnerModelParam,
    objective: ObjectiveJson,
}

#[derive(Deserialize)]
#[serde(tag = "name")]
enum GradientBoosterJson {
    #[serde(rename = "gbtree")]
    GbTree { model: GbTreeModelJson },
    #[serde(rename = "dart")]
    Dart {
        gbtree: GbTreeJson,
        #[serde(default)]
        weight_drop: Vec<f32>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct GbTreeJson {
    model: GbTreeModelJson,
}

#[derive(Deserialize)]
struct GbTreeModelJson {
    gbtree_model_param: GbTreeModelParam,
    trees: Vec<TreeJson>,
}

#[derive(Deserialize)]
struct GbTreeModelParam {
    #[serde(default = "one")]
    num_parallel_tree: String,
}

#[derive(Deserialize)]
struct LearnerModelParam {
    #[serde(default = "half")]
    base_score: String,
    #[serde(default = "zero")]
    num_class: String,
    num_feature: String,
    #[serde(default = "one")]
    num_target: String,
}

#[derive(Deserialize)]
struct ObjectiveJson {
    name: String,
}

#[derive(Deserialize)]
struct TreeJson {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<i64>,
    split_conditions: Vec<f32>,
    default_left: Vec<Flag>,
    #[serde(default)]
    split_type: Vec<u8>,
}

/// `default_left` is written as 0/1 by older releases and as booleans by newer ones.
#[derive(Deserialize, Clone, Copy)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

fn one() -> String {
    "1".into()
}
fn zero() -> String {
    "0".into()
}
fn half() -> String {
    "5E-1".into()
}

fn parse_param<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, BoosterError> {
    // base_score is a one-element vector in recent releases
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
    trimmed.parse().map_err(|_| BoosterError::InvalidParam {
        name,
        value: raw.to_string(),
    })
}

// ---------- Objective ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// Identity link regressors (squared, absolute, pseudo-huber, ...).
    Regression,
    /// `reg:logistic`: probability output, treated as a regressor.
    LogisticRegression,
    /// `binary:logistic`: probability output, class label on predict.
    BinaryLogistic,
    /// `binary:logitraw`: raw margin output, class label on predict.
    BinaryLogitRaw,
    /// `binary:hinge`: 0/1 output.
    BinaryHinge,
    /// Log link regressors (poisson, gamma, tweedie).
    LogLink,
}

impl Objective {
    pub fn from_name(name: &str) -> Result<Self, BoosterError> {
        Ok(match name {
            "reg:squarederror" | "reg:linear" | "reg:absoluteerror" | "reg:pseudohubererror"
            | "reg:squaredlogerror" => Objective::Regression,
            "reg:logistic" => Objective::LogisticRegression,
            "binary:logistic" => Objective::BinaryLogistic,
            "binary:logitraw" => Objective::BinaryLogitRaw,
            "binary:hinge" => Objective::BinaryHinge,
            "count:poisson" | "reg:gamma" | "reg:tweedie" => Objective::LogLink,
            other => return Err(BoosterError::UnsupportedObjective(other.to_string())),
        })
    }

    pub fn is_classifier(self) -> bool {
        matches!(
            self,
            Objective::BinaryLogistic | Objective::BinaryLogitRaw | Objective::BinaryHinge
        )
    }

    /// `base_score` is stored in output space; scoring happens in margin space.
    fn base_margin(self, base_score: f32) -> f32 {
        match self {
            Objective::LogisticRegression | Objective::BinaryLogistic | Objective::BinaryLogitRaw => {
                (base_score / (1.0 - base_score)).ln()
            }
            Objective::LogLink => base_score.ln(),
            Objective::Regression | Objective::BinaryHinge => base_score,
        }
    }

    fn transform(self, margin: f32) -> f32 {
        match self {
            Objective::LogisticRegression | Objective::BinaryLogistic => 1.0 / (1.0 + (-margin).exp()),
            Objective::LogLink => margin.exp(),
            Objective::BinaryHinge => {
                if margin > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Objective::Regression | Objective::BinaryLogitRaw => margin,
        }
    }

    fn label(self, value: f32) -> f32 {
        // the sklearn wrapper thresholds every binary output at 0.5, raw margins included
        let positive = match self {
            Objective::BinaryLogistic | Objective::BinaryLogitRaw | Objective::BinaryHinge => value > 0.5,
            _ => return value,
        };
        if positive {
            1.0
        } else {
            0.0
        }
    }
}

// ---------- Trees ----------

#[derive(Debug, Clone)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    /// Split threshold, or the leaf value when `left == -1`.
    cond: f32,
    default_left: bool,
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn from_json(idx: usize, t: TreeJson, num_feature: usize) -> Result<Self, BoosterError> {
        let invalid = |reason: String| BoosterError::InvalidTree { tree: idx, reason };
        let n = t.left_children.len();
        if n == 0 {
            return Err(invalid("no nodes".into()));
        }
        if [
            t.right_children.len(),
            t.split_indices.len(),
            t.split_conditions.len(),
            t.default_left.len(),
        ]
        .iter()
        .any(|&len| len != n)
        {
            return Err(invalid("node arrays have different lengths".into()));
        }
        if t.split_type.iter().any(|&s| s != 0) {
            return Err(BoosterError::Categorical { tree: idx });
        }

        let mut nodes = Vec::with_capacity(n);
        for nid in 0..n {
            let (left, right) = (t.left_children[nid], t.right_children[nid]);
            let is_leaf = left == -1;
            if !is_leaf {
                // children always come after their parent, which also rules out cycles
                for child in [left, right] {
                    if child <= nid as i32 || child as usize >= n {
                        return Err(invalid(format!("node {nid} has out of order child {child}")));
                    }
                }
                let f = t.split_indices[nid];
                if f < 0 || f as usize >= num_feature {
                    return Err(invalid(format!(
                        "node {nid} splits on feature {f}, model has {num_feature}"
                    )));
                }
            }
            nodes.push(Node {
                left,
                right,
                feature: t.split_indices[nid].max(0) as usize,
                cond: t.split_conditions[nid],
                default_left: t.default_left[nid].is_set(),
            });
        }
        Ok(Self { nodes })
    }

    fn leaf_value(&self, row: &[f32]) -> f32 {
        let mut nid = 0usize;
        loop {
            let node = &self.nodes[nid];
            if node.left == -1 {
                return node.cond;
            }
            let f = row[node.feature];
            let go_left = if f.is_nan() { node.default_left } else { f < node.cond };
            let next = if go_left { node.left } else { node.right };
            nid = next as usize;
        }
    }
}

// ---------- Booster ----------

#[derive(Debug, Clone)]
pub struct Booster {
    trees: Vec<Tree>,
    /// Per-tree multiplier; all ones except for dart.
    weights: Vec<f32>,
    base_margin: f32,
    objective: Objective,
    num_feature: usize,
    feature_names: Option<Vec<String>>,
}

impl Booster {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BoosterError> {
        let path = path.as_ref();
        let txt = fs::read_to_string(path).map_err(|source| BoosterError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&txt)
    }

    pub fn from_json_str(txt: &str) -> Result<Self, BoosterError> {
        let file: ModelFile = serde_json::from_str(txt)?;
        let learner = file.learner;
        let params = &learner.learner_model_param;

        let num_class: usize = parse_param("num_class", &params.num_class)?;
        let num_target: usize = parse_param("num_target", &params.num_target)?;
        if num_class > 1 || num_target > 1 {
            return Err(BoosterError::MultiOutput { num_class, num_target });
        }
        let num_feature: usize = parse_param("num_feature", &params.num_feature)?;
        let base_score: f32 = parse_param("base_score", &params.base_score)?;
        let objective = Objective::from_name(&learner.objective.name)?;

        let (model, weight_drop) = match learner.gradient_booster {
            GradientBoosterJson::GbTree { model } => (model, None),
            GradientBoosterJson::Dart { gbtree, weight_drop } => (gbtree.model, Some(weight_drop)),
            GradientBoosterJson::Other => return Err(BoosterError::UnsupportedBooster),
        };
        let num_parallel_tree: usize =
            parse_param("num_parallel_tree", &model.gbtree_model_param.num_parallel_tree)?;

        let mut trees = model
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| Tree::from_json(i, t, num_feature))
            .collect::<Result<Vec<_>, _>>()?;

        let mut weights = match weight_drop {
            Some(w) if w.len() == trees.len() => w,
            Some(w) => {
                return Err(BoosterError::InvalidParam {
                    name: "weight_drop",
                    value: format!("{} weights for {} trees", w.len(), trees.len()),
                })
            }
            None => vec![1.0; trees.len()],
        };

        // the sklearn wrapper scores with the early-stopping iteration
        if let Some(best) = learner.attributes.get("best_iteration") {
            let best: usize = parse_param("best_iteration", best)?;
            let keep = (best + 1) * num_parallel_tree.max(1);
            trees.truncate(keep);
            weights.truncate(keep);
        }

        let feature_names = if learner.feature_names.is_empty() {
            None
        } else if learner.feature_names.len() != num_feature {
            return Err(BoosterError::InvalidParam {
                name: "feature_names",
                value: format!("{} names for {} features", learner.feature_names.len(), num_feature),
            });
        } else {
            Some(learner.feature_names)
        };

        Ok(Self {
            trees,
            weights,
            base_margin: objective.base_margin(base_score),
            objective,
            num_feature,
            feature_names,
        })
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn check_row(&self, row: &[f32]) -> Result<(), InferenceError> {
        if row.len() != self.num_feature {
            return Err(InferenceError::ShapeMismatch {
                got: row.len(),
                expected: self.num_feature,
            });
        }
        Ok(())
    }

    pub fn predict_margin(&self, row: &[f32]) -> Result<f32, InferenceError> {
        self.check_row(row)?;
        Ok(self
            .trees
            .iter()
            .zip(&self.weights)
            .fold(self.base_margin, |acc, (tree, w)| acc + w * tree.leaf_value(row)))
    }

    /// Transformed output: probability for logistic objectives, value otherwise.
    pub fn predict_value(&self, row: &[f32]) -> Result<f32, InferenceError> {
        Ok(self.objective.transform(self.predict_margin(row)?))
    }

    /// Class label for classifiers, value for regressors.
    pub fn predict(&self, row: &[f32]) -> Result<f32, InferenceError> {
        Ok(self.objective.label(self.predict_value(row)?))
    }
}

impl PredictiveModel for Booster {
    fn predict_rows(&self, rows: &[Vec<f32>]) -> Result<Vec<f32>, InferenceError> {
        rows.iter().map(|r| self.predict(r)).collect()
    }

    fn expected_columns(&self) -> Option<&[String]> {
        self.feature_names()
    }

    fn describe(&self) -> String {
        format!(
            "xgboost {:?} ({} trees, {} features)",
            self.objective,
            self.trees.len(),
            self.num_feature
        )
    }
}
