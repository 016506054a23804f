//! Tabular estimators: decision forests, logistic and linear regression.
//!
//! Each type deserializes from the JSON artifact format and must pass
//! `validate` before it is handed to a [`ModelHandle`](super::ModelHandle).

use super::{argmax, BackendFault, Label, TabularEstimator};
use crate::error::LoadError;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    /// `features[feature] <= threshold` goes left.
    Split { feature: usize, threshold: f64, left: usize, right: usize },
    Leaf { distribution: Vec<f64> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Children must point forward, which rules out cycles.
    fn validate(&mut self, n_features: usize, n_classes: usize) -> Result<(), LoadError> {
        if self.nodes.is_empty() {
            return Err(LoadError::Invalid("tree has no nodes".into()));
        }
        let len = self.nodes.len();
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            match node {
                TreeNode::Split { feature, threshold, left, right } => {
                    if *feature >= n_features {
                        return Err(LoadError::Invalid(format!("node {idx} splits on feature {feature} of {n_features}")));
                    }
                    if !threshold.is_finite() {
                        return Err(LoadError::Invalid(format!("node {idx} has a non-finite threshold")));
                    }
                    for child in [*left, *right] {
                        if child <= idx || child >= len {
                            return Err(LoadError::Invalid(format!("node {idx} has invalid child {child}")));
                        }
                    }
                }
                TreeNode::Leaf { distribution } => {
                    if distribution.len() != n_classes {
                        return Err(LoadError::Invalid(format!(
                            "leaf {idx} has {} class weights, expected {n_classes}",
                            distribution.len()
                        )));
                    }
                    let total: f64 = distribution.iter().sum();
                    if !total.is_finite() || total <= 0.0 || distribution.iter().any(|w| *w < 0.0) {
                        return Err(LoadError::Invalid(format!("leaf {idx} has invalid class weights")));
                    }
                    distribution.iter_mut().for_each(|w| *w /= total);
                }
            }
        }
        Ok(())
    }

    fn leaf(&self, features: &[f64]) -> Result<&[f64], BackendFault> {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(TreeNode::Split { feature, threshold, left, right }) => {
                    let value = features.get(*feature).ok_or_else(|| BackendFault("feature index out of range".into()))?;
                    idx = if *value <= *threshold { *left } else { *right };
                }
                Some(TreeNode::Leaf { distribution }) => return Ok(distribution),
                None => return Err(BackendFault("tree traversal left the node table".into())),
            }
        }
    }
}

/// Averages normalized leaf distributions across trees, like a bagged forest.
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionForest {
    pub n_features: usize,
    pub classes: Vec<String>,
    pub trees: Vec<DecisionTree>,
}

impl DecisionForest {
    pub fn validate(mut self) -> Result<Self, LoadError> {
        if self.n_features == 0 || self.classes.is_empty() || self.trees.is_empty() {
            return Err(LoadError::Invalid("forest needs features, classes and at least one tree".into()));
        }
        let (n_features, n_classes) = (self.n_features, self.classes.len());
        for tree in &mut self.trees {
            tree.validate(n_features, n_classes)?;
        }
        Ok(self)
    }

    fn proba(&self, features: &[f64]) -> Result<Vec<f64>, BackendFault> {
        let mut acc = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (slot, w) in acc.iter_mut().zip(tree.leaf(features)?) {
                *slot += w;
            }
        }
        let n = self.trees.len() as f64;
        acc.iter_mut().for_each(|p| *p /= n);
        Ok(acc)
    }
}

impl TabularEstimator for DecisionForest {
    fn n_features(&self) -> usize { self.n_features }

    fn predict(&self, features: &[f64]) -> Result<Label, BackendFault> {
        let proba = self.proba(features)?;
        class_label(&self.classes, &proba)
    }

    fn predict_proba(&self, features: &[f64]) -> Result<Option<Vec<f64>>, BackendFault> {
        self.proba(features).map(Some)
    }

    fn predict_with_proba(&self, features: &[f64]) -> Result<(Label, Option<Vec<f64>>), BackendFault> {
        let proba = self.proba(features)?;
        Ok((class_label(&self.classes, &proba)?, Some(proba)))
    }
}

/// Multinomial logistic regression; a single coefficient row with two classes
/// is the binary (sigmoid) form.
#[derive(Debug, Clone, Deserialize)]
pub struct LogisticRegression {
    pub classes: Vec<String>,
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

impl LogisticRegression {
    pub fn validate(self) -> Result<Self, LoadError> {
        let rows = self.coefficients.len();
        let binary = rows == 1 && self.classes.len() == 2;
        if self.classes.len() < 2 || !(binary || rows == self.classes.len()) {
            return Err(LoadError::Invalid(format!(
                "{rows} coefficient rows do not fit {} classes",
                self.classes.len()
            )));
        }
        if self.intercepts.len() != rows {
            return Err(LoadError::Invalid("one intercept per coefficient row required".into()));
        }
        let width = self.coefficients[0].len();
        if width == 0 || self.coefficients.iter().any(|r| r.len() != width) {
            return Err(LoadError::Invalid("coefficient rows must share a non-zero width".into()));
        }
        Ok(self)
    }

    fn proba(&self, features: &[f64]) -> Result<Vec<f64>, BackendFault> {
        let mut scores: Vec<f64> = self
            .coefficients
            .iter()
            .zip(&self.intercepts)
            .map(|(row, b)| dot(row, features) + b)
            .collect();
        if scores.len() == 1 {
            let p = 1.0 / (1.0 + (-scores[0]).exp());
            return Ok(vec![1.0 - p, p]);
        }
        super::neural::softmax(&mut scores);
        if scores.iter().any(|p| !p.is_finite()) {
            return Err(BackendFault("probability computation overflowed".into()));
        }
        Ok(scores)
    }
}

impl TabularEstimator for LogisticRegression {
    fn n_features(&self) -> usize { self.coefficients.first().map_or(0, Vec::len) }

    fn predict(&self, features: &[f64]) -> Result<Label, BackendFault> {
        let proba = self.proba(features)?;
        class_label(&self.classes, &proba)
    }

    fn predict_proba(&self, features: &[f64]) -> Result<Option<Vec<f64>>, BackendFault> {
        self.proba(features).map(Some)
    }

    fn predict_with_proba(&self, features: &[f64]) -> Result<(Label, Option<Vec<f64>>), BackendFault> {
        let proba = self.proba(features)?;
        Ok((class_label(&self.classes, &proba)?, Some(proba)))
    }
}

/// Ordinary linear regressor. Has no probability output.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearRegression {
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
}

impl LinearRegression {
    pub fn validate(self) -> Result<Self, LoadError> {
        if self.coefficients.is_empty() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(LoadError::Invalid("linear model needs finite coefficients".into()));
        }
        Ok(self)
    }
}

impl TabularEstimator for LinearRegression {
    fn n_features(&self) -> usize { self.coefficients.len() }

    fn predict(&self, features: &[f64]) -> Result<Label, BackendFault> {
        let y = dot(&self.coefficients, features) + self.intercept;
        if !y.is_finite() {
            return Err(BackendFault("regression output is not finite".into()));
        }
        Ok(Label::Value(y))
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn class_label(classes: &[String], proba: &[f64]) -> Result<Label, BackendFault> {
    argmax(proba)
        .and_then(|(idx, _)| classes.get(idx))
        .map(|name| Label::Class(name.clone()))
        .ok_or_else(|| BackendFault("no class could be selected".into()))
}
