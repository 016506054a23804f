//! Built-in iris classifier used when no model source is configured.
//!
//! Three fixed trees over `[sepal_length, sepal_width, petal_length, petal_width]`
//! with the usual setosa / versicolor / virginica split points. Deterministic by
//! construction, no training at startup.

use super::tabular::{DecisionForest, DecisionTree, TreeNode};
use super::{Backend, ModelHandle};

pub const DEMO_VERSION: &str = "demo";
pub const DEMO_CLASSES: [&str; 3] = ["setosa", "versicolor", "virginica"];

const SEPAL_LENGTH: usize = 0;
const PETAL_LENGTH: usize = 2;
const PETAL_WIDTH: usize = 3;

fn split(feature: usize, threshold: f64, left: usize, right: usize) -> TreeNode {
    TreeNode::Split { feature, threshold, left, right }
}

fn leaf(distribution: [f64; 3]) -> TreeNode {
    TreeNode::Leaf { distribution: distribution.to_vec() }
}

fn trees() -> Vec<DecisionTree> {
    vec![
        DecisionTree {
            nodes: vec![
                split(PETAL_LENGTH, 2.45, 1, 2),
                leaf([1.0, 0.0, 0.0]),
                split(PETAL_WIDTH, 1.75, 3, 6),
                split(PETAL_LENGTH, 4.95, 4, 5),
                leaf([0.0, 0.98, 0.02]),
                leaf([0.0, 0.33, 0.67]),
                leaf([0.0, 0.02, 0.98]),
            ],
        },
        DecisionTree {
            nodes: vec![
                split(PETAL_WIDTH, 0.8, 1, 2),
                leaf([1.0, 0.0, 0.0]),
                split(PETAL_LENGTH, 4.85, 3, 4),
                leaf([0.0, 0.97, 0.03]),
                leaf([0.0, 0.06, 0.94]),
            ],
        },
        DecisionTree {
            nodes: vec![
                split(PETAL_LENGTH, 2.6, 1, 2),
                leaf([1.0, 0.0, 0.0]),
                split(SEPAL_LENGTH, 6.15, 3, 6),
                split(PETAL_WIDTH, 1.65, 4, 5),
                leaf([0.0, 0.95, 0.05]),
                leaf([0.0, 0.1, 0.9]),
                split(PETAL_WIDTH, 1.7, 7, 8),
                leaf([0.0, 0.8, 0.2]),
                leaf([0.0, 0.0, 1.0]),
            ],
        },
    ]
}

pub fn demo_forest() -> DecisionForest {
    DecisionForest {
        n_features: 4,
        classes: DEMO_CLASSES.iter().map(|c| c.to_string()).collect(),
        trees: trees(),
    }
}

pub fn demo_handle() -> ModelHandle {
    ModelHandle::new(Backend::Tabular(Box::new(demo_forest())), DEMO_VERSION)
}
