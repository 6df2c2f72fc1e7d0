pub mod adam;
pub mod schedule;
pub mod sgd;

pub use adam::Adam;
pub use schedule::StepLr;
pub use sgd::Sgd;

use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::checkpoint::Stateful;
use crate::error::Result;
use crate::math::matrix::Matrix;

/// Which update rule a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Optimizer {
    Adam(Adam),
    Sgd(Sgd),
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: f64) -> Optimizer {
        match kind {
            OptimizerKind::Adam => Optimizer::Adam(Adam::new(learning_rate)),
            OptimizerKind::Sgd => Optimizer::Sgd(Sgd::new(learning_rate)),
        }
    }

    pub fn step(&mut self, params: Vec<&mut Matrix>, grads: &[Matrix]) -> Result<()> {
        match self {
            Optimizer::Adam(adam) => adam.step(params, grads),
            Optimizer::Sgd(sgd) => sgd.step(params, grads),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Optimizer::Adam(adam) => adam.learning_rate = lr,
            Optimizer::Sgd(sgd) => sgd.learning_rate = lr,
        }
    }
}

impl Stateful for Optimizer {
    fn state_dict(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_state_dict(&mut self, state: Value) -> Result<()> {
        *self = serde_json::from_value(state)?;
        Ok(())
    }
}

impl Stateful for StepLr {
    fn state_dict(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_state_dict(&mut self, state: Value) -> Result<()> {
        *self = serde_json::from_value(state)?;
        Ok(())
    }
}
