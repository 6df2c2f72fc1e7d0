use serde::{Serialize, Deserialize};

/// Decays the learning rate by `gamma` every `step_size` iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLr {
    pub base_lr: f64,
    pub step_size: usize,
    pub gamma: f64,
    pub last_step: usize,
}

impl StepLr {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> StepLr {
        StepLr { base_lr, step_size, gamma, last_step: 0 }
    }

    pub fn current_lr(&self) -> f64 {
        if self.step_size == 0 {
            return self.base_lr;
        }
        self.base_lr * self.gamma.powi((self.last_step / self.step_size) as i32)
    }

    /// Advances one iteration and returns the learning rate to use next.
    pub fn step(&mut self) -> f64 {
        self.last_step += 1;
        self.current_lr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decays_at_step_boundaries() {
        let mut sched = StepLr::new(1.0, 2, 0.5);
        assert_eq!(sched.step(), 1.0);
        assert_eq!(sched.step(), 0.5);
        assert_eq!(sched.step(), 0.5);
        assert_eq!(sched.step(), 0.25);
    }
}
