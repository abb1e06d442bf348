//! Learning rate schedule
//!
//! Cosine decay with warm restarts (SGDR), evaluated per optimizer step:
//! the first period lasts `first_decay_steps`, every following period is
//! `t_mul` times longer and restarts at `m_mul` times the previous peak.
//! The rate never drops below `alpha * initial_learning_rate`.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CosineDecayRestarts {
    pub initial_learning_rate: f64,
    pub first_decay_steps: u64,
    pub t_mul: f64,
    pub m_mul: f64,
    pub alpha: f64,
}

impl CosineDecayRestarts {
    /// Learning rate at optimizer step `step` (0-based).
    pub fn learning_rate(&self, step: u64) -> f64 {
        if self.first_decay_steps == 0 {
            return self.initial_learning_rate;
        }
        let mut completed = step as f64 / self.first_decay_steps as f64;
        let i_restart = if (self.t_mul - 1.0).abs() < f64::EPSILON {
            let i = completed.floor();
            completed -= i;
            i
        } else {
            let i = ((1.0 - completed * (1.0 - self.t_mul)).ln() / self.t_mul.ln()).floor();
            let sum_r = (1.0 - self.t_mul.powf(i)) / (1.0 - self.t_mul);
            completed = (completed - sum_r) / self.t_mul.powf(i);
            i
        };
        let m_fac = self.m_mul.powf(i_restart);
        let cosine = 0.5 * m_fac * (1.0 + (PI * completed).cos());
        let decayed = (1.0 - self.alpha) * cosine + self.alpha;
        self.initial_learning_rate * decayed
    }
}
