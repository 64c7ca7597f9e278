use crate::{ensure_len, NnError};
use serde::{Deserialize, Serialize};

/// Hyper-parameters of the Adam updater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamParams {
    /// Learning rate.
    pub lr: f64,
    /// Exponential decay of the first moment.
    pub beta1: f64,
    /// Exponential decay of the second moment.
    pub beta2: f64,
    /// Denominator regulariser.
    pub eps: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl AdamParams {
    /// Set the learning rate.
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    /// Set the moment decay rates.
    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }
}

/// Moment estimates and step count of an [`Adam`] updater.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct AdamState {
    /// Number of updates applied so far.
    pub step: u64,
    /// First moment estimate, one entry per parameter.
    pub m: Vec<f64>,
    /// Second moment estimate, one entry per parameter.
    pub v: Vec<f64>,
}

impl AdamState {
    fn zeros(num_params: usize) -> Self {
        Self {
            step: 0,
            m: vec![0.0; num_params],
            v: vec![0.0; num_params],
        }
    }
}

/// Adam updater over one flat parameter group.
///
/// Reference: Kingma & Ba, "Adam: A Method for Stochastic Optimization", ICLR 2015.
#[derive(Debug, Clone)]
pub struct Adam {
    params: AdamParams,
    state: AdamState,
}

impl Adam {
    /// Create an updater for `num_params` parameters with zeroed moments.
    pub fn new(params: AdamParams, num_params: usize) -> Self {
        Self {
            params,
            state: AdamState::zeros(num_params),
        }
    }

    /// Restore an updater from a saved state.
    pub fn from_state(params: AdamParams, state: AdamState) -> Result<Self, NnError> {
        ensure_len("adam second moment", state.m.len(), state.v.len())?;
        Ok(Self { params, state })
    }

    /// Current learning rate.
    pub fn lr(&self) -> f64 {
        self.params.lr
    }

    /// Override the learning rate, keeping the moment estimates.
    pub fn set_lr(&mut self, lr: f64) {
        self.params.lr = lr;
    }

    /// Hyper-parameters.
    pub fn params(&self) -> &AdamParams {
        &self.params
    }

    /// Moment estimates.
    pub fn state(&self) -> &AdamState {
        &self.state
    }

    /// Number of parameters this updater was built for.
    pub fn num_params(&self) -> usize {
        self.state.m.len()
    }

    /// Apply one bias-corrected update `weights -= lr * m_hat / (sqrt(v_hat) + eps)`.
    pub fn step(&mut self, weights: &mut [f64], grads: &[f64]) -> Result<(), NnError> {
        ensure_len("adam weights", self.num_params(), weights.len())?;
        ensure_len("adam gradients", self.num_params(), grads.len())?;

        let AdamParams {
            lr,
            beta1,
            beta2,
            eps,
        } = self.params;
        self.state.step += 1;
        let t = self.state.step as i32;
        let bias1 = 1.0 - beta1.powi(t);
        let bias2 = 1.0 - beta2.powi(t);

        for (((w, g), m), v) in weights
            .iter_mut()
            .zip(grads.iter())
            .zip(self.state.m.iter_mut())
            .zip(self.state.v.iter_mut())
        {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *w -= lr * m_hat / (v_hat.sqrt() + eps);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_step_moves_by_lr() -> Result<(), NnError> {
        let mut adam = Adam::new(AdamParams::default().with_lr(0.1), 2);
        let mut w = [1.0, -1.0];
        adam.step(&mut w, &[3.0, -0.5])?;
        // bias-corrected first step is lr * sign(g)
        assert_relative_eq!(w[0], 0.9, epsilon = 1e-6);
        assert_relative_eq!(w[1], -0.9, epsilon = 1e-6);
        assert_eq!(adam.state().step, 1);
        Ok(())
    }

    #[test]
    fn test_minimises_quadratic() -> Result<(), NnError> {
        let mut adam = Adam::new(AdamParams::default().with_lr(0.05), 1);
        let mut w = [2.0];
        for _ in 0..500 {
            let g = [2.0 * (w[0] - 0.5)];
            adam.step(&mut w, &g)?;
        }
        assert_relative_eq!(w[0], 0.5, epsilon = 1e-2);
        Ok(())
    }

    #[test]
    fn test_zero_gradient_leaves_weights() -> Result<(), NnError> {
        let mut adam = Adam::new(AdamParams::default(), 3);
        let mut w = [0.1, 0.2, 0.3];
        adam.step(&mut w, &[0.0; 3])?;
        assert_eq!(w, [0.1, 0.2, 0.3]);
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_gradient_len() {
        let mut adam = Adam::new(AdamParams::default(), 3);
        let mut w = [0.0; 3];
        assert!(adam.step(&mut w, &[0.0; 2]).is_err());
    }
}
