use crate::linear::{linear_layer_backward, linear_layer_gemm};
use crate::{ensure_len, NnError};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Two-layer perceptron `y = W2 * tanh(W1 * x + b1) + b2`.
///
/// All parameters live in one flat buffer laid out as `[W1, b1, W2, b2]`
/// with row-major weights, so updaters and checkpoints treat the network
/// as a single vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Mlp {
    input_dim: usize,
    hidden_dim: usize,
    output_dim: usize,
    params: Vec<f64>,
}

/// Activations recorded by [`Mlp::forward`], consumed by [`Mlp::backward`].
#[derive(Debug, Clone)]
pub struct MlpTrace {
    rows: usize,
    input: Vec<f64>,
    hidden: Vec<f64>,
    output: Vec<f64>,
}

impl MlpTrace {
    /// Network output of shape `[rows, output_dim]`.
    pub fn output(&self) -> &[f64] {
        &self.output
    }

    /// Number of input rows.
    pub fn rows(&self) -> usize {
        self.rows
    }
}

impl Mlp {
    /// Create a perceptron with Xavier-uniform hidden weights drawn from `seed`.
    ///
    /// The output layer starts at zero, so a fresh network outputs zeros.
    pub fn new(input_dim: usize, hidden_dim: usize, output_dim: usize, seed: u64) -> Self {
        let mut params = vec![0.0; Self::param_count(input_dim, hidden_dim, output_dim)];
        let mut rng = StdRng::seed_from_u64(seed);
        let bound = (6.0 / (input_dim + hidden_dim) as f64).sqrt();
        for w in params[..hidden_dim * input_dim].iter_mut() {
            *w = rng.random_range(-bound..bound);
        }
        Self {
            input_dim,
            hidden_dim,
            output_dim,
            params,
        }
    }

    /// Rebuild a perceptron from a flat parameter buffer.
    pub fn from_params(
        input_dim: usize,
        hidden_dim: usize,
        output_dim: usize,
        params: Vec<f64>,
    ) -> Result<Self, NnError> {
        ensure_len(
            "mlp parameters",
            Self::param_count(input_dim, hidden_dim, output_dim),
            params.len(),
        )?;
        Ok(Self {
            input_dim,
            hidden_dim,
            output_dim,
            params,
        })
    }

    fn param_count(input_dim: usize, hidden_dim: usize, output_dim: usize) -> usize {
        hidden_dim * input_dim + hidden_dim + output_dim * hidden_dim + output_dim
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// Input dimension.
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Output dimension.
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Flat parameter buffer.
    pub fn params(&self) -> &[f64] {
        &self.params
    }

    /// Mutable flat parameter buffer.
    pub fn params_mut(&mut self) -> &mut [f64] {
        &mut self.params
    }

    // offsets of W1, b1, W2, b2 in the flat buffer
    fn offsets(&self) -> [usize; 4] {
        let w1 = 0;
        let b1 = w1 + self.hidden_dim * self.input_dim;
        let w2 = b1 + self.hidden_dim;
        let b2 = w2 + self.output_dim * self.hidden_dim;
        [w1, b1, w2, b2]
    }

    /// Forward pass over `rows` stacked inputs of length `input_dim`.
    pub fn forward(&self, input: &[f64], rows: usize) -> Result<MlpTrace, NnError> {
        ensure_len("mlp input", rows * self.input_dim, input.len())?;
        let [w1, b1, w2, b2] = self.offsets();
        let p = &self.params;

        let mut hidden = vec![0.0; rows * self.hidden_dim];
        linear_layer_gemm(
            input,
            &p[w1..b1],
            &p[b1..w2],
            &mut hidden,
            rows,
            self.input_dim,
            self.hidden_dim,
        );
        hidden.iter_mut().for_each(|h| *h = h.tanh());

        let mut output = vec![0.0; rows * self.output_dim];
        linear_layer_gemm(
            &hidden,
            &p[w2..b2],
            &p[b2..],
            &mut output,
            rows,
            self.hidden_dim,
            self.output_dim,
        );

        Ok(MlpTrace {
            rows,
            input: input.to_vec(),
            hidden,
            output,
        })
    }

    /// Backward pass: gradient of the loss w.r.t. the flat parameters given
    /// the gradient w.r.t. the output recorded in `trace`.
    pub fn backward(&self, trace: &MlpTrace, grad_output: &[f64]) -> Result<Vec<f64>, NnError> {
        let rows = trace.rows;
        ensure_len("mlp output gradient", rows * self.output_dim, grad_output.len())?;
        let [w1, b1, w2, b2] = self.offsets();
        let p = &self.params;
        let mut grads = vec![0.0; self.params.len()];

        let mut grad_hidden = vec![0.0; rows * self.hidden_dim];
        {
            let (_, tail) = grads.split_at_mut(w2);
            let (grad_w2, grad_b2) = tail.split_at_mut(b2 - w2);
            linear_layer_backward(
                &trace.hidden,
                &p[w2..b2],
                grad_output,
                grad_w2,
                grad_b2,
                Some(&mut grad_hidden),
                rows,
                self.hidden_dim,
                self.output_dim,
            );
        }

        // d tanh(x) / dx = 1 - tanh(x)^2
        for (g, h) in grad_hidden.iter_mut().zip(trace.hidden.iter()) {
            *g *= 1.0 - h * h;
        }

        let (head, _) = grads.split_at_mut(w2);
        let (grad_w1, grad_b1) = head.split_at_mut(b1 - w1);
        linear_layer_backward(
            &trace.input,
            &p[w1..b1],
            &grad_hidden,
            grad_w1,
            grad_b1,
            None,
            rows,
            self.input_dim,
            self.hidden_dim,
        );

        Ok(grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fresh_mlp_outputs_zero() -> Result<(), NnError> {
        let mlp = Mlp::new(3, 5, 2, 11);
        let trace = mlp.forward(&[0.5, -1.0, 2.0, 0.1, 0.2, 0.3], 2)?;
        assert!(trace.output().iter().all(|&v| v == 0.0));
        Ok(())
    }

    #[test]
    fn test_forward_rejects_wrong_input_len() {
        let mlp = Mlp::new(3, 5, 2, 11);
        assert_eq!(
            mlp.forward(&[0.0; 5], 2).err(),
            Some(NnError::SizeMismatch {
                what: "mlp input",
                expected: 6,
                actual: 5
            })
        );
    }

    #[test]
    fn test_backward_matches_finite_differences() -> Result<(), NnError> {
        let mut mlp = Mlp::new(3, 4, 2, 3);
        // give the output layer non-zero weights so every gradient path is active
        let n = mlp.num_params();
        for (i, p) in mlp.params_mut().iter_mut().enumerate().skip(n - 10) {
            *p = 0.1 * (i as f64).sin();
        }
        let input = [0.2, -0.4, 0.9, -0.3, 0.6, 0.1];
        let coeff = [0.7, -1.3, 0.4, 2.0];

        let loss = |m: &Mlp| -> Result<f64, NnError> {
            let t = m.forward(&input, 2)?;
            Ok(t.output().iter().zip(coeff.iter()).map(|(o, c)| o * c).sum())
        };

        let trace = mlp.forward(&input, 2)?;
        let grads = mlp.backward(&trace, &coeff)?;

        let h = 1e-6;
        for i in 0..n {
            let mut plus = mlp.clone();
            plus.params_mut()[i] += h;
            let mut minus = mlp.clone();
            minus.params_mut()[i] -= h;
            let fd = (loss(&plus)? - loss(&minus)?) / (2.0 * h);
            assert_relative_eq!(grads[i], fd, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_from_params_round_trip() -> Result<(), NnError> {
        let mlp = Mlp::new(3, 4, 2, 5);
        let rebuilt = Mlp::from_params(3, 4, 2, mlp.params().to_vec())?;
        assert_eq!(mlp, rebuilt);
        assert!(Mlp::from_params(3, 4, 2, vec![0.0; 3]).is_err());
        Ok(())
    }
}
