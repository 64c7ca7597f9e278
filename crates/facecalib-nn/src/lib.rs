#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # facecalib NN
//!
//! Minimal building blocks for the landmark estimators: gemm-backed linear
//! layers with hand-written backward passes, a two-layer perceptron that
//! keeps its parameters in one flat buffer, and an Adam updater whose state
//! can be checkpointed.
//!
//! ## Example: one Adam step on a perceptron
//!
//! ```rust
//! use facecalib_nn::{Adam, AdamParams, Mlp};
//!
//! let mut mlp = Mlp::new(4, 8, 1, 0);
//! let mut adam = Adam::new(AdamParams::default().with_lr(1e-2), mlp.num_params());
//!
//! let input = [0.1, -0.2, 0.3, 0.05];
//! let trace = mlp.forward(&input, 1)?;
//! // d(loss)/d(output) for loss = output
//! let grads = mlp.backward(&trace, &[1.0])?;
//! adam.step(mlp.params_mut(), &grads)?;
//! # Ok::<(), facecalib_nn::NnError>(())
//! ```

/// Adam parameter updater.
pub mod adam;

/// Linear (fully-connected) layer operations.
pub mod linear;

/// Two-layer perceptron with a flat parameter buffer.
pub mod mlp;

pub use adam::{Adam, AdamParams, AdamState};
pub use mlp::{Mlp, MlpTrace};

use thiserror::Error;

/// Error types for the neural network building blocks.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NnError {
    /// A buffer does not have the length implied by the layer dimensions.
    #[error("Size mismatch for {what}: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Name of the offending buffer.
        what: &'static str,
        /// Expected number of elements.
        expected: usize,
        /// Actual number of elements.
        actual: usize,
    },
}

pub(crate) fn ensure_len(what: &'static str, expected: usize, actual: usize) -> Result<(), NnError> {
    if expected != actual {
        return Err(NnError::SizeMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}
