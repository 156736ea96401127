//! Sparse transition matrix and stationary equilibrium solving.

pub mod divergence;
pub mod matrix;
pub mod solver;

pub use matrix::TransitionMatrix;
pub use solver::{stationary, Equilibrium, SolverOptions};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("empty chain: no transitions observed")]
    EmptyChain,
    #[error("equilibrium did not converge after {iterations} iterations (residual {residual:.3e}, tolerance {tolerance:.3e})")]
    NotConverged {
        iterations: u32,
        residual: f64,
        tolerance: f64,
    },
}
