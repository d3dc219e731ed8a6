//! # Gradiente: eager reverse-mode automatic differentiation
//!
//! Gradiente executes neural-network primitives on 3-D tensors and records,
//! for each one, the step that computes its gradient. Replaying those steps
//! in reverse yields gradients for every tensor involved.
//!
//! ## Architecture
//!
//! - **autograd**: tensors, the tape executor, activations and kernels
//! - **config**: executor configuration (YAML-loadable)
//! - **error**: crate-wide error type
//!
//! ```
//! use gradiente::{Graph, Tensor};
//!
//! let mut graph = Graph::training();
//! let x = Tensor::column(vec![1.0, 2.0, 3.0]);
//! let w = Tensor::column(vec![0.5, -1.0, 2.0]);
//! let y = graph.scalar_product(&x, &w)?;
//! graph.backward(&y, None)?;
//! assert_eq!(x.grad()?.to_vec(), vec![0.5, -1.0, 2.0]);
//! # Ok::<(), gradiente::Error>(())
//! ```

pub mod autograd;
pub mod config;

pub mod error;

// Re-export commonly used types
pub use autograd::{backward, Activation, ConvParams, Graph, GruWeights, OpKind, Shape, Tensor};
pub use config::GraphConfig;
pub use error::{Error, Result};
