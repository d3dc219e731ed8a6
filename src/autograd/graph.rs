//! Graph executor: issues kernels and owns the gradient tape

use super::backward::{BackwardStep, OpKind};
use super::Tensor;
use crate::config::GraphConfig;
use crate::error::{Error, Result};
use log::{debug, trace, warn};
use ndarray::Array1;

/// Executor for differentiable kernels
///
/// Every kernel runs eagerly and, while tracking is enabled, appends one
/// backward step to the tape. [`replay`](Graph::replay) walks the tape from
/// the last step to the first. One executor serves one expression at a time;
/// call [`restart`](Graph::restart) between independent forward/backward
/// cycles.
pub struct Graph {
    config: GraphConfig,
    tape: Vec<BackwardStep>,
}

impl Graph {
    /// Create an executor with the given configuration
    pub fn new(config: GraphConfig) -> Self {
        debug!("graph created (track_gradients={})", config.track_gradients);
        Self {
            config,
            tape: Vec::new(),
        }
    }

    /// Executor that records backward steps
    pub fn training() -> Self {
        Self::new(GraphConfig::default())
    }

    /// Forward-only executor
    pub fn inference() -> Self {
        Self::new(GraphConfig::inference())
    }

    pub fn config(&self) -> GraphConfig {
        self.config
    }

    pub fn is_tracking(&self) -> bool {
        self.config.track_gradients
    }

    /// Number of recorded backward steps
    pub fn tape_len(&self) -> usize {
        self.tape.len()
    }

    /// Kernel kinds on the tape, in forward order
    pub fn step_kinds(&self) -> Vec<OpKind> {
        self.tape.iter().map(BackwardStep::kind).collect()
    }

    /// Human-readable step descriptions in forward order, naming the
    /// activation of every `Activate` step
    pub fn step_descriptions(&self) -> Vec<String> {
        self.tape.iter().map(BackwardStep::describe).collect()
    }

    /// Clear the tape and set the tracking flag for the next expression
    pub fn restart(&mut self, track_gradients: bool) {
        debug!(
            "graph restart: dropping {} steps, track_gradients={}",
            self.tape.len(),
            track_gradients
        );
        self.tape.clear();
        self.config.track_gradients = track_gradients;
    }

    /// Run every recorded backward step, last recorded first
    ///
    /// The caller seeds the output gradient beforehand. Replaying a tape
    /// built with tracking disabled does nothing.
    pub fn replay(&self) -> Result<()> {
        if self.tape.is_empty() && !self.config.track_gradients {
            warn!("replay on an untracked graph: no backward steps were recorded");
            return Ok(());
        }

        debug!("replaying {} backward steps", self.tape.len());
        for (index, step) in self.tape.iter().enumerate().rev() {
            trace!("backward step {index}: {}", step.describe());
            step.run()?;
        }
        debug!("replay complete");
        Ok(())
    }

    /// Seed `output` and replay the tape
    ///
    /// With no explicit seed the output gradient is set to ones, which is the
    /// usual seed for a scalar loss.
    pub fn backward(&self, output: &Tensor, seed: Option<Array1<f32>>) -> Result<()> {
        match seed {
            Some(grad) => output.set_grad(grad)?,
            None => output.seed_ones()?,
        }
        self.replay()
    }

    /// Decide whether a kernel output is inference-only
    ///
    /// Tracked kernels need gradient buffers on every operand.
    pub(crate) fn output_mode(&self, inputs: &[&Tensor]) -> Result<bool> {
        let any_reduced = inputs.iter().any(|t| t.is_inference_only());
        if any_reduced && self.config.track_gradients {
            return Err(Error::InferenceOnly(
                "cannot record a backward step over a tensor without a gradient buffer",
            ));
        }
        Ok(any_reduced)
    }

    pub(crate) fn record(&mut self, step: impl FnOnce() -> BackwardStep) {
        if self.config.track_gradients {
            self.tape.push(step());
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::training()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("track_gradients", &self.config.track_gradients)
            .field("tape", &self.step_kinds())
            .finish()
    }
}
