use crate::batch::{BatchShape, ImageSize, LandmarkBatch};
use crate::checkpoint::{Checkpoint, CheckpointStore, CheckpointToken};
use crate::device::Device;
use crate::error::CalibError;
use crate::estimator::{
    CalibNet, CalibNetConfig, IntrinsicEstimator, SfmNet, SfmNetConfig, ShapeEstimator,
};
use crate::metrics::{MetricsSink, NullSink};
use crate::objective::{LossWeights, ObjectiveTerms, ReprojectionObjective};
use crate::pose::{solve_poses, PoseBatch};
use crate::prediction::{IntrinsicPrediction, ShapePrediction};
use crate::schedule::{OptimizationState, Phase, Schedule};
use facecalib_nn::{Adam, AdamParams};
use facecalib_pnp::EPnPParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Externally supplied configuration of an [`Optimizer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Batch contract every step is checked against.
    pub batch: BatchShape,
    /// Image the landmarks live in.
    pub image: ImageSize,
    /// Updater of the intrinsic estimator.
    pub calib: AdamParams,
    /// Updater of the shape estimator.
    pub sfm: AdamParams,
    /// Loss term weights.
    pub weights: LossWeights,
    /// Pose solver tolerances.
    pub pnp: EPnPParams,
    /// Device every component must live on.
    pub device: Device,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            batch: BatchShape::default(),
            image: ImageSize::default(),
            calib: AdamParams::default().with_lr(1e-3),
            sfm: AdamParams::default().with_lr(1e-4),
            weights: LossWeights::default(),
            pnp: EPnPParams::default(),
            device: Device::Cpu,
        }
    }
}

impl OptimizerConfig {
    /// Set the batch contract and image size.
    pub fn with_input(mut self, batch: BatchShape, image: ImageSize) -> Self {
        self.batch = batch;
        self.image = image;
        self
    }

    /// Set the learning rates of both updaters.
    pub fn with_learning_rates(mut self, calib_lr: f64, sfm_lr: f64) -> Self {
        self.calib.lr = calib_lr;
        self.sfm.lr = sfm_lr;
        self
    }

    /// Set the loss term weights.
    pub fn with_weights(mut self, weights: LossWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set the compute device.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }
}

/// Outcome of one gradient step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Optimizer step index, counted over the optimizer's lifetime.
    pub step: usize,
    /// Phase the step ran in.
    pub phase: Phase,
    /// Objective before the update.
    pub terms: ObjectiveTerms,
    /// Batch-mean focal length before the update.
    pub mean_focal: f64,
}

/// Everything a finished run produces.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Final shape prediction.
    pub shape: ShapePrediction,
    /// Final per-frame intrinsics.
    pub intrinsics: IntrinsicPrediction,
    /// Intrinsics averaged over the batch.
    pub camera_matrix: [[f64; 3]; 3],
    /// Poses solved with the final predictions.
    pub poses: PoseBatch,
    /// Objective of the final predictions.
    pub terms: ObjectiveTerms,
    /// One report per step.
    pub history: Vec<StepReport>,
    /// Schedule state at the end of the run.
    pub state: OptimizationState,
}

/// Schedule controller driving the two estimators.
///
/// Each estimator has its own updater; the active [`Phase`] decides which
/// of them runs on a given step.
pub struct Optimizer<I = CalibNet, S = SfmNet> {
    config: OptimizerConfig,
    objective: ReprojectionObjective,
    intrinsic: I,
    shape: S,
    calib_updater: Adam,
    sfm_updater: Adam,
    state: OptimizationState,
    steps_taken: usize,
}

impl Optimizer<CalibNet, SfmNet> {
    /// Build an optimizer around freshly initialised [`CalibNet`] and [`SfmNet`] estimators.
    pub fn from_config(config: OptimizerConfig, seed: u64) -> Result<Self, CalibError> {
        let intrinsic = CalibNet::new(
            CalibNetConfig::default()
                .with_input(config.batch, config.image)
                .with_seed(seed),
        )?;
        let shape = SfmNet::new(
            SfmNetConfig::default()
                .with_input(config.batch, config.image)
                .with_seed(seed.wrapping_add(1)),
        )?;
        Self::new(config, intrinsic, shape)
    }
}

impl<I: IntrinsicEstimator, S: ShapeEstimator> Optimizer<I, S> {
    /// Create an optimizer over the given estimators.
    ///
    /// Fails if the device is unavailable, an estimator lives elsewhere,
    /// or a learning rate is not positive.
    pub fn new(config: OptimizerConfig, intrinsic: I, shape: S) -> Result<Self, CalibError> {
        config.device.ensure_supported()?;
        config
            .device
            .ensure_same("intrinsic estimator", intrinsic.device())?;
        config.device.ensure_same("shape estimator", shape.device())?;
        check_lr("calib", config.calib.lr)?;
        check_lr("sfm", config.sfm.lr)?;

        let calib_updater = Adam::new(config.calib.clone(), intrinsic.params().len());
        let sfm_updater = Adam::new(config.sfm.clone(), shape.params().len());
        Ok(Self {
            objective: ReprojectionObjective::new(config.weights),
            config,
            intrinsic,
            shape,
            calib_updater,
            sfm_updater,
            state: OptimizationState {
                global_step: 0,
                round: 0,
                phase_step: 0,
                phase: Phase::Joint,
            },
            steps_taken: 0,
        })
    }

    /// Restore an optimizer from the checkpoint saved under `token`.
    pub fn from_checkpoint(
        config: OptimizerConfig,
        intrinsic: I,
        shape: S,
        store: &CheckpointStore,
        token: &CheckpointToken,
    ) -> Result<Self, CalibError> {
        let mut optimizer = Self::new(config, intrinsic, shape)?;
        optimizer.load(store, token)?;
        Ok(optimizer)
    }

    /// Configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// The intrinsic estimator.
    pub fn intrinsic_estimator(&self) -> &I {
        &self.intrinsic
    }

    /// The shape estimator.
    pub fn shape_estimator(&self) -> &S {
        &self.shape
    }

    /// Schedule state of the current or last run.
    pub fn state(&self) -> &OptimizationState {
        &self.state
    }

    /// Gradient steps taken over the optimizer's lifetime.
    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    /// Learning rate of the intrinsic updater.
    pub fn calib_lr(&self) -> f64 {
        self.calib_updater.lr()
    }

    /// Learning rate of the shape updater.
    pub fn sfm_lr(&self) -> f64 {
        self.sfm_updater.lr()
    }

    /// Override the learning rate of the intrinsic updater.
    pub fn set_calib_lr(&mut self, lr: f64) -> Result<(), CalibError> {
        check_lr("calib", lr)?;
        self.calib_updater.set_lr(lr);
        Ok(())
    }

    /// Override the learning rate of the shape updater.
    pub fn set_sfm_lr(&mut self, lr: f64) -> Result<(), CalibError> {
        check_lr("sfm", lr)?;
        self.sfm_updater.set_lr(lr);
        Ok(())
    }

    /// Predict per-frame intrinsics for `batch`.
    pub fn predict_intrinsics(&self, batch: &LandmarkBatch) -> Result<IntrinsicPrediction, CalibError> {
        batch.ensure_shape(self.config.batch)?;
        self.intrinsic.predict(batch)
    }

    /// Predict per-frame 3D landmarks for `batch`.
    pub fn predict_shape(&self, batch: &LandmarkBatch) -> Result<ShapePrediction, CalibError> {
        batch.ensure_shape(self.config.batch)?;
        self.shape.predict(batch)
    }

    /// Forward pass without any update: predictions, poses and objective.
    pub fn evaluate(
        &self,
        batch: &LandmarkBatch,
        focal_gt: Option<f64>,
    ) -> Result<(IntrinsicPrediction, ShapePrediction, PoseBatch, ObjectiveTerms), CalibError> {
        let intrinsics = self.predict_intrinsics(batch)?;
        let shape = self.predict_shape(batch)?;
        check_focals(self.steps_taken, &intrinsics)?;
        let poses = solve_poses(&shape, batch, &intrinsics, &self.config.pnp)?;
        let eval = self
            .objective
            .evaluate(&shape, &poses, &intrinsics, batch, focal_gt)?;
        Ok((intrinsics, shape, poses, eval.terms))
    }

    /// One gradient step restricted to the estimators `phase` updates.
    ///
    /// Gradients of both estimators are computed and checked before any
    /// parameter changes, so a failing step leaves the optimizer untouched.
    pub fn step(
        &mut self,
        batch: &LandmarkBatch,
        focal_gt: Option<f64>,
        phase: Phase,
    ) -> Result<StepReport, CalibError> {
        batch.ensure_shape(self.config.batch)?;
        let step = self.steps_taken;

        let (intrinsics, intrinsic_trace) = self.intrinsic.forward(batch)?;
        let (shape, shape_trace) = self.shape.forward(batch)?;
        check_focals(step, &intrinsics)?;

        // poses are solved on plain values and stay constant for this step
        let poses = solve_poses(&shape, batch, &intrinsics, &self.config.pnp)?;
        let eval = self
            .objective
            .evaluate(&shape, &poses, &intrinsics, batch, focal_gt)?;
        check_finite(step, "loss", &[eval.terms.loss])?;

        let calib_grads = if phase.updates_intrinsics() {
            let grads = self.intrinsic.backward(&intrinsic_trace, &eval.grad_focal)?;
            check_finite(step, "intrinsic gradient", &grads)?;
            Some(grads)
        } else {
            None
        };
        let sfm_grads = if phase.updates_shape() {
            let grads = self.shape.backward(&shape_trace, &eval.grad_shape)?;
            check_finite(step, "shape gradient", &grads)?;
            Some(grads)
        } else {
            None
        };

        if let Some(grads) = calib_grads {
            self.calib_updater.step(self.intrinsic.params_mut(), &grads)?;
        }
        if let Some(grads) = sfm_grads {
            self.sfm_updater.step(self.shape.params_mut(), &grads)?;
        }
        self.steps_taken += 1;

        let report = StepReport {
            step,
            phase,
            terms: eval.terms,
            mean_focal: intrinsics.mean_focal(),
        };
        log::debug!(
            "step {step} [{phase}] loss {:.6} s_error {:.4}px f {:.2} excluded {}",
            report.terms.loss,
            report.terms.s_error,
            report.mean_focal,
            report.terms.excluded_frames
        );
        Ok(report)
    }

    /// One joint training step on a sample, reported to `sink`.
    pub fn train_step(
        &mut self,
        batch: &LandmarkBatch,
        focal_gt: Option<f64>,
        sink: &mut dyn MetricsSink,
    ) -> Result<StepReport, CalibError> {
        let report = self.step(batch, focal_gt, Phase::Joint)?;
        record_step(sink, &report);
        Ok(report)
    }

    /// Run `schedule` to completion on `batch`.
    ///
    /// The first failing step aborts the run and its error is returned.
    pub fn run(
        &mut self,
        batch: &LandmarkBatch,
        focal_gt: Option<f64>,
        schedule: Schedule,
        sink: &mut dyn MetricsSink,
    ) -> Result<RunOutput, CalibError> {
        batch.ensure_shape(self.config.batch)?;
        log::info!(
            "running {schedule:?} for {} steps on {} frames",
            schedule.total_steps(),
            batch.num_frames()
        );

        let mut state = OptimizationState::start(&schedule);
        let mut history = Vec::with_capacity(schedule.total_steps());
        let mut previous: Option<(Phase, usize)> = None;
        while !state.phase.is_finished() {
            if previous != Some((state.phase, state.round)) {
                log::debug!("entering {} phase, round {}", state.phase, state.round);
                previous = Some((state.phase, state.round));
            }
            self.state = state;
            let report = self.step(batch, focal_gt, state.phase)?;
            record_step(sink, &report);
            history.push(report);
            state.advance(&schedule);
        }
        self.state = state;

        let (intrinsics, shape, poses, terms) = self.evaluate(batch, focal_gt)?;
        let mut metrics = vec![("s_error", terms.s_error), ("loss", terms.loss)];
        if let Some(f_error) = terms.f_error {
            metrics.push(("f_error", f_error));
        }
        sink.record_summary(
            &[
                ("calib_lr", self.calib_lr()),
                ("sfm_lr", self.sfm_lr()),
                ("focal_weight", self.config.weights.focal),
                ("reprojection_weight", self.config.weights.reprojection),
            ],
            &metrics,
        );
        log::info!(
            "run finished: f = {:.2}, s_error = {:.4}px",
            intrinsics.mean_focal(),
            terms.s_error
        );

        Ok(RunOutput {
            camera_matrix: intrinsics.averaged_camera_matrix(),
            shape,
            intrinsics,
            poses,
            terms,
            history,
            state,
        })
    }

    /// Update both estimators together for `max_iter` steps.
    pub fn joint_optimization(
        &mut self,
        batch: &LandmarkBatch,
        focal_gt: Option<f64>,
        max_iter: usize,
    ) -> Result<RunOutput, CalibError> {
        let schedule = Schedule::Joint {
            iterations: max_iter,
        };
        self.run(batch, focal_gt, schedule, &mut NullSink)
    }

    /// Train the intrinsic estimator, then the shape estimator.
    pub fn sequential_optimization(
        &mut self,
        batch: &LandmarkBatch,
        focal_gt: Option<f64>,
        calib_iter: usize,
        sfm_iter: usize,
    ) -> Result<RunOutput, CalibError> {
        let schedule = Schedule::Sequential {
            calib_iterations: calib_iter,
            sfm_iterations: sfm_iter,
        };
        self.run(batch, focal_gt, schedule, &mut NullSink)
    }

    /// Alternate intrinsic-only and shape-only phases for `rounds` rounds.
    pub fn dual_optimization(
        &mut self,
        batch: &LandmarkBatch,
        focal_gt: Option<f64>,
        rounds: usize,
        calib_iter: usize,
        sfm_iter: usize,
    ) -> Result<RunOutput, CalibError> {
        let schedule = Schedule::Alternating {
            rounds,
            calib_iterations: calib_iter,
            sfm_iterations: sfm_iter,
        };
        self.run(batch, focal_gt, schedule, &mut NullSink)
    }

    /// Snapshot parameters and updater state.
    pub fn checkpoint(&self, token: &CheckpointToken) -> Checkpoint {
        Checkpoint {
            format_version: Checkpoint::current_version(),
            token: token.to_string(),
            global_step: self.steps_taken as u64,
            intrinsic_params: self.intrinsic.params().to_vec(),
            shape_params: self.shape.params().to_vec(),
            calib_state: self.calib_updater.state().clone(),
            sfm_state: self.sfm_updater.state().clone(),
            calib_lr: self.calib_updater.lr(),
            sfm_lr: self.sfm_updater.lr(),
        }
    }

    /// Save parameters and updater state under `token`.
    pub fn save(&self, store: &CheckpointStore, token: &CheckpointToken) -> Result<PathBuf, CalibError> {
        store.save(token, &self.checkpoint(token))
    }

    /// Replace parameters and updater state with the checkpoint saved under `token`.
    ///
    /// Nothing is modified unless the checkpoint fits both estimators.
    pub fn load(&mut self, store: &CheckpointStore, token: &CheckpointToken) -> Result<(), CalibError> {
        let checkpoint = store.load(token)?;
        let mismatch = |what: &str, expected: usize, actual: usize| CalibError::CheckpointCorrupted {
            path: store.path(token),
            reason: format!("{what}: expected {expected} values, found {actual}"),
        };

        let calib_len = self.intrinsic.params().len();
        let sfm_len = self.shape.params().len();
        if checkpoint.intrinsic_params.len() != calib_len {
            return Err(mismatch(
                "intrinsic parameters",
                calib_len,
                checkpoint.intrinsic_params.len(),
            ));
        }
        if checkpoint.shape_params.len() != sfm_len {
            return Err(mismatch("shape parameters", sfm_len, checkpoint.shape_params.len()));
        }
        if checkpoint.calib_state.m.len() != calib_len || checkpoint.sfm_state.m.len() != sfm_len {
            return Err(mismatch(
                "updater state",
                calib_len + sfm_len,
                checkpoint.calib_state.m.len() + checkpoint.sfm_state.m.len(),
            ));
        }

        let calib_updater = Adam::from_state(
            self.config.calib.clone().with_lr(checkpoint.calib_lr),
            checkpoint.calib_state,
        )?;
        let sfm_updater = Adam::from_state(
            self.config.sfm.clone().with_lr(checkpoint.sfm_lr),
            checkpoint.sfm_state,
        )?;
        self.intrinsic.load_params(&checkpoint.intrinsic_params)?;
        self.shape.load_params(&checkpoint.shape_params)?;
        self.calib_updater = calib_updater;
        self.sfm_updater = sfm_updater;
        self.steps_taken = checkpoint.global_step as usize;

        log::info!(
            "loaded checkpoint {token} (step {}, calib lr {}, sfm lr {})",
            self.steps_taken,
            self.calib_lr(),
            self.sfm_lr()
        );
        Ok(())
    }
}

fn check_lr(which: &str, lr: f64) -> Result<(), CalibError> {
    if !(lr.is_finite() && lr > 0.0) {
        return Err(CalibError::InvalidConfig(format!(
            "{which} learning rate must be positive, got {lr}"
        )));
    }
    Ok(())
}

fn check_finite(step: usize, what: &'static str, values: &[f64]) -> Result<(), CalibError> {
    match values.iter().find(|v| !v.is_finite()) {
        Some(&value) => Err(CalibError::NumericalDivergence { step, what, value }),
        None => Ok(()),
    }
}

fn check_focals(step: usize, intrinsics: &IntrinsicPrediction) -> Result<(), CalibError> {
    check_finite(step, "focal length", intrinsics.focals())
}

fn record_step(sink: &mut dyn MetricsSink, report: &StepReport) {
    if let Some(f_error) = report.terms.f_error {
        sink.record_scalar("error/f_error", f_error, report.step);
    }
    sink.record_scalar("error/s_error", report.terms.s_error, report.step);
    sink.record_scalar("loss/train", report.terms.loss, report.step);
}
