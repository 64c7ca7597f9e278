use serde::{Deserialize, Serialize};

/// How updates are distributed between the two estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
    /// Update both estimators every step.
    Joint {
        /// Number of steps.
        iterations: usize,
    },
    /// Train the intrinsic estimator, then the shape estimator, once each.
    Sequential {
        /// Steps updating only the intrinsic estimator.
        calib_iterations: usize,
        /// Steps updating only the shape estimator.
        sfm_iterations: usize,
    },
    /// Rounds of intrinsic-only steps followed by shape-only steps.
    Alternating {
        /// Number of rounds.
        rounds: usize,
        /// Intrinsic-only steps per round.
        calib_iterations: usize,
        /// Shape-only steps per round.
        sfm_iterations: usize,
    },
}

/// State of the schedule controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Both estimators are updated.
    Joint,
    /// Intrinsic-only phase of the sequential schedule.
    SequentialCalib,
    /// Shape-only phase of the sequential schedule.
    SequentialSfm,
    /// Intrinsic-only phase of an alternating round.
    AlternatingCalib,
    /// Shape-only phase of an alternating round.
    AlternatingSfm,
    /// Iteration budget exhausted.
    Finished,
}

impl Phase {
    /// Whether the intrinsic estimator is updated in this phase.
    pub fn updates_intrinsics(self) -> bool {
        matches!(
            self,
            Phase::Joint | Phase::SequentialCalib | Phase::AlternatingCalib
        )
    }

    /// Whether the shape estimator is updated in this phase.
    pub fn updates_shape(self) -> bool {
        matches!(
            self,
            Phase::Joint | Phase::SequentialSfm | Phase::AlternatingSfm
        )
    }

    /// Whether the run is over.
    pub fn is_finished(self) -> bool {
        self == Phase::Finished
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Phase::Joint => "joint",
            Phase::SequentialCalib => "sequential/calib",
            Phase::SequentialSfm => "sequential/sfm",
            Phase::AlternatingCalib => "alternating/calib",
            Phase::AlternatingSfm => "alternating/sfm",
            Phase::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Position of a step within a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationState {
    /// Steps taken since the start of the run.
    pub global_step: usize,
    /// Current round, zero outside the alternating schedule.
    pub round: usize,
    /// Steps taken since the current phase started.
    pub phase_step: usize,
    /// Active phase.
    pub phase: Phase,
}

impl Schedule {
    /// Total number of steps.
    pub fn total_steps(&self) -> usize {
        match *self {
            Schedule::Joint { iterations } => iterations,
            Schedule::Sequential {
                calib_iterations,
                sfm_iterations,
            } => calib_iterations + sfm_iterations,
            Schedule::Alternating {
                rounds,
                calib_iterations,
                sfm_iterations,
            } => rounds * (calib_iterations + sfm_iterations),
        }
    }

    /// Phase selector: where step `global_step` falls in the schedule.
    ///
    /// # Example
    ///
    /// ```
    /// use facecalib_optim::{Phase, Schedule};
    ///
    /// let schedule = Schedule::Alternating { rounds: 2, calib_iterations: 3, sfm_iterations: 1 };
    /// assert_eq!(schedule.state_at(3).phase, Phase::AlternatingSfm);
    /// assert_eq!(schedule.state_at(4).round, 1);
    /// assert!(schedule.state_at(8).phase.is_finished());
    /// ```
    pub fn state_at(&self, global_step: usize) -> OptimizationState {
        let (phase, round, phase_step) = match *self {
            Schedule::Joint { iterations } if global_step < iterations => {
                (Phase::Joint, 0, global_step)
            }
            Schedule::Sequential {
                calib_iterations,
                sfm_iterations,
            } => {
                if global_step < calib_iterations {
                    (Phase::SequentialCalib, 0, global_step)
                } else if global_step < calib_iterations + sfm_iterations {
                    (Phase::SequentialSfm, 0, global_step - calib_iterations)
                } else {
                    (Phase::Finished, 0, 0)
                }
            }
            Schedule::Alternating {
                rounds: _,
                calib_iterations,
                sfm_iterations,
            } if global_step < self.total_steps() => {
                let period = calib_iterations + sfm_iterations;
                let round = global_step / period;
                let offset = global_step % period;
                if offset < calib_iterations {
                    (Phase::AlternatingCalib, round, offset)
                } else {
                    (Phase::AlternatingSfm, round, offset - calib_iterations)
                }
            }
            _ => (Phase::Finished, 0, 0),
        };
        OptimizationState {
            global_step,
            round,
            phase_step,
            phase,
        }
    }
}

impl OptimizationState {
    /// State before the first step of `schedule`.
    pub fn start(schedule: &Schedule) -> Self {
        schedule.state_at(0)
    }

    /// Move to the next step of `schedule`.
    pub fn advance(&mut self, schedule: &Schedule) {
        *self = schedule.state_at(self.global_step + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phases(schedule: Schedule) -> Vec<Phase> {
        let mut state = OptimizationState::start(&schedule);
        let mut out = Vec::new();
        while !state.phase.is_finished() {
            out.push(state.phase);
            state.advance(&schedule);
        }
        out
    }

    #[test]
    fn test_joint_schedule() {
        let schedule = Schedule::Joint { iterations: 3 };
        assert_eq!(phases(schedule), vec![Phase::Joint; 3]);
        assert!(phases(Schedule::Joint { iterations: 0 }).is_empty());
    }

    #[test]
    fn test_sequential_schedule() {
        let schedule = Schedule::Sequential {
            calib_iterations: 2,
            sfm_iterations: 1,
        };
        assert_eq!(
            phases(schedule),
            vec![
                Phase::SequentialCalib,
                Phase::SequentialCalib,
                Phase::SequentialSfm
            ]
        );
        assert_eq!(schedule.state_at(2).phase_step, 0);

        // an empty calibration phase goes straight to the shape phase
        let schedule = Schedule::Sequential {
            calib_iterations: 0,
            sfm_iterations: 2,
        };
        assert_eq!(phases(schedule), vec![Phase::SequentialSfm; 2]);
    }

    #[test]
    fn test_alternating_schedule() {
        let schedule = Schedule::Alternating {
            rounds: 2,
            calib_iterations: 2,
            sfm_iterations: 1,
        };
        assert_eq!(schedule.total_steps(), 6);
        assert_eq!(
            phases(schedule),
            vec![
                Phase::AlternatingCalib,
                Phase::AlternatingCalib,
                Phase::AlternatingSfm,
                Phase::AlternatingCalib,
                Phase::AlternatingCalib,
                Phase::AlternatingSfm,
            ]
        );
        let state = schedule.state_at(4);
        assert_eq!((state.round, state.phase_step), (1, 1));

        let empty = Schedule::Alternating {
            rounds: 3,
            calib_iterations: 0,
            sfm_iterations: 0,
        };
        assert!(phases(empty).is_empty());
    }

    #[test]
    fn test_phase_update_flags() {
        assert!(Phase::Joint.updates_intrinsics() && Phase::Joint.updates_shape());
        assert!(Phase::AlternatingCalib.updates_intrinsics());
        assert!(!Phase::AlternatingCalib.updates_shape());
        assert!(!Phase::SequentialSfm.updates_intrinsics());
        assert!(!Phase::Finished.updates_intrinsics() && !Phase::Finished.updates_shape());
    }
}
