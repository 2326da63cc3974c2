//! Stateful classifier: bind inputs and settings, run, read outputs.
//!
//! [`BayesianClassifier`] wraps the stage functions in a small state
//! machine:
//!
//! ```text
//! Unconfigured --set_membership--> Configured --run--> Running
//!                                      ^                 |
//!                                      |            +----+----+
//!                                reconfigure        v         v
//!                                      +------- Completed   Failed
//! ```
//!
//! Inputs are borrowed for the classifier's lifetime; the posterior and
//! label images are owned by the classifier and rebuilt from scratch on
//! every [`run`](BayesianClassifier::run).

use std::fmt;

use tracing::{info, info_span, warn};

use crate::classify::{ClassLabel, check_label_capacity};
use crate::combine::check_compatible;
use crate::normalize::Normalization;
use crate::pipeline::Pipeline;
use crate::raster::{LabelImage, VectorImage};
use crate::smooth::Smoother;
use crate::types::{ClassifierConfig, ClassifyResult, PipelineError};

/// Lifecycle state of a [`BayesianClassifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    /// No membership image bound yet.
    Unconfigured,
    /// Membership bound; ready to run.
    Configured,
    /// A run is in progress.
    Running,
    /// The last run succeeded; outputs are available.
    Completed,
    /// The last run failed; no outputs are available.
    Failed,
}

impl fmt::Display for ClassifierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Pixel-wise Bayesian classifier with optional priors and smoothing.
///
/// `L` is the label pixel type; it must be able to hold every class
/// index of the bound membership image.
///
/// ```rust
/// # use bayeslabel_pipeline::{BayesianClassifier, PipelineError, VectorImage};
/// # fn main() -> Result<(), PipelineError> {
/// let membership = VectorImage::from_shape_vec(
///     &[2, 2],
///     2,
///     vec![0.2, 0.8, 0.6, 0.4, 0.9, 0.1, 0.3, 0.7],
/// )?;
/// let mut classifier = BayesianClassifier::<u8>::new();
/// classifier.set_membership(&membership)?;
/// classifier.run()?;
/// assert_eq!(classifier.labels()?.to_vec(), vec![1, 0, 0, 1]);
/// # Ok(())
/// # }
/// ```
pub struct BayesianClassifier<'a, L: ClassLabel = u8> {
    membership: Option<&'a VectorImage>,
    priors: Option<&'a VectorImage>,
    smoother: Option<Box<dyn Smoother + 'a>>,
    smoothing_iterations: u32,
    normalization: Normalization,
    state: ClassifierState,
    output: Option<ClassifyResult<L>>,
}

impl<'a, L: ClassLabel> BayesianClassifier<'a, L> {
    /// An unconfigured classifier with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            membership: None,
            priors: None,
            smoother: None,
            smoothing_iterations: ClassifierConfig::DEFAULT_SMOOTHING_ITERATIONS,
            normalization: ClassifierConfig::DEFAULT_NORMALIZATION,
            state: ClassifierState::Unconfigured,
            output: None,
        }
    }

    /// An unconfigured classifier with the settings of `config`.
    #[must_use]
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let mut classifier = Self::new();
        if let Some(kind) = config.smoother {
            classifier.smoother = Some(Box::new(kind));
        }
        classifier.smoothing_iterations = config.smoothing_iterations;
        classifier.normalization = config.normalization;
        classifier
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ClassifierState {
        self.state
    }

    /// The bound membership image, if any.
    #[must_use]
    pub const fn membership(&self) -> Option<&'a VectorImage> {
        self.membership
    }

    /// The bound priors image, if any.
    #[must_use]
    pub const fn priors(&self) -> Option<&'a VectorImage> {
        self.priors
    }

    /// Configured smoothing iteration count.
    #[must_use]
    pub const fn smoothing_iterations(&self) -> u32 {
        self.smoothing_iterations
    }

    /// Configured renormalization policy.
    #[must_use]
    pub const fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Bind the membership image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationMismatch`] if a bound priors
    /// image disagrees with `membership` in channel count or shape, or if
    /// the class count does not fit in `L`. The previous binding is kept.
    pub fn set_membership(&mut self, membership: &'a VectorImage) -> Result<(), PipelineError> {
        check_label_capacity::<L>(membership.channel_count())?;
        if let Some(priors) = self.priors {
            check_compatible(membership, priors, "priors")?;
        }
        self.membership = Some(membership);
        self.invalidate();
        Ok(())
    }

    /// Bind a priors image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationMismatch`] if a bound
    /// membership image disagrees with `priors` in channel count or
    /// shape. The previous binding is kept.
    pub fn set_priors(&mut self, priors: &'a VectorImage) -> Result<(), PipelineError> {
        if let Some(membership) = self.membership {
            check_compatible(membership, priors, "priors")?;
        }
        self.priors = Some(priors);
        self.invalidate();
        Ok(())
    }

    /// Unbind the priors image; classes are weighted uniformly.
    pub fn clear_priors(&mut self) {
        self.priors = None;
        self.invalidate();
    }

    /// Bind the smoothing operation applied to each posterior channel.
    pub fn set_smoother(&mut self, smoother: impl Smoother + 'a) {
        self.smoother = Some(Box::new(smoother));
        self.invalidate();
    }

    /// Unbind the smoothing operation.
    pub fn clear_smoother(&mut self) {
        self.smoother = None;
        self.invalidate();
    }

    /// Set how many times each channel is smoothed.
    pub fn set_smoothing_iterations(&mut self, iterations: u32) {
        self.smoothing_iterations = iterations;
        self.invalidate();
    }

    /// Set the post-smoothing renormalization policy.
    pub fn set_normalization(&mut self, normalization: Normalization) {
        self.normalization = normalization;
        self.invalidate();
    }

    /// Run the whole pipeline on the bound inputs.
    ///
    /// Previous outputs are dropped before anything is computed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PreconditionViolation`] if no membership
    /// image is bound, or whatever error the failing stage reported. A
    /// failed stage leaves the classifier in [`ClassifierState::Failed`].
    pub fn run(&mut self) -> Result<(), PipelineError> {
        let Some(membership) = self.membership else {
            return Err(PipelineError::PreconditionViolation(
                "cannot run without a membership image".to_string(),
            ));
        };

        self.output = None;
        self.state = ClassifierState::Running;
        let span = info_span!(
            "classify",
            classes = membership.channel_count(),
            pixels = membership.pixel_count(),
        );
        let _guard = span.enter();

        let result = check_label_capacity::<L>(membership.channel_count()).and_then(|()| {
            Pipeline::new(membership)
                .with_priors(self.priors)
                .combine()?
                .smooth(self.smoother.as_deref(), self.smoothing_iterations)?
                .normalize(self.normalization)
                .classify::<L>()
        });

        match result {
            Ok(classified) => {
                self.output = Some(classified.into_result());
                self.state = ClassifierState::Completed;
                info!("classification completed");
                Ok(())
            }
            Err(e) => {
                self.state = ClassifierState::Failed;
                warn!(error = %e, "classification failed");
                Err(e)
            }
        }
    }

    /// The posterior image of the last successful run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PreconditionViolation`] unless the
    /// classifier is [`ClassifierState::Completed`].
    pub fn posterior(&self) -> Result<&VectorImage, PipelineError> {
        self.completed().map(|output| &output.posterior)
    }

    /// The label image of the last successful run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PreconditionViolation`] unless the
    /// classifier is [`ClassifierState::Completed`].
    pub fn labels(&self) -> Result<&LabelImage<L>, PipelineError> {
        self.completed().map(|output| &output.labels)
    }

    /// Take ownership of the outputs of the last successful run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PreconditionViolation`] unless the
    /// classifier is [`ClassifierState::Completed`].
    pub fn into_result(self) -> Result<ClassifyResult<L>, PipelineError> {
        match (self.state, self.output) {
            (ClassifierState::Completed, Some(output)) => Ok(output),
            (state, _) => Err(not_completed(state)),
        }
    }

    fn completed(&self) -> Result<&ClassifyResult<L>, PipelineError> {
        match (self.state, &self.output) {
            (ClassifierState::Completed, Some(output)) => Ok(output),
            (state, _) => Err(not_completed(state)),
        }
    }

    /// Drop outputs and fall back to `Configured` (or `Unconfigured`).
    fn invalidate(&mut self) {
        self.output = None;
        self.state = if self.membership.is_some() {
            ClassifierState::Configured
        } else {
            ClassifierState::Unconfigured
        };
    }
}

fn not_completed(state: ClassifierState) -> PipelineError {
    PipelineError::PreconditionViolation(format!(
        "outputs are only available after a successful run (state: {state})"
    ))
}

impl<L: ClassLabel> Default for BayesianClassifier<'_, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ClassLabel> fmt::Debug for BayesianClassifier<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BayesianClassifier")
            .field("state", &self.state)
            .field(
                "membership",
                &self.membership.map(VectorImage::spatial_shape),
            )
            .field("classes", &self.membership.map(VectorImage::channel_count))
            .field("priors", &self.priors.is_some())
            .field("smoother", &self.smoother.as_ref().map(|s| s.describe()))
            .field("smoothing_iterations", &self.smoothing_iterations)
            .field("normalization", &self.normalization)
            .finish_non_exhaustive()
    }
}

impl<L: ClassLabel> fmt::Display for BayesianClassifier<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state: {}", self.state)?;
        match self.membership {
            Some(m) => write!(
                f,
                ", membership: {:?} x {} classes",
                m.spatial_shape(),
                m.channel_count()
            )?,
            None => f.write_str(", membership: none")?,
        }
        let priors = if self.priors.is_some() { "bound" } else { "uniform" };
        let smoother = self
            .smoother
            .as_ref()
            .map_or_else(|| "none".to_string(), |s| s.describe());
        write!(
            f,
            ", priors: {priors}, smoother: {smoother}, smoothing iterations: {}, normalization: {}",
            self.smoothing_iterations, self.normalization,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::raster::{ChannelView, ScalarImage};
    use crate::smooth::{SmootherKind, SmoothingError};

    fn membership() -> VectorImage {
        VectorImage::from_shape_vec(&[2, 2], 2, vec![0.2, 0.8, 0.6, 0.4, 0.9, 0.1, 0.3, 0.7])
            .unwrap()
    }

    #[test]
    fn starts_unconfigured() {
        let classifier = BayesianClassifier::<u8>::new();
        assert_eq!(classifier.state(), ClassifierState::Unconfigured);
        assert!(classifier.membership().is_none());
        assert_eq!(classifier.smoothing_iterations(), 0);
        assert_eq!(classifier.normalization(), Normalization::Disabled);
    }

    #[test]
    fn run_without_membership_is_precondition_violation() {
        let mut classifier = BayesianClassifier::<u8>::new();
        assert!(matches!(
            classifier.run(),
            Err(PipelineError::PreconditionViolation(_))
        ));
        assert_eq!(classifier.state(), ClassifierState::Unconfigured);
    }

    #[test]
    fn outputs_before_run_are_precondition_violations() {
        let m = membership();
        let mut classifier = BayesianClassifier::<u8>::new();
        classifier.set_membership(&m).unwrap();
        assert_eq!(classifier.state(), ClassifierState::Configured);
        assert!(matches!(
            classifier.posterior(),
            Err(PipelineError::PreconditionViolation(_))
        ));
        assert!(matches!(
            classifier.labels(),
            Err(PipelineError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn run_produces_labels_and_posterior() {
        let m = membership();
        let mut classifier = BayesianClassifier::<u8>::new();
        classifier.set_membership(&m).unwrap();
        classifier.run().unwrap();
        assert_eq!(classifier.state(), ClassifierState::Completed);
        assert_eq!(classifier.labels().unwrap().to_vec(), vec![1, 0, 0, 1]);
        assert_eq!(classifier.posterior().unwrap(), &m);
    }

    #[test]
    fn mismatched_priors_fail_fast_and_keep_binding() {
        let m = membership();
        let bad = VectorImage::from_shape_vec(&[2, 2], 3, vec![1.0; 12]).unwrap();
        let mut classifier = BayesianClassifier::<u8>::new();
        classifier.set_membership(&m).unwrap();
        assert!(matches!(
            classifier.set_priors(&bad),
            Err(PipelineError::ConfigurationMismatch(_))
        ));
        assert!(classifier.priors().is_none());
    }

    #[test]
    fn mismatched_membership_fails_fast() {
        let priors = VectorImage::from_shape_vec(&[3], 2, vec![1.0; 6]).unwrap();
        let m = membership();
        let mut classifier = BayesianClassifier::<u8>::new();
        classifier.set_priors(&priors).unwrap();
        assert!(matches!(
            classifier.set_membership(&m),
            Err(PipelineError::ConfigurationMismatch(_))
        ));
        assert_eq!(classifier.state(), ClassifierState::Unconfigured);
    }

    #[test]
    fn priors_change_the_decision() {
        let m = membership();
        let priors =
            VectorImage::from_shape_vec(&[2, 2], 2, vec![1.0, 0.1, 1.0, 0.1, 1.0, 0.1, 1.0, 0.1])
                .unwrap();
        let mut classifier = BayesianClassifier::<u8>::new();
        classifier.set_membership(&m).unwrap();
        classifier.set_priors(&priors).unwrap();
        classifier.run().unwrap();
        assert_eq!(classifier.labels().unwrap().to_vec(), vec![0, 0, 0, 0]);

        classifier.clear_priors();
        classifier.run().unwrap();
        assert_eq!(classifier.labels().unwrap().to_vec(), vec![1, 0, 0, 1]);
    }

    #[test]
    fn failing_smoother_moves_to_failed() {
        let m = membership();
        let mut classifier = BayesianClassifier::<u8>::new();
        classifier.set_membership(&m).unwrap();
        classifier.set_smoother(|_: ChannelView<'_>| -> Result<ScalarImage, SmoothingError> {
            Err(SmoothingError::Failed("broken".to_string()))
        });
        classifier.set_smoothing_iterations(1);
        assert!(matches!(
            classifier.run(),
            Err(PipelineError::SmoothingFailure {
                channel: 0,
                iteration: 0,
                ..
            })
        ));
        assert_eq!(classifier.state(), ClassifierState::Failed);
        assert!(classifier.labels().is_err());
    }

    #[test]
    fn failed_run_clears_previous_outputs() {
        let m = membership();
        let mut classifier = BayesianClassifier::<u8>::new();
        classifier.set_membership(&m).unwrap();
        classifier.run().unwrap();
        assert!(classifier.labels().is_ok());

        classifier.set_smoother(|_: ChannelView<'_>| -> Result<ScalarImage, SmoothingError> {
            Err(SmoothingError::Failed("broken".to_string()))
        });
        classifier.set_smoothing_iterations(2);
        assert!(classifier.run().is_err());
        assert!(classifier.posterior().is_err());
    }

    #[test]
    fn reconfiguring_invalidates_outputs() {
        let m = membership();
        let mut classifier = BayesianClassifier::<u8>::new();
        classifier.set_membership(&m).unwrap();
        classifier.run().unwrap();
        classifier.set_normalization(Normalization::UnitSum);
        assert_eq!(classifier.state(), ClassifierState::Configured);
        assert!(classifier.labels().is_err());
    }

    #[test]
    fn smoother_invoked_once_per_channel_and_iteration() {
        let calls = Cell::new(0_u32);
        let m = membership();
        let mut classifier = BayesianClassifier::<u8>::new();
        classifier.set_membership(&m).unwrap();
        classifier.set_smoother(|channel: ChannelView<'_>| -> Result<ScalarImage, SmoothingError> {
            calls.set(calls.get() + 1);
            Ok(channel.to_scalar_image())
        });
        classifier.set_smoothing_iterations(3);
        classifier.run().unwrap();
        assert_eq!(calls.get(), 6);
    }

    #[test]
    fn rerun_is_stable() {
        let m = membership();
        let mut classifier = BayesianClassifier::<u8>::new();
        classifier.set_membership(&m).unwrap();
        classifier.set_smoother(SmootherKind::Mean { radius: 1 });
        classifier.set_smoothing_iterations(2);
        classifier.run().unwrap();
        let first_labels = classifier.labels().unwrap().clone();
        let first_posterior = classifier.posterior().unwrap().clone();
        classifier.run().unwrap();
        assert_eq!(classifier.labels().unwrap(), &first_labels);
        assert_eq!(classifier.posterior().unwrap(), &first_posterior);
    }

    #[test]
    fn from_config_applies_settings() {
        let config = ClassifierConfig {
            smoother: Some(SmootherKind::Mean { radius: 1 }),
            smoothing_iterations: 2,
            normalization: Normalization::UnitSum,
        };
        let classifier = BayesianClassifier::<u16>::from_config(&config);
        assert_eq!(classifier.smoothing_iterations(), 2);
        assert_eq!(classifier.normalization(), Normalization::UnitSum);
        let text = classifier.to_string();
        assert!(text.contains("mean (radius=1)"), "{text}");
        assert!(text.contains("unconfigured"), "{text}");
    }

    #[test]
    fn into_result_requires_completion() {
        let m = membership();
        let mut classifier = BayesianClassifier::<u8>::new();
        classifier.set_membership(&m).unwrap();
        classifier.run().unwrap();
        let result = classifier.into_result().unwrap();
        assert_eq!(result.labels.to_vec(), vec![1, 0, 0, 1]);

        let idle = BayesianClassifier::<u8>::new();
        assert!(matches!(
            idle.into_result(),
            Err(PipelineError::PreconditionViolation(_))
        ));
    }
}
