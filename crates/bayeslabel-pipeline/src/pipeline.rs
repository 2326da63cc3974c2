//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`classify`](fn@crate::classify) which runs the entire pipeline in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use bayeslabel_pipeline::{Normalization, Pipeline, PipelineError, SmootherKind, VectorImage};
//! # fn run(membership: &VectorImage) -> Result<(), PipelineError> {
//! let smoother = SmootherKind::Mean { radius: 1 };
//! let classified = Pipeline::new(membership)
//!     .combine()?
//!     .smooth(Some(&smoother), 2)?
//!     .normalize(Normalization::UnitSum)
//!     .classify::<u8>()?;
//!
//! let labels = classified.labels();
//! # let _ = labels;
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for fallible stages). The posterior buffer is allocated
//! once by [`Pending::combine`] and then moved from stage to stage, so a
//! failed stage drops it along with the partial work.

use tracing::debug;

use crate::classify::{ClassLabel, classify_posteriors};
use crate::combine::compute_posteriors;
use crate::diagnostics::StageMetrics;
use crate::normalize::{Normalization, normalize_posteriors};
use crate::raster::{LabelImage, VectorImage};
use crate::smooth::{Smoother, smooth_posteriors};
use crate::types::{ClassifyResult, PipelineError};

/// Entry point of the incremental pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Start a pipeline over `membership` with no priors bound.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(membership: &VectorImage) -> Pending<'_> {
        Pending {
            membership,
            priors: None,
        }
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Inputs are borrowed, never copied until [`combine`](Self::combine).
#[must_use = "pipeline stages are consumed by advancing: call .combine() to continue"]
pub struct Pending<'a> {
    membership: &'a VectorImage,
    priors: Option<&'a VectorImage>,
}

impl<'a> Pending<'a> {
    /// The membership image.
    #[must_use]
    pub const fn membership(&self) -> &'a VectorImage {
        self.membership
    }

    /// Bind (or with `None`, unbind) a priors image.
    pub const fn with_priors(self, priors: Option<&'a VectorImage>) -> Self {
        Self {
            membership: self.membership,
            priors,
        }
    }

    /// Combine memberships with priors and advance to [`Combined`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationMismatch`] if the priors
    /// disagree with the membership image in channel count or shape.
    pub fn combine(self) -> Result<Combined, PipelineError> {
        let posterior = compute_posteriors(self.membership, self.priors)?;
        Ok(Combined {
            posterior,
            priors_applied: self.priors.is_some(),
        })
    }
}

// ───────────────────────── Stage 1: Combined ─────────────────────────

/// Pipeline state after prior weighting.
#[must_use = "pipeline stages are consumed by advancing: call .smooth() to continue"]
pub struct Combined {
    posterior: VectorImage,
    priors_applied: bool,
}

impl Combined {
    /// The unnormalized posterior image.
    #[must_use]
    pub const fn posterior(&self) -> &VectorImage {
        &self.posterior
    }

    /// Whether a priors image was multiplied in.
    #[must_use]
    pub const fn priors_applied(&self) -> bool {
        self.priors_applied
    }

    /// Smooth every posterior channel `iterations` times and advance to
    /// [`Smoothed`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SmoothingFailure`] if the smoother fails
    /// on any channel. The partially smoothed posterior is dropped.
    pub fn smooth(
        mut self,
        smoother: Option<&dyn Smoother>,
        iterations: u32,
    ) -> Result<Smoothed, PipelineError> {
        let channel_passes = smooth_posteriors(&mut self.posterior, smoother, iterations)?;
        Ok(Smoothed {
            posterior: self.posterior,
            smoother: smoother.map(|s| s.describe()),
            iterations: if smoother.is_some() { iterations } else { 0 },
            channel_passes,
        })
    }
}

// ───────────────────────── Stage 2: Smoothed ─────────────────────────

/// Pipeline state after iterative smoothing.
#[must_use = "pipeline stages are consumed by advancing: call .normalize() to continue"]
pub struct Smoothed {
    posterior: VectorImage,
    smoother: Option<String>,
    iterations: u32,
    channel_passes: u64,
}

impl Smoothed {
    /// The smoothed posterior image.
    #[must_use]
    pub const fn posterior(&self) -> &VectorImage {
        &self.posterior
    }

    /// Number of single-channel smoothing passes performed.
    #[must_use]
    pub const fn channel_passes(&self) -> u64 {
        self.channel_passes
    }

    /// Apply the renormalization policy and advance to [`Normalized`].
    pub fn normalize(mut self, normalization: Normalization) -> Normalized {
        let rescaled_pixels = normalize_posteriors(&mut self.posterior, normalization);
        debug!(%normalization, rescaled_pixels, "normalized posteriors");
        Normalized {
            posterior: self.posterior,
            normalization,
            rescaled_pixels,
        }
    }
}

// ───────────────────────── Stage 3: Normalized ───────────────────────

/// Pipeline state after optional renormalization.
#[must_use = "pipeline stages are consumed by advancing: call .classify() to continue"]
pub struct Normalized {
    posterior: VectorImage,
    normalization: Normalization,
    rescaled_pixels: u64,
}

impl Normalized {
    /// The posterior image the decision rule will see.
    #[must_use]
    pub const fn posterior(&self) -> &VectorImage {
        &self.posterior
    }

    /// Apply the maximum decision rule and advance to [`Classified`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationMismatch`] if the class count
    /// does not fit in `L`.
    pub fn classify<L: ClassLabel>(self) -> Result<Classified<L>, PipelineError> {
        let labels = classify_posteriors::<L>(&self.posterior)?;
        Ok(Classified {
            posterior: self.posterior,
            labels,
        })
    }
}

// ───────────────────────── Stage 4: Classified ───────────────────────

/// Pipeline state after classification, the final stage.
#[must_use = "call .into_result() to extract the ClassifyResult"]
pub struct Classified<L> {
    posterior: VectorImage,
    labels: LabelImage<L>,
}

impl<L: ClassLabel> Classified<L> {
    /// The label image.
    #[must_use]
    pub const fn labels(&self) -> &LabelImage<L> {
        &self.labels
    }

    /// The posterior image the labels were decided from.
    #[must_use]
    pub const fn posterior(&self) -> &VectorImage {
        &self.posterior
    }

    /// Consume the pipeline and return labels and posterior.
    pub fn into_result(self) -> ClassifyResult<L> {
        ClassifyResult {
            labels: self.labels,
            posterior: self.posterior,
        }
    }
}

// ───────────────────────── PipelineStage trait ───────────────────────

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 5;

/// Trait implemented by every pipeline stage for uniform inspection.
pub trait PipelineStage {
    /// Human-readable name of this stage (e.g. `"combine"`).
    const NAME: &'static str;

    /// Zero-based index of this stage (`0` for Pending through `4` for
    /// Classified).
    const INDEX: usize;

    /// Stage-specific metrics for diagnostics.
    ///
    /// Returns `None` for [`Pending`], which has not done any work yet.
    fn metrics(&self) -> Option<StageMetrics>;
}

/// A stage that has done work and therefore always has metrics.
pub(crate) trait MeasuredStage: PipelineStage {
    fn stage_metrics(&self) -> StageMetrics;
}

impl PipelineStage for Pending<'_> {
    const NAME: &'static str = "pending";
    const INDEX: usize = 0;

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }
}

impl PipelineStage for Combined {
    const NAME: &'static str = "combine";
    const INDEX: usize = 1;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.stage_metrics())
    }
}

impl MeasuredStage for Combined {
    fn stage_metrics(&self) -> StageMetrics {
        StageMetrics::Combine {
            pixel_count: self.posterior.pixel_count(),
            class_count: self.posterior.channel_count(),
            priors_applied: self.priors_applied,
        }
    }
}

impl PipelineStage for Smoothed {
    const NAME: &'static str = "smooth";
    const INDEX: usize = 2;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.stage_metrics())
    }
}

impl MeasuredStage for Smoothed {
    fn stage_metrics(&self) -> StageMetrics {
        StageMetrics::Smooth {
            smoother: self.smoother.clone(),
            iterations: self.iterations,
            channel_passes: self.channel_passes,
        }
    }
}

impl PipelineStage for Normalized {
    const NAME: &'static str = "normalize";
    const INDEX: usize = 3;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.stage_metrics())
    }
}

impl MeasuredStage for Normalized {
    fn stage_metrics(&self) -> StageMetrics {
        StageMetrics::Normalize {
            policy: self.normalization,
            rescaled_pixels: self.rescaled_pixels,
        }
    }
}

impl<L: ClassLabel> PipelineStage for Classified<L> {
    const NAME: &'static str = "classify";
    const INDEX: usize = 4;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.stage_metrics())
    }
}

impl<L: ClassLabel> MeasuredStage for Classified<L> {
    fn stage_metrics(&self) -> StageMetrics {
        let class_count = self.posterior.channel_count();
        StageMetrics::Classify {
            class_count,
            class_histogram: crate::diagnostics::label_histogram(&self.labels, class_count),
            tied_pixels: crate::diagnostics::count_tied_pixels(&self.posterior),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::raster::{ChannelView, ScalarImage};
    use crate::smooth::{SmootherKind, SmoothingError};

    fn membership() -> VectorImage {
        VectorImage::from_shape_vec(&[2, 2], 2, vec![0.2, 0.8, 0.6, 0.4, 0.9, 0.1, 0.3, 0.7])
            .unwrap()
    }

    #[test]
    fn stages_advance_to_labels() {
        let m = membership();
        let classified = Pipeline::new(&m)
            .combine()
            .unwrap()
            .smooth(None, 0)
            .unwrap()
            .normalize(Normalization::Disabled)
            .classify::<u8>()
            .unwrap();
        assert_eq!(classified.labels().to_vec(), vec![1, 0, 0, 1]);
        assert_eq!(classified.posterior(), &m);
    }

    #[test]
    fn combined_stage_exposes_posterior() {
        let m = membership();
        let p = VectorImage::from_shape_vec(&[2, 2], 2, vec![2.0; 8]).unwrap();
        let combined = Pipeline::new(&m).with_priors(Some(&p)).combine().unwrap();
        assert!(combined.priors_applied());
        assert!((combined.posterior().pixel(&[0, 0]).unwrap()[1] - 1.6).abs() < 1e-12);
    }

    #[test]
    fn mismatched_priors_fail_at_combine() {
        let m = membership();
        let p = VectorImage::from_shape_vec(&[2, 2], 1, vec![1.0; 4]).unwrap();
        let result = Pipeline::new(&m).with_priors(Some(&p)).combine();
        assert!(matches!(result, Err(PipelineError::ConfigurationMismatch(_))));
    }

    #[test]
    fn smoothing_failure_propagates() {
        let failing = |_: ChannelView<'_>| -> Result<ScalarImage, SmoothingError> {
            Err(SmoothingError::Failed("nope".to_string()))
        };
        let m = membership();
        let result = Pipeline::new(&m).combine().unwrap().smooth(Some(&failing), 1);
        assert!(matches!(
            result,
            Err(PipelineError::SmoothingFailure {
                channel: 0,
                iteration: 0,
                ..
            })
        ));
    }

    #[test]
    fn stage_metrics_describe_work() {
        let m = membership();
        let pending = Pipeline::new(&m);
        assert!(pending.metrics().is_none());

        let combined = pending.combine().unwrap();
        assert!(matches!(
            combined.metrics(),
            Some(StageMetrics::Combine {
                pixel_count: 4,
                class_count: 2,
                priors_applied: false,
            })
        ));

        let smoother = SmootherKind::Mean { radius: 1 };
        let smoothed = combined.smooth(Some(&smoother), 3).unwrap();
        match smoothed.metrics() {
            Some(StageMetrics::Smooth {
                smoother,
                iterations,
                channel_passes,
            }) => {
                assert_eq!(smoother.as_deref(), Some("mean (radius=1)"));
                assert_eq!(iterations, 3);
                assert_eq!(channel_passes, 6);
            }
            other => panic!("unexpected metrics {other:?}"),
        }

        let classified = smoothed
            .normalize(Normalization::UnitSum)
            .classify::<u8>()
            .unwrap();
        match classified.metrics() {
            Some(StageMetrics::Classify {
                class_count,
                class_histogram,
                ..
            }) => {
                assert_eq!(class_count, 2);
                assert_eq!(class_histogram.iter().sum::<u64>(), 4);
            }
            other => panic!("unexpected metrics {other:?}"),
        }
    }

    #[test]
    fn stage_names() {
        assert_eq!(<Pending<'_> as PipelineStage>::NAME, "pending");
        assert_eq!(<Combined as PipelineStage>::NAME, "combine");
        assert_eq!(<Smoothed as PipelineStage>::NAME, "smooth");
        assert_eq!(<Normalized as PipelineStage>::NAME, "normalize");
        assert_eq!(<Classified<u16> as PipelineStage>::NAME, "classify");
    }

    #[test]
    fn pending_borrows_membership_and_smoothed_counts_passes() {
        let m = membership();
        let pending = Pipeline::new(&m);
        assert!(std::ptr::eq(pending.membership(), &m));

        let smoother = SmootherKind::Mean { radius: 1 };
        let smoothed = pending.combine().unwrap().smooth(Some(&smoother), 2).unwrap();
        assert_eq!(smoothed.channel_passes(), 4);

        let unsmoothed = Pipeline::new(&m).combine().unwrap().smooth(None, 2).unwrap();
        assert_eq!(unsmoothed.channel_passes(), 0);
        assert_eq!(unsmoothed.posterior(), &m);
    }

    #[test]
    fn stage_indices_are_sequential() {
        assert_eq!(<Pending<'_> as PipelineStage>::INDEX, 0);
        assert_eq!(<Combined as PipelineStage>::INDEX, 1);
        assert_eq!(<Smoothed as PipelineStage>::INDEX, 2);
        assert_eq!(<Normalized as PipelineStage>::INDEX, 3);
        assert_eq!(<Classified<u8> as PipelineStage>::INDEX, STAGE_COUNT - 1);
    }
}
