//! bayeslabel-pipeline: pixel-wise Bayesian classification (sans-IO).
//!
//! Turns a membership image (one likelihood per class per pixel) into a
//! label image through:
//! prior weighting -> iterative smoothing -> optional renormalization ->
//! maximum decision rule.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! [`VectorImage`]s and returns structured data. Reading images from
//! disk lives in the `bayeslabel-bench` binary.

pub mod classifier;
pub mod classify;
pub mod combine;
pub mod diagnostics;
pub mod normalize;
pub mod pipeline;
pub mod raster;
pub mod smooth;
pub mod types;

pub use classifier::{BayesianClassifier, ClassifierState};
pub use classify::{ClassLabel, check_label_capacity, decide};
pub use diagnostics::{Clock, PipelineDiagnostics, classify_with_diagnostics};
pub use normalize::Normalization;
pub use pipeline::{Pipeline, PipelineStage};
pub use raster::{ChannelView, Geometry, LabelImage, ScalarImage, VectorImage};
pub use smooth::{Smoother, SmootherKind, SmoothingError};
pub use types::{ClassifierConfig, ClassifyResult, PipelineError};

use tracing::info;

/// Run the full classification pipeline.
///
/// Takes a membership image, an optional priors image and a
/// configuration, then produces a [`ClassifyResult`] holding the label
/// image and the posterior image it was decided from. Both carry the
/// membership image's geometry.
///
/// # Pipeline steps
///
/// 1. Check that every class index fits in `L`
/// 2. Multiply memberships by priors (copy when there are none)
/// 3. Smooth each posterior channel `smoothing_iterations` times
/// 4. Optionally renormalize each pixel vector
/// 5. Label each pixel with its most probable class
///
/// # Errors
///
/// Returns [`PipelineError::ConfigurationMismatch`] if `priors` disagrees
/// with `membership` or the class count does not fit in `L`.
/// Returns [`PipelineError::SmoothingFailure`] if the smoother fails.
pub fn classify<L: ClassLabel>(
    membership: &VectorImage,
    priors: Option<&VectorImage>,
    config: &ClassifierConfig,
) -> Result<ClassifyResult<L>, PipelineError> {
    check_label_capacity::<L>(membership.channel_count())?;
    let smoother = config.smoother.as_ref().map(|kind| kind as &dyn Smoother);

    let result = Pipeline::new(membership)
        .with_priors(priors)
        .combine()?
        .smooth(smoother, config.smoothing_iterations)?
        .normalize(config.normalization)
        .classify::<L>()?
        .into_result();

    info!(%config, pixels = membership.pixel_count(), "classification completed");
    Ok(result)
}
