//! Posterior combination: membership weighted by priors.
//!
//! Without priors the posterior is a straight copy of the membership
//! image, which is what a uniform prior would produce up to scale. With
//! priors, each component is multiplied elementwise:
//!
//! ```text
//! posterior[p][c] = membership[p][c] * priors[p][c]
//! ```

use ndarray::{ArrayD, Zip};
use tracing::{debug, warn};

use crate::raster::VectorImage;
use crate::types::PipelineError;

/// Check that `other` can be combined with `membership`.
///
/// `role` names `other` in the error message (e.g. `"priors"`).
///
/// # Errors
///
/// Returns [`PipelineError::ConfigurationMismatch`] if the channel counts
/// or spatial shapes differ.
pub fn check_compatible(
    membership: &VectorImage,
    other: &VectorImage,
    role: &str,
) -> Result<(), PipelineError> {
    if other.channel_count() != membership.channel_count() {
        return Err(PipelineError::ConfigurationMismatch(format!(
            "{role} image has {} channels but membership image has {}",
            other.channel_count(),
            membership.channel_count(),
        )));
    }
    if other.spatial_shape() != membership.spatial_shape() {
        return Err(PipelineError::ConfigurationMismatch(format!(
            "{role} image has shape {:?} but membership image has shape {:?}",
            other.spatial_shape(),
            membership.spatial_shape(),
        )));
    }
    Ok(())
}

/// Compute the unnormalized posterior image.
///
/// The result always carries the membership image's geometry.
///
/// # Errors
///
/// Returns [`PipelineError::ConfigurationMismatch`] if `priors` disagrees
/// with `membership` in channel count or spatial shape. The check runs
/// before any pixel is touched.
pub fn compute_posteriors(
    membership: &VectorImage,
    priors: Option<&VectorImage>,
) -> Result<VectorImage, PipelineError> {
    let Some(priors) = priors else {
        debug!(
            classes = membership.channel_count(),
            "no priors bound; posteriors copy memberships"
        );
        return Ok(membership.clone());
    };

    check_compatible(membership, priors, "priors")?;
    if priors.geometry() != membership.geometry() {
        warn!("priors geometry differs from membership geometry; using membership geometry");
    }

    debug!(
        classes = membership.channel_count(),
        pixels = membership.pixel_count(),
        "weighting memberships by priors"
    );
    let data = multiply(membership.data(), priors.data());
    Ok(VectorImage::from_parts(data, membership.geometry().clone()))
}

#[cfg(not(feature = "rayon"))]
fn multiply(membership: &ArrayD<f64>, priors: &ArrayD<f64>) -> ArrayD<f64> {
    Zip::from(membership)
        .and(priors)
        .map_collect(|&m, &p| m * p)
}

#[cfg(feature = "rayon")]
fn multiply(membership: &ArrayD<f64>, priors: &ArrayD<f64>) -> ArrayD<f64> {
    Zip::from(membership)
        .and(priors)
        .par_map_collect(|&m, &p| m * p)
}
