//! Iterative per-channel smoothing of the posterior image.
//!
//! This module defines the [`Smoother`] trait for pluggable single-channel
//! smoothing operations and the [`SmootherKind`] enum for selecting one
//! of the built-in operations from configuration.
//!
//! # Strategy pattern
//!
//! The classifier does not know how smoothing works. It hands each class
//! channel to the smoother as a zero-copy [`ChannelView`], takes back an
//! owned [`ScalarImage`], and writes it into the same channel. Any
//! closure with the right signature is a [`Smoother`], so callers can
//! plug in their own filters without implementing the trait by hand.

use std::fmt;

use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayD, Axis, Ix2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::raster::{ChannelView, ScalarImage, VectorImage};
use crate::types::PipelineError;

/// Errors reported by a smoothing operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum SmoothingError {
    /// The operation only supports images with a specific number of axes.
    #[error("expected a {expected}-dimensional channel, got {actual} dimensions")]
    UnsupportedDimension {
        /// Supported number of axes.
        expected: usize,
        /// Number of axes received.
        actual: usize,
    },

    /// A configured parameter is unusable.
    #[error("invalid smoothing parameter: {0}")]
    InvalidParameter(String),

    /// The operation returned an image of a different extent.
    #[error("smoothed channel has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        /// The channel's extent.
        expected: Vec<usize>,
        /// The extent the operation returned.
        actual: Vec<usize>,
    },

    /// Any other failure inside the operation.
    #[error("{0}")]
    Failed(String),
}

/// A single-channel to single-channel image transform.
///
/// Implementations take `&self`: the classifier reuses one instance, with
/// unchanged parameters, for every channel and every iteration.
pub trait Smoother {
    /// Smooth one channel, returning an image of the same extent.
    ///
    /// # Errors
    ///
    /// Returns a [`SmoothingError`] if the channel cannot be smoothed.
    fn smooth(&self, channel: ChannelView<'_>) -> Result<ScalarImage, SmoothingError>;

    /// Short description for logs and diagnostics.
    fn describe(&self) -> String {
        String::from("custom")
    }
}

impl<F> Smoother for F
where
    F: Fn(ChannelView<'_>) -> Result<ScalarImage, SmoothingError>,
{
    fn smooth(&self, channel: ChannelView<'_>) -> Result<ScalarImage, SmoothingError> {
        self(channel)
    }
}

/// Selects one of the built-in smoothing operations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmootherKind {
    /// Gaussian blur via [`imageproc::filter::gaussian_blur_f32`].
    ///
    /// Only 2-D channels are supported. Non-positive `sigma` returns the
    /// channel unchanged, since `imageproc` panics on `sigma <= 0.0`. So
    /// does a `sigma` small enough that neighbouring pixels get no weight
    /// at `f32` precision. Otherwise the channel is blurred in `f32`, and
    /// posteriors closer than `f32` resolution may end up tied.
    Gaussian {
        /// Standard deviation of the kernel, in pixels.
        sigma: f32,
    },

    /// Box mean over the `(2 * radius + 1)^N` neighbourhood, for any
    /// number of axes. The window is truncated at the image border.
    /// `radius == 0` returns the channel unchanged.
    Mean {
        /// Half-width of the window along every axis, in pixels.
        radius: usize,
    },
}

impl fmt::Display for SmootherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gaussian { sigma } => write!(f, "gaussian (sigma={sigma:.2})"),
            Self::Mean { radius } => write!(f, "mean (radius={radius})"),
        }
    }
}

impl Smoother for SmootherKind {
    fn smooth(&self, channel: ChannelView<'_>) -> Result<ScalarImage, SmoothingError> {
        match *self {
            Self::Gaussian { sigma } => gaussian(&channel, sigma),
            Self::Mean { radius } => Ok(box_mean(&channel, radius)),
        }
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

/// Gaussian blur of a 2-D channel.
///
/// The channel is rounded to `f32` for `imageproc` and widened back.
#[allow(clippy::cast_possible_truncation)]
fn gaussian(channel: &ChannelView<'_>, sigma: f32) -> Result<ScalarImage, SmoothingError> {
    if !sigma.is_finite() {
        return Err(SmoothingError::InvalidParameter(format!(
            "gaussian sigma must be finite, got {sigma}"
        )));
    }
    if sigma <= 0.0 || negligible_spread(sigma) {
        return Ok(channel.to_scalar_image());
    }

    let view = channel
        .data()
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| SmoothingError::UnsupportedDimension {
            expected: 2,
            actual: channel.shape().len(),
        })?;
    let (rows, cols) = view.dim();
    let too_large = |_| SmoothingError::InvalidParameter(format!("channel {rows}x{cols} too large"));
    let width = u32::try_from(cols).map_err(too_large)?;
    let height = u32::try_from(rows).map_err(too_large)?;

    // image buffers index (x, y) = (column, row).
    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(width, height, |x, y| Luma([view[[y as usize, x as usize]] as f32]));
    let blurred = imageproc::filter::gaussian_blur_f32(&buffer, sigma);

    let out = Array2::from_shape_fn((rows, cols), |(r, c)| {
        f64::from(blurred.get_pixel(c as u32, r as u32).0[0])
    });
    Ok(ScalarImage::from_parts(
        out.into_dyn(),
        channel.geometry().clone(),
    ))
}

/// Whether a kernel of this `sigma` gives adjacent pixels a weight below
/// `f32` resolution, so blurring would only round the channel.
fn negligible_spread(sigma: f32) -> bool {
    let sigma = f64::from(sigma);
    (-0.5 / (sigma * sigma)).exp() < f64::from(f32::EPSILON)
}

/// N-dimensional box mean with border-truncated windows.
///
/// The box is separable: averaging along each axis in turn over the
/// truncated interval equals averaging over the truncated N-D box.
#[allow(clippy::cast_precision_loss)]
fn box_mean(channel: &ChannelView<'_>, radius: usize) -> ScalarImage {
    let mut data: ArrayD<f64> = channel.data().to_owned();
    if radius > 0 {
        let mut scratch = Vec::new();
        for axis in 0..data.ndim() {
            for mut lane in data.lanes_mut(Axis(axis)) {
                scratch.clear();
                scratch.extend(lane.iter().copied());
                let len = scratch.len();
                for (i, out) in lane.iter_mut().enumerate() {
                    let lo = i.saturating_sub(radius);
                    let hi = i.saturating_add(radius).saturating_add(1).min(len);
                    *out = scratch[lo..hi].iter().sum::<f64>() / (hi - lo) as f64;
                }
            }
        }
    }
    ScalarImage::from_parts(data, channel.geometry().clone())
}

/// Apply `smoother` to every channel of `posterior`, `iterations` times.
///
/// Each iteration smooths channels `0..K` in order and writes each result
/// back before moving on, so iteration `i + 1` sees the output of
/// iteration `i`. With no smoother or zero iterations the posterior is
/// left untouched. Returns the number of channel passes performed.
///
/// # Errors
///
/// Returns [`PipelineError::SmoothingFailure`] carrying the channel and
/// iteration if the smoother fails or returns an image of the wrong
/// extent. `posterior` is then partially smoothed and should be
/// discarded.
pub fn smooth_posteriors(
    posterior: &mut VectorImage,
    smoother: Option<&dyn Smoother>,
    iterations: u32,
) -> Result<u64, PipelineError> {
    let Some(smoother) = smoother else {
        if iterations > 0 {
            debug!(iterations, "no smoother bound; skipping smoothing");
        }
        return Ok(0);
    };

    let channels = posterior.channel_count();
    let expected = posterior.spatial_shape().to_vec();
    let mut passes = 0_u64;

    for iteration in 0..iterations {
        debug!(iteration, channels, "smoothing posteriors");
        for channel in 0..channels {
            let fail = |source| PipelineError::SmoothingFailure {
                channel,
                iteration,
                source,
            };
            let smoothed = smoother.smooth(posterior.channel_at(channel)).map_err(fail)?;
            if smoothed.shape() != expected.as_slice() {
                return Err(fail(SmoothingError::ShapeMismatch {
                    expected,
                    actual: smoothed.shape().to_vec(),
                }));
            }
            posterior.channel_at_mut(channel).assign(smoothed.data());
            passes += 1;
        }
    }

    Ok(passes)
}
