//! Shared types for the bayeslabel classification pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::normalize::Normalization;
use crate::raster::{LabelImage, VectorImage};
use crate::smooth::{SmootherKind, SmoothingError};

/// Configuration for the classification pipeline.
///
/// Priors are not part of the configuration because they are image data;
/// pass them alongside the membership image instead. Smoothing
/// operations that are not one of the built-in [`SmootherKind`]s can be
/// injected through [`BayesianClassifier::set_smoother`](crate::BayesianClassifier::set_smoother).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Smoothing applied to each posterior channel, or `None` to skip
    /// smoothing entirely.
    pub smoother: Option<SmootherKind>,

    /// How many times every channel is passed through `smoother`.
    /// Zero leaves the posteriors untouched.
    pub smoothing_iterations: u32,

    /// Optional per-pixel renormalization after smoothing.
    pub normalization: Normalization,
}

impl ClassifierConfig {
    /// Default number of smoothing iterations.
    pub const DEFAULT_SMOOTHING_ITERATIONS: u32 = 0;

    /// Default normalization policy.
    pub const DEFAULT_NORMALIZATION: Normalization = Normalization::Disabled;
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            smoother: None,
            smoothing_iterations: Self::DEFAULT_SMOOTHING_ITERATIONS,
            normalization: Self::DEFAULT_NORMALIZATION,
        }
    }
}

impl fmt::Display for ClassifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.smoother {
            Some(smoother) => write!(f, "smoother: {smoother}")?,
            None => write!(f, "smoother: none")?,
        }
        write!(
            f,
            ", smoothing iterations: {}, normalization: {}",
            self.smoothing_iterations, self.normalization,
        )
    }
}

/// Outputs of one successful pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyResult<L> {
    /// One class index per pixel.
    pub labels: LabelImage<L>,
    /// The posterior image the labels were decided from (after
    /// smoothing and normalization).
    pub posterior: VectorImage,
}

/// Errors that can occur while configuring or running the classifier.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// Two bound images disagree in channel count or spatial shape, or
    /// the class count does not fit the label type.
    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// The smoothing operation failed on one channel.
    #[error("smoothing failed on channel {channel} in iteration {iteration}: {source}")]
    SmoothingFailure {
        /// Class channel being smoothed.
        channel: usize,
        /// Zero-based smoothing iteration.
        iteration: u32,
        /// What the smoothing operation reported.
        source: SmoothingError,
    },

    /// An operation was attempted in a state that does not allow it.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// An image was constructed with inconsistent shape or geometry.
    #[error("invalid image: {0}")]
    InvalidImage(String),
}
