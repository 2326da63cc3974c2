//! Optional per-pixel renormalization of the posterior image.
//!
//! Smoothing does not preserve unit-sum posterior vectors, and neither
//! does the prior weighting. Renormalization is therefore an explicit
//! post-smoothing step, disabled by default. The decision rule is
//! invariant to positive per-pixel scaling, so labels do not change;
//! only the exposed posterior image does.

use std::fmt;

use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::raster::VectorImage;

/// Renormalization policy applied after smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Leave posteriors as they are.
    #[default]
    Disabled,
    /// Divide every pixel vector by the sum of its components.
    UnitSum,
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("disabled"),
            Self::UnitSum => f.write_str("unit-sum"),
        }
    }
}

/// Apply `normalization` to every pixel of `posterior` in place.
///
/// Under [`Normalization::UnitSum`], vectors whose sum is zero, subnormal
/// or not finite are left unchanged. Returns the number of pixels that
/// were rescaled.
pub fn normalize_posteriors(posterior: &mut VectorImage, normalization: Normalization) -> u64 {
    match normalization {
        Normalization::Disabled => 0,
        Normalization::UnitSum => {
            let axis: Axis = posterior.channel_axis();
            let mut rescaled = 0;
            for mut lane in posterior.data_mut().lanes_mut(axis) {
                let sum = lane.sum();
                if sum.is_normal() {
                    lane.mapv_inplace(|v| v / sum);
                    rescaled += 1;
                }
            }
            rescaled
        }
    }
}
