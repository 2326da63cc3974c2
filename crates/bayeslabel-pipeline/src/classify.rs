//! Maximum decision rule: one label per pixel from its posterior vector.

use std::fmt::Debug;

use ndarray::{ArrayView1, Zip};
use tracing::debug;

use crate::raster::{LabelImage, VectorImage};
use crate::types::PipelineError;

/// Pixel type of a [`LabelImage`].
///
/// Implemented for the unsigned integer types. The classifier refuses to
/// run when the class count exceeds [`MAX_CLASS_COUNT`](Self::MAX_CLASS_COUNT),
/// so [`from_class_index`](Self::from_class_index) never sees an index
/// that does not fit.
pub trait ClassLabel: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    /// Largest number of classes whose indices all fit in this type.
    const MAX_CLASS_COUNT: usize;

    /// Convert a class index known to be below `MAX_CLASS_COUNT`.
    fn from_class_index(index: usize) -> Self;

    /// The class index this label stands for.
    fn class_index(self) -> usize;
}

macro_rules! impl_class_label {
    ($($t:ty),*) => {
        $(
            #[allow(clippy::cast_possible_truncation)]
            impl ClassLabel for $t {
                // Saturates when every usize value is representable.
                const MAX_CLASS_COUNT: usize = match (<$t>::MAX as usize).checked_add(1) {
                    Some(count) => count,
                    None => usize::MAX,
                };

                fn from_class_index(index: usize) -> Self {
                    index as $t
                }

                fn class_index(self) -> usize {
                    self as usize
                }
            }
        )*
    };
}

impl_class_label!(u8, u16, u32, u64, usize);

/// Index of the largest component, lowest index on ties.
///
/// `NaN` components never win; a vector with no comparable component
/// yields `0`.
#[must_use]
pub fn decide(scores: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (index, &score) in scores.iter().enumerate() {
        if score > best_score {
            best = index;
            best_score = score;
        }
    }
    best
}

/// Check that `classes` labels fit in `L`.
///
/// # Errors
///
/// Returns [`PipelineError::ConfigurationMismatch`] if they do not.
pub fn check_label_capacity<L: ClassLabel>(classes: usize) -> Result<(), PipelineError> {
    if classes > L::MAX_CLASS_COUNT {
        return Err(PipelineError::ConfigurationMismatch(format!(
            "{classes} classes do not fit in label type {} (at most {})",
            std::any::type_name::<L>(),
            L::MAX_CLASS_COUNT,
        )));
    }
    Ok(())
}

/// Apply the maximum decision rule to every pixel of `posterior`.
///
/// The label image has the posterior's spatial shape and geometry.
///
/// # Errors
///
/// Returns [`PipelineError::ConfigurationMismatch`] if the posterior has
/// more classes than `L` can represent.
pub fn classify_posteriors<L: ClassLabel>(
    posterior: &VectorImage,
) -> Result<LabelImage<L>, PipelineError> {
    check_label_capacity::<L>(posterior.channel_count())?;
    debug!(
        classes = posterior.channel_count(),
        pixels = posterior.pixel_count(),
        "applying maximum decision rule"
    );

    let lanes = posterior.data().lanes(posterior.channel_axis());
    #[cfg(not(feature = "rayon"))]
    let data = Zip::from(lanes).map_collect(|scores| L::from_class_index(decide(scores)));
    #[cfg(feature = "rayon")]
    let data = Zip::from(lanes).par_map_collect(|scores| L::from_class_index(decide(scores)));

    Ok(LabelImage::from_parts(data, posterior.geometry().clone()))
}
