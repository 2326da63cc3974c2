//! N-dimensional images consumed and produced by the classifier.
//!
//! Pixel data lives in [`ndarray`] arrays with the spatial axes first.
//! Multi-channel images ([`VectorImage`]) carry one extra trailing axis
//! holding the per-class vector, so a 2-D membership image with `K`
//! classes has shape `[rows, cols, K]`.
//!
//! Every image carries a [`Geometry`] describing where its index grid
//! sits in physical space. The classifier never interprets geometry; it
//! only copies it from the membership image to every image it produces.

use ndarray::{ArrayD, ArrayView1, ArrayViewD, ArrayViewMutD, Axis, Ix1, IxDyn};
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Physical placement of an image's index grid.
///
/// `direction` is a row-major `D x D` matrix of direction cosines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Physical coordinates of the pixel at index zero, one per axis.
    pub origin: Vec<f64>,
    /// Distance between adjacent pixels along each axis.
    pub spacing: Vec<f64>,
    /// Row-major direction cosine matrix (`D * D` entries).
    pub direction: Vec<f64>,
}

impl Geometry {
    /// Geometry with zero origin, unit spacing and identity direction.
    #[must_use]
    pub fn identity(dimension: usize) -> Self {
        let mut direction = vec![0.0; dimension * dimension];
        for axis in 0..dimension {
            direction[axis * dimension + axis] = 1.0;
        }
        Self {
            origin: vec![0.0; dimension],
            spacing: vec![1.0; dimension],
            direction,
        }
    }

    /// Number of spatial axes described.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.origin.len()
    }

    /// Check that all per-axis vectors agree in length and spacing is
    /// positive and finite.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] describing the first
    /// inconsistency found.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let dimension = self.dimension();
        if self.spacing.len() != dimension {
            return Err(PipelineError::InvalidImage(format!(
                "geometry has {dimension} origin components but {} spacing components",
                self.spacing.len(),
            )));
        }
        if self.direction.len() != dimension * dimension {
            return Err(PipelineError::InvalidImage(format!(
                "geometry direction must have {} entries, got {}",
                dimension * dimension,
                self.direction.len(),
            )));
        }
        if let Some(bad) = self.spacing.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return Err(PipelineError::InvalidImage(format!(
                "geometry spacing must be positive and finite, got {bad}",
            )));
        }
        Ok(())
    }
}

// ───────────────────────── VectorImage ───────────────────────────────

/// An N-dimensional image whose pixels are vectors of `f64`.
///
/// Used for membership, prior and posterior images. The last array axis
/// is the channel (class) axis.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorImage {
    data: ArrayD<f64>,
    geometry: Geometry,
}

impl VectorImage {
    /// Wrap an array whose last axis holds the channels.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if the array has no spatial
    /// axis, has zero channels, or `geometry` does not describe exactly
    /// the array's spatial axes.
    pub fn new(data: ArrayD<f64>, geometry: Geometry) -> Result<Self, PipelineError> {
        if data.ndim() < 2 {
            return Err(PipelineError::InvalidImage(format!(
                "vector image needs at least one spatial axis plus a channel axis, got {} axes",
                data.ndim(),
            )));
        }
        if data.shape()[data.ndim() - 1] == 0 {
            return Err(PipelineError::InvalidImage(
                "vector image must have at least one channel".to_string(),
            ));
        }
        if geometry.dimension() != data.ndim() - 1 {
            return Err(PipelineError::InvalidImage(format!(
                "geometry describes {} axes but image has {} spatial axes",
                geometry.dimension(),
                data.ndim() - 1,
            )));
        }
        geometry.validate()?;
        Ok(Self { data, geometry })
    }

    /// Build an image with identity geometry from row-major pixel values.
    ///
    /// `values` holds `channels` consecutive components per pixel, pixels
    /// in row-major order of `spatial_shape`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if `values` does not have
    /// exactly `product(spatial_shape) * channels` elements or the shape is
    /// otherwise invalid.
    pub fn from_shape_vec(
        spatial_shape: &[usize],
        channels: usize,
        values: Vec<f64>,
    ) -> Result<Self, PipelineError> {
        let mut shape = spatial_shape.to_vec();
        shape.push(channels);
        let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| PipelineError::InvalidImage(e.to_string()))?;
        Self::new(data, Geometry::identity(spatial_shape.len()))
    }

    /// Construct without validation. Callers guarantee the invariants
    /// checked by [`new`](Self::new).
    pub(crate) const fn from_parts(data: ArrayD<f64>, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    /// Replace the geometry.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if `geometry` does not fit
    /// the image.
    pub fn with_geometry(self, geometry: Geometry) -> Result<Self, PipelineError> {
        Self::new(self.data, geometry)
    }

    /// The spatial extent, excluding the channel axis.
    #[must_use]
    pub fn spatial_shape(&self) -> &[usize] {
        &self.data.shape()[..self.data.ndim() - 1]
    }

    /// Number of channels (classes) per pixel.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.data.shape()[self.data.ndim() - 1]
    }

    /// Number of pixels (product of the spatial extent).
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.spatial_shape().iter().product()
    }

    /// Spatial metadata.
    #[must_use]
    pub const fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// The underlying array, channel axis last.
    #[must_use]
    pub const fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub(crate) const fn data_mut(&mut self) -> &mut ArrayD<f64> {
        &mut self.data
    }

    /// The vector stored at a spatial `index`, or `None` if the index is
    /// out of bounds or has the wrong number of components.
    #[must_use]
    pub fn pixel(&self, index: &[usize]) -> Option<ArrayView1<'_, f64>> {
        let shape = self.spatial_shape();
        if index.len() != shape.len() || index.iter().zip(shape).any(|(&i, &n)| i >= n) {
            return None;
        }
        let mut view = self.data.view();
        for &i in index {
            view = view.index_axis_move(Axis(0), i);
        }
        view.into_dimensionality::<Ix1>().ok()
    }

    /// A strided, zero-copy view of channel `channel`, or `None` if the
    /// channel does not exist.
    #[must_use]
    pub fn channel(&self, channel: usize) -> Option<ChannelView<'_>> {
        (channel < self.channel_count()).then(|| self.channel_at(channel))
    }

    /// Like [`channel`](Self::channel) for indices already known to be in
    /// range.
    pub(crate) fn channel_at(&self, channel: usize) -> ChannelView<'_> {
        ChannelView {
            data: self.data.index_axis(self.channel_axis(), channel),
            geometry: &self.geometry,
        }
    }

    pub(crate) fn channel_at_mut(&mut self, channel: usize) -> ArrayViewMutD<'_, f64> {
        let axis = self.channel_axis();
        self.data.index_axis_mut(axis, channel)
    }

    pub(crate) fn channel_axis(&self) -> Axis {
        Axis(self.data.ndim() - 1)
    }
}

/// Serde-compatible proxy for [`VectorImage`].
///
/// Values are stored flat in row-major order so images round-trip
/// through JSON without depending on the `ndarray` wire layout. The proxy
/// is validated on the way back in.
#[derive(Serialize, Deserialize)]
struct VectorImageProxy {
    spatial_shape: Vec<usize>,
    channels: usize,
    geometry: Geometry,
    values: Vec<f64>,
}

impl Serialize for VectorImage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = VectorImageProxy {
            spatial_shape: self.spatial_shape().to_vec(),
            channels: self.channel_count(),
            geometry: self.geometry.clone(),
            values: self.data.iter().copied().collect(),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VectorImage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = VectorImageProxy::deserialize(deserializer)?;
        Self::from_shape_vec(&proxy.spatial_shape, proxy.channels, proxy.values)
            .and_then(|image| image.with_geometry(proxy.geometry))
            .map_err(serde::de::Error::custom)
    }
}

// ───────────────────────── Single-channel images ─────────────────────

/// One channel of a [`VectorImage`], borrowed without copying.
///
/// This is what smoothing operations receive. The view shares the parent
/// image's geometry.
#[derive(Debug, Clone)]
pub struct ChannelView<'a> {
    data: ArrayViewD<'a, f64>,
    geometry: &'a Geometry,
}

impl<'a> ChannelView<'a> {
    /// The channel's values, shaped like the parent's spatial extent.
    #[must_use]
    pub const fn data(&self) -> &ArrayViewD<'a, f64> {
        &self.data
    }

    /// Spatial metadata of the parent image.
    #[must_use]
    pub const fn geometry(&self) -> &'a Geometry {
        self.geometry
    }

    /// Spatial extent of the channel.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Copy the channel into an owned [`ScalarImage`].
    #[must_use]
    pub fn to_scalar_image(&self) -> ScalarImage {
        ScalarImage {
            data: self.data.to_owned(),
            geometry: self.geometry.clone(),
        }
    }
}

/// An owned single-channel `f64` image, as returned by smoothing
/// operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarImage {
    data: ArrayD<f64>,
    geometry: Geometry,
}

impl ScalarImage {
    /// Wrap an array of scalar values.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if `geometry` does not
    /// describe every axis of `data`.
    pub fn new(data: ArrayD<f64>, geometry: Geometry) -> Result<Self, PipelineError> {
        if geometry.dimension() != data.ndim() {
            return Err(PipelineError::InvalidImage(format!(
                "geometry describes {} axes but image has {}",
                geometry.dimension(),
                data.ndim(),
            )));
        }
        geometry.validate()?;
        Ok(Self { data, geometry })
    }

    pub(crate) const fn from_parts(data: ArrayD<f64>, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    /// The pixel values.
    #[must_use]
    pub const fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    /// Spatial metadata.
    #[must_use]
    pub const fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Spatial extent.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

/// The classifier's output: one class index per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelImage<L> {
    data: ArrayD<L>,
    geometry: Geometry,
}

impl<L: Copy> LabelImage<L> {
    pub(crate) const fn from_parts(data: ArrayD<L>, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    /// The label array, shaped like the membership image's spatial extent.
    #[must_use]
    pub const fn data(&self) -> &ArrayD<L> {
        &self.data
    }

    /// Spatial metadata, identical to the membership image's.
    #[must_use]
    pub const fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Spatial extent.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Label at a spatial `index`, or `None` if out of bounds.
    #[must_use]
    pub fn get(&self, index: &[usize]) -> Option<L> {
        self.data.get(index).copied()
    }

    /// All labels in row-major order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<L> {
        self.data.iter().copied().collect()
    }
}
