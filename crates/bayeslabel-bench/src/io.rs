//! Reading membership and priors images, writing label maps.
//!
//! Raster inputs (PNG, JPEG, BMP, WebP) become three-class membership
//! images: the red, green and blue intensities of each pixel, scaled to
//! `[0, 1]`. Anything with a `.json` extension is parsed as a serialized
//! [`VectorImage`].

use std::path::Path;

use bayeslabel_pipeline::{LabelImage, PipelineError, VectorImage};
use image::{GrayImage, RgbImage};

/// Load a membership or priors image from `path`.
///
/// # Errors
///
/// Returns a message naming `path` if the file cannot be read or decoded.
pub fn load_vector_image(path: &Path) -> Result<VectorImage, String> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
        return serde_json::from_str(&text)
            .map_err(|e| format!("Error parsing {}: {e}", path.display()));
    }

    let decoded = image::open(path).map_err(|e| format!("Error decoding {}: {e}", path.display()))?;
    rgb_membership(&decoded.to_rgb8())
        .map_err(|e| format!("Error converting {}: {e}", path.display()))
}

/// One class per color channel, intensities scaled to `[0, 1]`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidImage`] if the pixel buffer does not
/// match the image dimensions.
pub fn rgb_membership(rgb: &RgbImage) -> Result<VectorImage, PipelineError> {
    let shape = [rgb.height() as usize, rgb.width() as usize];
    let values = rgb.as_raw().iter().map(|&v| f64::from(v) / 255.0).collect();
    VectorImage::from_shape_vec(&shape, 3, values)
}

/// Render a 2-D label image as an 8-bit grayscale image.
///
/// With `stretch`, labels `0..classes` are spread over `0..=255` so the
/// classes are visually distinct; otherwise pixels hold raw class
/// indices.
///
/// # Errors
///
/// Returns a message if the label image is not 2-D or too large.
pub fn label_png(labels: &LabelImage<u8>, classes: usize, stretch: bool) -> Result<GrayImage, String> {
    let &[rows, cols] = labels.shape() else {
        return Err(format!(
            "label image has {} axes; only 2-D labels can be written as PNG",
            labels.shape().len()
        ));
    };
    let width = u32::try_from(cols).map_err(|e| format!("label image too wide: {e}"))?;
    let height = u32::try_from(rows).map_err(|e| format!("label image too tall: {e}"))?;

    let step = match classes {
        0 | 1 => 0,
        n => 255 / u8::try_from(n - 1).unwrap_or(u8::MAX),
    };
    let pixels = labels
        .to_vec()
        .into_iter()
        .map(|label| if stretch { label.saturating_mul(step) } else { label })
        .collect();

    GrayImage::from_raw(width, height, pixels)
        .ok_or_else(|| "label buffer does not match image size".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bayeslabel_pipeline::{ClassifierConfig, classify};
    use image::Rgb;

    use super::*;

    #[test]
    fn rgb_pixels_become_three_classes() {
        let mut rgb = RgbImage::new(2, 1);
        rgb.put_pixel(0, 0, Rgb([255, 0, 0]));
        rgb.put_pixel(1, 0, Rgb([0, 0, 51]));
        let membership = rgb_membership(&rgb).unwrap();
        assert_eq!(membership.spatial_shape(), &[1, 2]);
        assert_eq!(membership.channel_count(), 3);
        assert_eq!(membership.pixel(&[0, 0]).unwrap().to_vec(), vec![1.0, 0.0, 0.0]);
        assert!((membership.pixel(&[0, 1]).unwrap()[2] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn empty_image_has_no_pixels() {
        let rgb = RgbImage::new(0, 0);
        let membership = rgb_membership(&rgb).unwrap();
        assert_eq!(membership.pixel_count(), 0);
    }

    #[test]
    fn labels_render_stretched() {
        let mut rgb = RgbImage::new(3, 1);
        rgb.put_pixel(0, 0, Rgb([200, 10, 10]));
        rgb.put_pixel(1, 0, Rgb([10, 200, 10]));
        rgb.put_pixel(2, 0, Rgb([10, 10, 200]));
        let membership = rgb_membership(&rgb).unwrap();
        let result = classify::<u8>(&membership, None, &ClassifierConfig::default()).unwrap();

        let raw = label_png(&result.labels, 3, false).unwrap();
        assert_eq!(raw.as_raw(), &vec![0, 1, 2]);
        let stretched = label_png(&result.labels, 3, true).unwrap();
        assert_eq!(stretched.as_raw(), &vec![0, 127, 254]);
    }

    #[test]
    fn volumes_cannot_be_written_as_png() {
        let membership = VectorImage::from_shape_vec(&[1, 1, 1], 1, vec![1.0]).unwrap();
        let result = classify::<u8>(&membership, None, &ClassifierConfig::default()).unwrap();
        assert!(label_png(&result.labels, 1, false).is_err());
    }
}
