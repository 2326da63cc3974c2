//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for
//! parameter experimentation. [`classify_with_diagnostics`] runs the
//! incremental [`Pipeline`](crate::Pipeline) and times every stage with
//! a caller-supplied [`Clock`], so this crate stays free of any
//! particular time source.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::{ClassLabel, check_label_capacity, decide};
use crate::normalize::Normalization;
use crate::pipeline::{MeasuredStage, Pipeline};
use crate::raster::{LabelImage, VectorImage};
use crate::smooth::Smoother;
use crate::types::{ClassifierConfig, ClassifyResult, PipelineError};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// A monotonic time source.
///
/// Native callers typically wrap `std::time::Instant`; tests use a fake.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: prior weighting.
    pub combine: StageDiagnostics,
    /// Stage 2: iterative smoothing.
    pub smooth: StageDiagnostics,
    /// Stage 3: renormalization.
    pub normalize: StageDiagnostics,
    /// Stage 4: maximum decision rule.
    pub classify: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Prior weighting metrics.
    Combine {
        /// Number of pixels combined.
        pixel_count: usize,
        /// Number of classes per pixel.
        class_count: usize,
        /// Whether a priors image was multiplied in.
        priors_applied: bool,
    },
    /// Smoothing metrics.
    Smooth {
        /// Description of the smoother, or `None` if none was bound.
        smoother: Option<String>,
        /// Configured iteration count (zero when no smoother was bound).
        iterations: u32,
        /// Single-channel smoothing passes performed.
        channel_passes: u64,
    },
    /// Renormalization metrics.
    Normalize {
        /// Policy applied.
        policy: Normalization,
        /// Pixels whose vectors were rescaled.
        rescaled_pixels: u64,
    },
    /// Decision rule metrics.
    Classify {
        /// Number of classes.
        class_count: usize,
        /// Pixel count per label, indexed by class.
        class_histogram: Vec<u64>,
        /// Pixels whose maximum was shared by several classes.
        tied_pixels: u64,
    },
}

/// High-level summary for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Spatial extent of the images.
    pub spatial_shape: Vec<usize>,
    /// Total pixel count.
    pub pixel_count: usize,
    /// Number of classes.
    pub class_count: usize,
}

/// Run the full pipeline, timing every stage.
///
/// Behaves exactly like [`classify`](fn@crate::classify) but also returns
/// [`PipelineDiagnostics`].
///
/// # Errors
///
/// Returns the same errors as [`classify`](fn@crate::classify).
pub fn classify_with_diagnostics<L: ClassLabel, C: Clock>(
    membership: &VectorImage,
    priors: Option<&VectorImage>,
    config: &ClassifierConfig,
    clock: &C,
) -> Result<(ClassifyResult<L>, PipelineDiagnostics), PipelineError> {
    check_label_capacity::<L>(membership.channel_count())?;
    let smoother = config.smoother.as_ref().map(|kind| kind as &dyn Smoother);
    let pipeline_start = clock.now();

    let start = clock.now();
    let combined = Pipeline::new(membership).with_priors(priors).combine()?;
    let combine = stage_diagnostics(clock.elapsed(&start), &combined);

    let start = clock.now();
    let smoothed = combined.smooth(smoother, config.smoothing_iterations)?;
    let smooth = stage_diagnostics(clock.elapsed(&start), &smoothed);

    let start = clock.now();
    let normalized = smoothed.normalize(config.normalization);
    let normalize = stage_diagnostics(clock.elapsed(&start), &normalized);

    let start = clock.now();
    let classified = normalized.classify::<L>()?;
    let classify = stage_diagnostics(clock.elapsed(&start), &classified);

    let total_duration = clock.elapsed(&pipeline_start);
    let summary = PipelineSummary {
        spatial_shape: membership.spatial_shape().to_vec(),
        pixel_count: membership.pixel_count(),
        class_count: membership.channel_count(),
    };

    Ok((
        classified.into_result(),
        PipelineDiagnostics {
            combine,
            smooth,
            normalize,
            classify,
            total_duration,
            summary,
        },
    ))
}

/// Pair a stage's duration with its metrics.
fn stage_diagnostics<S: MeasuredStage>(duration: Duration, stage: &S) -> StageDiagnostics {
    StageDiagnostics {
        duration,
        metrics: stage.stage_metrics(),
    }
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {:?} ({} pixels, {} classes)",
            self.summary.spatial_shape, self.summary.pixel_count, self.summary.class_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Combine", &self.combine),
            ("Smooth", &self.smooth),
            ("Normalize", &self.normalize),
            ("Classify", &self.classify),
        ];

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Combine {
            pixel_count,
            class_count,
            priors_applied,
        } => {
            let priors = if *priors_applied { "priors" } else { "uniform" };
            format!("{pixel_count} px x {class_count} classes ({priors})")
        }
        StageMetrics::Smooth {
            smoother,
            iterations,
            channel_passes,
        } => match smoother {
            Some(name) => format!("{name} x{iterations} ({channel_passes} channel passes)"),
            None => "disabled".to_string(),
        },
        StageMetrics::Normalize {
            policy,
            rescaled_pixels,
        } => format!("{policy} ({rescaled_pixels} px rescaled)"),
        StageMetrics::Classify {
            class_histogram,
            tied_pixels,
            ..
        } => {
            let counts: Vec<String> = class_histogram
                .iter()
                .enumerate()
                .map(|(class, count)| format!("{class}:{count}"))
                .collect();
            format!("labels [{}] ties={tied_pixels}", counts.join(" "))
        }
    }
}

/// Count pixels per label. Labels outside `0..classes` are ignored.
pub(crate) fn label_histogram<L: ClassLabel>(labels: &LabelImage<L>, classes: usize) -> Vec<u64> {
    let mut histogram = vec![0_u64; classes];
    for label in labels.data() {
        if let Some(count) = histogram.get_mut(label.class_index()) {
            *count += 1;
        }
    }
    histogram
}

/// Count pixels whose maximum posterior is reached by more than one class.
#[allow(clippy::float_cmp)]
pub(crate) fn count_tied_pixels(posterior: &VectorImage) -> u64 {
    posterior
        .data()
        .lanes(posterior.channel_axis())
        .into_iter()
        .map(|scores| {
            let best = scores[decide(scores.view())];
            let ties = scores.iter().filter(|&&s| s == best).count();
            u64::from(ties > 1)
        })
        .sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::smooth::SmootherKind;

    /// Clock that advances one millisecond per reading.
    struct TickClock {
        ticks: Cell<u64>,
    }

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.ticks.get();
            self.ticks.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    fn membership() -> VectorImage {
        VectorImage::from_shape_vec(&[2, 2], 2, vec![0.2, 0.8, 0.6, 0.4, 0.9, 0.1, 0.5, 0.5])
            .unwrap()
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        let ms = duration_ms(d);
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn histogram_counts_labels() {
        let m = membership();
        let labels = crate::classify::classify_posteriors::<u8>(&m).unwrap();
        assert_eq!(label_histogram(&labels, 2), vec![3, 1]);
    }

    #[test]
    fn tied_pixels_counted() {
        assert_eq!(count_tied_pixels(&membership()), 1);
    }

    #[test]
    fn diagnostics_cover_every_stage() {
        let clock = TickClock {
            ticks: Cell::new(0),
        };
        let config = ClassifierConfig {
            smoother: Some(SmootherKind::Mean { radius: 1 }),
            smoothing_iterations: 2,
            normalization: Normalization::UnitSum,
        };
        let (result, diag) =
            classify_with_diagnostics::<u8, _>(&membership(), None, &config, &clock).unwrap();

        assert_eq!(result.labels.shape(), &[2, 2]);
        assert!(diag.total_duration >= diag.classify.duration);
        assert_eq!(diag.summary.class_count, 2);
        assert!(matches!(
            diag.smooth.metrics,
            StageMetrics::Smooth {
                iterations: 2,
                channel_passes: 4,
                ..
            }
        ));
        assert!(matches!(
            diag.normalize.metrics,
            StageMetrics::Normalize {
                policy: Normalization::UnitSum,
                rescaled_pixels: 4,
            }
        ));
    }

    #[test]
    fn each_stage_reports_its_own_metrics() {
        let clock = TickClock {
            ticks: Cell::new(0),
        };
        let (_, diag) = classify_with_diagnostics::<u8, _>(
            &membership(),
            None,
            &ClassifierConfig::default(),
            &clock,
        )
        .unwrap();

        assert_eq!(
            diag.combine.metrics,
            StageMetrics::Combine {
                pixel_count: 4,
                class_count: 2,
                priors_applied: false,
            }
        );
        assert_eq!(
            diag.smooth.metrics,
            StageMetrics::Smooth {
                smoother: None,
                iterations: 0,
                channel_passes: 0,
            }
        );
        assert_eq!(
            diag.normalize.metrics,
            StageMetrics::Normalize {
                policy: Normalization::Disabled,
                rescaled_pixels: 0,
            }
        );
        assert_eq!(
            diag.classify.metrics,
            StageMetrics::Classify {
                class_count: 2,
                class_histogram: vec![3, 1],
                tied_pixels: 1,
            }
        );
    }

    #[test]
    fn diagnostics_match_plain_classify() {
        let clock = TickClock {
            ticks: Cell::new(0),
        };
        let config = ClassifierConfig::default();
        let (result, _) =
            classify_with_diagnostics::<u8, _>(&membership(), None, &config, &clock).unwrap();
        let plain = crate::classify::<u8>(&membership(), None, &config).unwrap();
        assert_eq!(result, plain);
    }

    #[test]
    fn report_produces_nonempty_string() {
        let clock = TickClock {
            ticks: Cell::new(0),
        };
        let config = ClassifierConfig {
            smoother: Some(SmootherKind::Gaussian { sigma: 1.0 }),
            smoothing_iterations: 1,
            normalization: Normalization::Disabled,
        };
        let (_, diag) =
            classify_with_diagnostics::<u8, _>(&membership(), None, &config, &clock).unwrap();
        let report = diag.report();
        assert!(report.contains("Pipeline Diagnostics Report"));
        assert!(report.contains("Classify"));
        assert!(report.contains("gaussian"));
    }

    #[test]
    fn diagnostics_serialize_to_json() {
        let clock = TickClock {
            ticks: Cell::new(0),
        };
        let (_, diag) = classify_with_diagnostics::<u8, _>(
            &membership(),
            None,
            &ClassifierConfig::default(),
            &clock,
        )
        .unwrap();
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("\"class_histogram\""));
        let back: PipelineDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.classify.metrics, diag.classify.metrics);
    }
}
