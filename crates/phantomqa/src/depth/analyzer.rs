use super::config::DepthAnalyzerConfig;
use super::profile::{self, Profile};
use crate::error::{QalError, Result, Unit, UnitFailure};
use crate::roi::{PixelRect, Roi, RoiFrame};

/// Baseline-subtracted peak intensity along the channel, one sample per crop
/// row.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChannelIntensity {
    pub depths_mm: Vec<f64>,
    pub peak: Vec<f64>,
}

/// Resolution summary over the reliable profiles.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResolutionSummary {
    /// Smallest FWHM among reliable profiles (mm).
    pub best_fwhm_mm: Option<f64>,
    /// Depth of the smallest FWHM (mm).
    pub best_depth_mm: Option<f64>,
    /// Mean FWHM over reliable profiles with a defined width (mm).
    pub mean_fwhm_mm: Option<f64>,
    pub n_profiles: usize,
    pub n_dropout: usize,
}

/// Depth-resolution result for one ROI.
#[derive(Debug, serde::Serialize)]
pub struct DepthAnalysis {
    pub source_id: String,
    pub frame: RoiFrame,
    pub bbox: PixelRect,
    /// Whether profiles were smoothed before measurement.
    pub smoothing: bool,
    /// Maximum of the along-channel peak curve.
    pub reference_peak: f64,
    pub along_channel: ChannelIntensity,
    /// First depth past the brightest point where the along-channel peak
    /// falls below the dropout fraction of the reference.
    pub dropout_depth_mm: Option<f64>,
    /// One profile per accepted depth, in request order.
    pub profiles: Vec<Profile>,
    pub summary: ResolutionSummary,
    /// Depths that could not be profiled.
    pub failures: Vec<UnitFailure>,
}

impl DepthAnalysis {
    /// Whether resolution metrics at `depth_mm` can be trusted.
    pub fn is_reliable(&self, depth_mm: f64) -> bool {
        self.dropout_depth_mm.map_or(true, |d| depth_mm < d)
    }

    /// Profile measured at exactly `depth_mm`, if requested.
    pub fn profile_at(&self, depth_mm: f64) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.depth_mm == depth_mm)
    }
}

pub(crate) fn analyze_roi(
    roi: &Roi,
    depths_mm: &[f64],
    config: &DepthAnalyzerConfig,
) -> Result<DepthAnalysis> {
    if roi.n_rows() == 0 || roi.n_cols() < 3 {
        return Err(QalError::invalid(format!(
            "roi of '{}' is degenerate ({}x{} samples)",
            roi.source_id(),
            roi.n_cols(),
            roi.n_rows()
        )));
    }
    if depths_mm.is_empty() {
        return Err(QalError::invalid("no depths requested"));
    }

    let frame = roi.frame();
    let along_channel = along_channel_curve(roi, config);
    let reference_peak = along_channel.peak.iter().copied().fold(0.0, f64::max);
    let dropout_depth_mm = dropout_depth(&along_channel, reference_peak, config.dropout_fraction);
    tracing::debug!(
        reference_peak,
        dropout_depth_mm = ?dropout_depth_mm,
        "along-channel intensity"
    );

    let positions_mm: Vec<f64> = (0..roi.n_cols())
        .map(|c| frame.col_to_position_mm(c as f64))
        .collect();

    let outcomes = crate::parallel::map_ordered(depths_mm, |&depth_mm| -> Result<Profile> {
        let row = depth_row(frame, depth_mm)?;
        let line = band_line(roi, row, config.band_half_width);
        Ok(profile::build_profile(
            depth_mm,
            row,
            positions_mm.clone(),
            line,
            reference_peak,
            config,
        ))
    });

    let mut profiles = Vec::with_capacity(depths_mm.len());
    let mut failures = Vec::new();
    for (&depth_mm, outcome) in depths_mm.iter().zip(outcomes) {
        match outcome {
            Ok(p) => {
                tracing::debug!(
                    depth_mm,
                    peak = p.peak,
                    fwhm_mm = ?p.fwhm_mm,
                    dropout = p.dropout,
                    "profile"
                );
                profiles.push(p);
            }
            Err(err) => {
                tracing::warn!(depth_mm, error = %err, "depth rejected");
                failures.push(UnitFailure::new(Unit::Depth(depth_mm), err));
            }
        }
    }

    if profiles.is_empty() {
        return Err(QalError::Batch {
            total: depths_mm.len(),
            failures,
        });
    }

    let summary = summarize(&profiles, dropout_depth_mm);
    tracing::info!(
        source = roi.source_id(),
        profiles = summary.n_profiles,
        dropouts = summary.n_dropout,
        rejected = failures.len(),
        best_fwhm_mm = ?summary.best_fwhm_mm,
        "depth analysis complete"
    );

    Ok(DepthAnalysis {
        source_id: roi.source_id().to_string(),
        frame: frame.clone(),
        bbox: roi.bbox(),
        smoothing: config.smoothing,
        reference_peak,
        along_channel,
        dropout_depth_mm,
        profiles,
        summary,
        failures,
    })
}

fn depth_row(frame: &RoiFrame, depth_mm: f64) -> Result<f64> {
    if !(depth_mm.is_finite() && depth_mm > 0.0) {
        return Err(QalError::invalid(format!(
            "depth must be positive and finite, got {depth_mm}"
        )));
    }
    frame.depth_to_row(depth_mm).ok_or_else(|| {
        let [d0, d1] = frame.depth_range_mm;
        QalError::invalid(format!(
            "depth {depth_mm} mm outside valid range [{d0}, {d1}] mm"
        ))
    })
}

/// Average of `2 * half_width + 1` rows centred on a fractional row.
///
/// Rows past either end are clamped; fractional rows interpolate linearly.
pub(crate) fn band_line(roi: &Roi, row: f64, half_width: usize) -> Vec<f64> {
    let n_rows = roi.n_rows();
    let last = (n_rows - 1) as f64;
    let mut line = vec![0.0f64; roi.n_cols()];
    let hw = half_width as isize;
    for k in -hw..=hw {
        let r = (row + k as f64).clamp(0.0, last);
        let r0 = r.floor() as usize;
        let r1 = (r0 + 1).min(n_rows - 1);
        let t = r - r0 as f64;
        for ((acc, &a), &b) in line.iter_mut().zip(roi.row(r0)).zip(roi.row(r1)) {
            *acc += (1.0 - t) * a as f64 + t * b as f64;
        }
    }
    let n = (2 * half_width + 1) as f64;
    line.iter_mut().for_each(|v| *v /= n);
    line
}

/// Per-row peak measured the same way as a profile, then smoothed along depth.
fn along_channel_curve(roi: &Roi, config: &DepthAnalyzerConfig) -> ChannelIntensity {
    let frame = roi.frame();
    let rows: Vec<usize> = (0..roi.n_rows()).collect();
    let mut peak: Vec<f64> = rows
        .iter()
        .map(|&r| {
            let line = band_line(roi, r as f64, config.band_half_width);
            let line = if config.smoothing {
                profile::gaussian_smooth(&line, config.smoothing_sigma)
            } else {
                line
            };
            let base = profile::baseline_of(&line, config.baseline);
            line.iter().copied().fold(f64::NEG_INFINITY, f64::max) - base
        })
        .collect();
    if config.smoothing {
        peak = profile::gaussian_smooth(&peak, config.smoothing_sigma);
    }
    ChannelIntensity {
        depths_mm: rows.iter().map(|&r| frame.row_to_depth(r as f64)).collect(),
        peak,
    }
}

fn dropout_depth(curve: &ChannelIntensity, reference: f64, fraction: f64) -> Option<f64> {
    if !(reference > 0.0) {
        return curve.depths_mm.first().copied();
    }
    let threshold = fraction * reference;
    let brightest = curve.peak.iter().position(|&v| v == reference)?;
    let i = (brightest + 1..curve.peak.len()).find(|&i| curve.peak[i] < threshold)?;
    let (a, b) = (curve.peak[i - 1], curve.peak[i]);
    let t = if a != b { (a - threshold) / (a - b) } else { 0.0 };
    let (d0, d1) = (curve.depths_mm[i - 1], curve.depths_mm[i]);
    Some(d0 + t * (d1 - d0))
}

fn summarize(profiles: &[Profile], dropout_depth_mm: Option<f64>) -> ResolutionSummary {
    let reliable: Vec<(f64, f64)> = profiles
        .iter()
        .filter(|p| !p.dropout && dropout_depth_mm.map_or(true, |d| p.depth_mm < d))
        .filter_map(|p| p.fwhm_mm.map(|w| (p.depth_mm, w)))
        .collect();
    let best = reliable
        .iter()
        .copied()
        .min_by(|a, b| a.1.total_cmp(&b.1));
    let mean = (!reliable.is_empty())
        .then(|| reliable.iter().map(|(_, w)| w).sum::<f64>() / reliable.len() as f64);
    ResolutionSummary {
        best_fwhm_mm: best.map(|b| b.1),
        best_depth_mm: best.map(|b| b.0),
        mean_fwhm_mm: mean,
        n_profiles: profiles.len(),
        n_dropout: profiles.iter().filter(|p| p.dropout).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::IntensityMap;
    use crate::roi::ScaleSource;
    use approx::assert_relative_eq;
    use image::Luma;

    /// Straight channel along the rows: Gaussian cross-section of `sigma_px`
    /// whose amplitude is `amp(row)`.
    fn channel_roi(n_rows: u32, n_cols: u32, sigma_px: f64, amp: impl Fn(u32) -> f64) -> Roi {
        let cx = (n_cols - 1) as f64 / 2.0;
        let pixels = IntensityMap::from_fn(n_cols, n_rows, |x, y| {
            let dx = x as f64 - cx;
            Luma([(10.0 + amp(y) * (-(dx * dx) / (2.0 * sigma_px * sigma_px)).exp()) as f32])
        });
        Roi {
            source_id: "synthetic".into(),
            bbox: PixelRect { x: 0, y: 0, width: n_cols, height: n_rows },
            frame: RoiFrame {
                origin_xy: [0.0, 0.0],
                depth_axis: [0.0, 1.0],
                cross_axis: [1.0, 0.0],
                mm_per_px: 0.1,
                scale_source: ScaleSource::ImageMetadata,
                depth_range_mm: [0.0, (n_rows - 1) as f64 * 0.1],
                n_rows: n_rows as usize,
                channel_cols: [0, (n_cols - 1) as usize],
                channel_center_col: cx,
            },
            pixels,
        }
    }

    fn raw() -> DepthAnalyzerConfig {
        DepthAnalyzerConfig {
            smoothing: false,
            ..Default::default()
        }
    }

    #[test]
    fn uniform_channel_fwhm_matches_sigma() {
        let roi = channel_roi(61, 81, 4.0, |_| 1000.0);
        let a = analyze_roi(&roi, &[1.0, 3.0, 5.0], &raw()).unwrap();
        assert_eq!(a.profiles.len(), 3);
        assert!(a.failures.is_empty());
        for p in &a.profiles {
            assert_relative_eq!(p.fwhm_mm.unwrap(), 2.3548 * 4.0 * 0.1, max_relative = 0.01);
            assert!(!p.dropout);
            assert_relative_eq!(p.peak_position_mm, 0.0, epsilon = 1e-12);
        }
        assert!(a.dropout_depth_mm.is_none());
        assert!(a.is_reliable(5.9));
    }

    #[test]
    fn out_of_range_depths_fail_individually() {
        let roi = channel_roi(61, 41, 3.0, |_| 500.0);
        let a = analyze_roi(&roi, &[-1.0, 2.0, 9.0, f64::NAN], &raw()).unwrap();
        assert_eq!(a.profiles.len(), 1);
        assert_eq!(a.profiles[0].depth_mm, 2.0);
        let units: Vec<&Unit> = a.failures.iter().map(|f| &f.unit).collect();
        assert_eq!(units.len(), 3);
        assert_eq!(*units[0], Unit::Depth(-1.0));
        assert_eq!(*units[1], Unit::Depth(9.0));
        assert!(a.failures.iter().all(|f| f.error.kind() == crate::ErrorKind::InvalidInput));
    }

    #[test]
    fn every_depth_rejected_is_batch_error() {
        let roi = channel_roi(21, 41, 3.0, |_| 500.0);
        let err = analyze_roi(&roi, &[7.0, 8.0], &raw()).unwrap_err();
        match err {
            QalError::Batch { total, failures } => {
                assert_eq!(total, 2);
                assert_eq!(failures.len(), 2);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn decaying_channel_reports_dropout_depth() {
        // Amplitude falls linearly from 1000 at row 0 to 0 at row 100.
        let roi = channel_roi(101, 41, 3.0, |y| 1000.0 * (1.0 - y as f64 / 100.0));
        let a = analyze_roi(&roi, &[1.0, 5.0, 9.95], &raw()).unwrap();
        // Row 0 averages rows 0, 0 and 1 of the band.
        assert_relative_eq!(a.reference_peak, 2990.0 / 3.0, max_relative = 1e-3);
        let d = a.dropout_depth_mm.unwrap();
        // 2 % of the reference is crossed at row 98.
        assert!((d - 9.8).abs() < 0.15, "dropout depth {d}");
        assert!(!a.profiles[0].dropout);
        assert!(!a.profiles[1].dropout);
        assert!(a.profiles[2].dropout);
        assert!(a.is_reliable(5.0));
        assert!(!a.is_reliable(9.95));
        assert_eq!(a.summary.n_dropout, 1);
        assert_eq!(a.summary.n_profiles, 3);
    }

    #[test]
    fn fractional_rows_interpolate() {
        let roi = channel_roi(11, 21, 2.0, |y| 100.0 * y as f64);
        let line = band_line(&roi, 4.5, 0);
        let lo = band_line(&roi, 4.0, 0);
        let hi = band_line(&roi, 5.0, 0);
        for ((m, a), b) in line.iter().zip(&lo).zip(&hi) {
            assert_relative_eq!(*m, 0.5 * (a + b), epsilon = 1e-9);
        }
    }

    #[test]
    fn degenerate_roi_is_invalid_input() {
        let roi = channel_roi(10, 2, 1.0, |_| 10.0);
        let err = analyze_roi(&roi, &[0.5], &raw()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
    }

    #[test]
    fn repeated_analysis_is_identical() {
        let roi = channel_roi(61, 41, 3.0, |y| 800.0 - 5.0 * y as f64);
        let cfg = DepthAnalyzerConfig::default();
        let a = analyze_roi(&roi, &cfg.depths_mm, &cfg).unwrap();
        let b = analyze_roi(&roi, &cfg.depths_mm, &cfg).unwrap();
        assert_eq!(a.profiles, b.profiles);
        assert_eq!(a.along_channel, b.along_channel);
        assert_eq!(a.dropout_depth_mm, b.dropout_depth_mm);
    }
}
