//! Cross-channel intensity profiles and their resolution metrics.

use super::config::{BaselineMode, DepthAnalyzerConfig};

/// Intensity profile across the channel at one depth.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Profile {
    /// Requested depth (mm).
    pub depth_mm: f64,
    /// Fractional crop row the profile was sampled at.
    pub row: f64,
    /// Cross-channel positions (mm), 0 at the channel centre.
    pub positions_mm: Vec<f64>,
    /// Band-averaged raw intensities.
    pub intensity: Vec<f64>,
    /// Smoothed intensities, when smoothing is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothed: Option<Vec<f64>>,
    /// Baseline of the analyzed curve, removed before peak evaluation.
    pub baseline: f64,
    /// Baseline-subtracted peak of the analyzed curve.
    pub peak: f64,
    pub peak_position_mm: f64,
    /// Full width at half maximum of the unsmoothed curve (mm).
    pub fwhm_mm: Option<f64>,
    /// FWHM of the smoothed curve (mm), broadened by the smoothing kernel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothed_fwhm_mm: Option<f64>,
    /// Peak fell below the dropout fraction of the reference peak.
    pub dropout: bool,
}

impl Profile {
    /// The curve peak and dropout were measured on: smoothed if present, raw
    /// otherwise.
    pub fn analyzed(&self) -> &[f64] {
        self.smoothed.as_deref().unwrap_or(&self.intensity)
    }
}

/// Build a profile from sampled intensities and evaluate its metrics.
pub(crate) fn build_profile(
    depth_mm: f64,
    row: f64,
    positions_mm: Vec<f64>,
    intensity: Vec<f64>,
    reference_peak: f64,
    config: &DepthAnalyzerConfig,
) -> Profile {
    let smoothed = config
        .smoothing
        .then(|| gaussian_smooth(&intensity, config.smoothing_sigma));
    let analyzed = smoothed.as_deref().unwrap_or(&intensity);
    let baseline = baseline_of(analyzed, config.baseline);
    let (peak_idx, peak_val) = argmax(analyzed).unwrap_or((0, baseline));
    let peak = peak_val - baseline;

    // Width comes from the raw line; the smoothing kernel would add its own
    // width in quadrature.
    let fwhm_mm = fwhm(
        &positions_mm,
        &intensity,
        baseline_of(&intensity, config.baseline),
    );
    let smoothed_fwhm_mm = smoothed
        .as_deref()
        .and_then(|s| fwhm(&positions_mm, s, baseline));

    Profile {
        depth_mm,
        row,
        peak_position_mm: positions_mm.get(peak_idx).copied().unwrap_or(0.0),
        dropout: is_dropout(peak, reference_peak, config.dropout_fraction),
        positions_mm,
        intensity,
        smoothed,
        baseline,
        peak,
        fwhm_mm,
        smoothed_fwhm_mm,
    }
}

/// Signal at `peak` has dropped out relative to `reference_peak`.
///
/// A non-positive reference means the channel carries no signal at all.
pub fn is_dropout(peak: f64, reference_peak: f64, fraction: f64) -> bool {
    !(reference_peak > 0.0) || peak < fraction * reference_peak
}

pub(crate) fn baseline_of(values: &[f64], mode: BaselineMode) -> f64 {
    match mode {
        BaselineMode::None => 0.0,
        BaselineMode::Minimum => values.iter().copied().reduce(f64::min).unwrap_or(0.0),
    }
}

/// Index and value of the first maximum.
fn argmax(values: &[f64]) -> Option<(usize, f64)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
}

/// Full width at half maximum above `baseline`.
///
/// Half-maximum crossings are located by walking outward from the peak and
/// interpolating linearly between the bracketing samples. Returns `None` when
/// the curve has no positive peak or does not fall below half maximum on both
/// sides.
pub fn fwhm(positions: &[f64], values: &[f64], baseline: f64) -> Option<f64> {
    debug_assert_eq!(positions.len(), values.len());
    let (peak_idx, peak_val) = argmax(values)?;
    if !(peak_val > baseline) {
        return None;
    }
    let half = baseline + 0.5 * (peak_val - baseline);
    let cross = |i: usize, j: usize| {
        let (vi, vj) = (values[i], values[j]);
        let f = if vj != vi { (half - vi) / (vj - vi) } else { 0.5 };
        positions[i] + f * (positions[j] - positions[i])
    };

    let left = (1..=peak_idx)
        .rev()
        .find(|&i| values[i - 1] < half)
        .map(|i| cross(i - 1, i))?;
    let right = (peak_idx..values.len() - 1)
        .find(|&i| values[i + 1] < half)
        .map(|i| cross(i, i + 1))?;
    Some((right - left).abs())
}

/// Gaussian smoothing with edge replication.
pub fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    let n = values.len();
    if n == 0 || !(sigma > 0.0) {
        return values.to_vec();
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-(k * k) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();
    let last = n as isize - 1;
    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .zip(-radius..=radius)
                .map(|(w, k)| w * values[(i + k).clamp(0, last) as usize])
                .sum::<f64>()
                / norm
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gaussian(positions: &[f64], sigma: f64, amp: f64) -> Vec<f64> {
        positions
            .iter()
            .map(|x| amp * (-(x * x) / (2.0 * sigma * sigma)).exp())
            .collect()
    }

    fn grid(n: usize, step: f64) -> Vec<f64> {
        let c = (n - 1) as f64 / 2.0;
        (0..n).map(|i| (i as f64 - c) * step).collect()
    }

    fn unsmoothed() -> DepthAnalyzerConfig {
        DepthAnalyzerConfig {
            smoothing: false,
            ..Default::default()
        }
    }

    #[test]
    fn fwhm_of_gaussian_matches_analytic_width() {
        let x = grid(81, 0.1);
        let sigma = 0.5;
        let y = gaussian(&x, sigma, 100.0);
        let w = fwhm(&x, &y, 0.0).unwrap();
        assert_relative_eq!(w, 2.0 * (2.0 * 2f64.ln()).sqrt() * sigma, max_relative = 0.01);
    }

    #[test]
    fn fwhm_of_triangle_is_exact() {
        let x: Vec<f64> = (0..21).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| (10.0 - (v - 10.0).abs()).max(0.0)).collect();
        assert_relative_eq!(fwhm(&x, &y, 0.0).unwrap(), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn fwhm_respects_baseline() {
        let x: Vec<f64> = (0..21).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|v| 50.0 + (10.0 - (v - 10.0).abs()).max(0.0))
            .collect();
        assert_relative_eq!(fwhm(&x, &y, 50.0).unwrap(), 10.0, epsilon = 1e-12);
        assert!(fwhm(&x, &y, 0.0).is_none(), "never drops below 30");
    }

    #[test]
    fn fwhm_missing_crossing_is_none() {
        let x = [0.0, 1.0, 2.0, 3.0];
        assert!(fwhm(&x, &[10.0, 9.0, 4.0, 1.0], 0.0).is_none());
        assert!(fwhm(&x, &[0.0; 4], 0.0).is_none());
    }

    #[test]
    fn dropout_flags_one_percent_not_fifty() {
        let x = grid(61, 0.1);
        let reference = 1000.0;
        let cfg = unsmoothed();
        let dim = build_profile(3.0, 0.0, x.clone(), gaussian(&x, 0.4, 10.0), reference, &cfg);
        assert!(dim.dropout);
        let half = build_profile(3.0, 0.0, x.clone(), gaussian(&x, 0.4, 500.0), reference, &cfg);
        assert!(!half.dropout);
        assert!(is_dropout(1.0, 0.0, 0.02));
    }

    #[test]
    fn smoothing_leaves_reported_fwhm_unbroadened() {
        let x = grid(61, 1.0);
        let y = gaussian(&x, 3.0, 200.0);
        let cfg = DepthAnalyzerConfig {
            smoothing: true,
            smoothing_sigma: 2.0,
            ..Default::default()
        };
        let p = build_profile(2.0, 5.0, x, y, 200.0, &cfg);
        assert!(p.smoothed.is_some());
        let raw = p.fwhm_mm.unwrap();
        let smooth = p.smoothed_fwhm_mm.unwrap();
        assert_relative_eq!(raw, 2.3548 * 3.0, max_relative = 0.01);
        // Convolution of Gaussians: sigma' = sqrt(3^2 + 2^2).
        assert_relative_eq!(smooth, 2.3548 * 13f64.sqrt(), max_relative = 0.02);
        assert_eq!(p.analyzed(), p.smoothed.as_deref().unwrap());
        assert_eq!(p.peak_position_mm, 0.0);
    }

    #[test]
    fn unsmoothed_profile_has_no_smoothed_width() {
        let x = grid(61, 1.0);
        let p = build_profile(2.0, 5.0, x.clone(), gaussian(&x, 3.0, 200.0), 200.0, &unsmoothed());
        assert!(p.smoothed.is_none());
        assert!(p.smoothed_fwhm_mm.is_none());
        assert_relative_eq!(p.fwhm_mm.unwrap(), 2.3548 * 3.0, max_relative = 0.01);
    }

    #[test]
    fn smoothing_preserves_constant_signal() {
        let s = gaussian_smooth(&[4.0; 9], 1.5);
        assert!(s.iter().all(|v| (v - 4.0).abs() < 1e-12));
    }
}
