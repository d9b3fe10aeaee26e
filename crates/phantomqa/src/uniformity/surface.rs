//! Least-squares 2D polynomial surfaces.

use nalgebra::{DMatrix, DVector};

use crate::error::{QalError, Result};

/// Relative singular-value floor below which the design matrix is rank
/// deficient.
const RANK_TOL: f64 = 1e-10;

/// Number of monomials `x^i y^j` with `i + j <= order`.
pub fn n_terms(order: usize) -> usize {
    (order + 1) * (order + 2) / 2
}

/// Exponents `(i, j)` ordered by total degree, then by descending power of x.
fn exponents(order: usize) -> Vec<(i32, i32)> {
    (0..=order as i32)
        .flat_map(|d| (0..=d).rev().map(move |i| (i, d - i)))
        .collect()
}

/// Polynomial in normalized field coordinates.
///
/// A point `(x, y)` in millimetres is evaluated at
/// `((x - center_x) * scale, (y - center_y) * scale)`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PolynomialSurface {
    pub order: usize,
    pub center: [f64; 2],
    pub scale: f64,
    /// One coefficient per monomial, constant term first.
    pub coefficients: Vec<f64>,
}

impl PolynomialSurface {
    /// Fit `values` at `points` by least squares (SVD).
    pub fn fit(points: &[[f64; 2]], values: &[f64], order: usize) -> Result<Self> {
        let m = n_terms(order);
        if points.len() != values.len() || points.len() < m {
            return Err(QalError::invalid(format!(
                "order-{order} surface needs at least {m} samples, got {}",
                points.len()
            )));
        }
        let (center, scale) = normalization(points);
        let exps = exponents(order);

        let n = points.len();
        let mut a = DMatrix::<f64>::zeros(n, m);
        for (r, p) in points.iter().enumerate() {
            let u = (p[0] - center[0]) * scale;
            let v = (p[1] - center[1]) * scale;
            for (c, &(i, j)) in exps.iter().enumerate() {
                a[(r, c)] = u.powi(i) * v.powi(j);
            }
        }
        let b = DVector::from_column_slice(values);

        let svd = a.svd(true, true);
        let s_max = svd.singular_values.max();
        let rank = svd
            .singular_values
            .iter()
            .filter(|&&s| s > RANK_TOL * s_max)
            .count();
        if !(s_max > 0.0) || rank < m {
            return Err(QalError::Fit(format!(
                "well positions do not constrain an order-{order} surface (rank {rank} of {m})"
            )));
        }
        let x = svd
            .solve(&b, RANK_TOL * s_max)
            .map_err(|e| QalError::Fit(e.to_string()))?;
        let coefficients: Vec<f64> = x.iter().copied().collect();
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(QalError::Fit("non-finite surface coefficients".to_string()));
        }

        Ok(Self {
            order,
            center,
            scale,
            coefficients,
        })
    }

    /// Surface value at a field position (mm).
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let u = (x - self.center[0]) * self.scale;
        let v = (y - self.center[1]) * self.scale;
        exponents(self.order)
            .iter()
            .zip(&self.coefficients)
            .map(|(&(i, j), c)| c * u.powi(i) * v.powi(j))
            .sum()
    }
}

/// Centroid and isotropic scale putting the mean distance at sqrt(2).
fn normalization(points: &[[f64; 2]]) -> ([f64; 2], f64) {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| (p[0] - mx).hypot(p[1] - my))
        .sum::<f64>()
        / n;
    let scale = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    ([mx, my], scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_points(n: usize, step: f64) -> Vec<[f64; 2]> {
        (0..n)
            .flat_map(|r| (0..n).map(move |c| [c as f64 * step, r as f64 * step]))
            .collect()
    }

    #[test]
    fn term_counts() {
        assert_eq!(n_terms(1), 3);
        assert_eq!(n_terms(2), 6);
        assert_eq!(n_terms(4), 15);
        assert_eq!(exponents(2), vec![(0, 0), (1, 0), (0, 1), (2, 0), (1, 1), (0, 2)]);
    }

    #[test]
    fn recovers_exact_quadratic() {
        let pts = grid_points(4, 5.0);
        let f = |x: f64, y: f64| 100.0 - 0.5 * (x - 7.0).powi(2) - 0.3 * (y - 8.0).powi(2) + 0.1 * x * y;
        let values: Vec<f64> = pts.iter().map(|p| f(p[0], p[1])).collect();
        let s = PolynomialSurface::fit(&pts, &values, 2).unwrap();
        for &(x, y) in &[(0.0, 0.0), (7.5, 3.2), (20.0, 20.0)] {
            assert_relative_eq!(s.evaluate(x, y), f(x, y), epsilon = 1e-8);
        }
    }

    #[test]
    fn collinear_points_are_rank_deficient() {
        let pts: Vec<[f64; 2]> = (0..8).map(|i| [i as f64, 2.0 * i as f64]).collect();
        let values = vec![1.0; 8];
        let err = PolynomialSurface::fit(&pts, &values, 1).unwrap_err();
        assert!(matches!(err, QalError::Fit(_)));
    }

    #[test]
    fn too_few_samples_is_invalid_input() {
        let pts = grid_points(2, 1.0);
        let err = PolynomialSurface::fit(&pts, &[1.0; 4], 2).unwrap_err();
        assert!(matches!(err, QalError::InvalidInput(_)));
    }
}
