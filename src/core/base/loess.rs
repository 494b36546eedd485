use rayon::prelude::*;

use crate::assert_same_len;
use crate::error::{Result, ScError};

///////////
// Loess //
///////////

/// Polynomial degree of the local fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoessDegree {
    Linear,
    Quadratic,
}

impl LoessDegree {
    /// Map the R-style numeric degree to the enum.
    pub fn from_degree(degree: usize) -> Option<Self> {
        match degree {
            1 => Some(LoessDegree::Linear),
            2 => Some(LoessDegree::Quadratic),
            _ => None,
        }
    }
}

/// Tricube-weighted local polynomial regression on one predictor.
///
/// Used to model the mean-variance trend of the variable feature selection:
/// log10 variance is regressed on log10 mean across genes, and the fitted
/// value at each gene gives its expected technical variance.
#[derive(Debug, Clone)]
pub struct Loess {
    span: f64,
    degree: LoessDegree,
}

/// Fitted loess curve.
///
/// Keeps the sorted design points so fitted values at new positions can be
/// produced after the fit.
///
/// ### Fields
///
/// * `fitted` - Fitted value per input point, in input order.
#[derive(Debug, Clone)]
pub struct LoessFit {
    pub fitted: Vec<f64>,
    points: Vec<(f64, f64)>,
    n_neighbours: usize,
    degree: LoessDegree,
}

impl Loess {
    /// Create a new smoother.
    ///
    /// ### Params
    ///
    /// * `span` - Fraction of points entering each local fit, in (0, 1].
    /// * `degree` - Local polynomial degree, 1 or 2.
    pub fn new(span: f64, degree: usize) -> Result<Self> {
        if !(span > 0.0 && span <= 1.0) {
            return Err(ScError::InvalidParameter(format!(
                "loess span must be in (0, 1], got {span}"
            )));
        }
        let degree = LoessDegree::from_degree(degree).ok_or_else(|| {
            ScError::InvalidParameter(format!("loess degree must be 1 or 2, got {degree}"))
        })?;

        Ok(Self { span, degree })
    }

    /// Fit the curve to the given points.
    ///
    /// Non-finite points are dropped from the design; their fitted value is
    /// still produced from the neighbouring finite points.
    ///
    /// ### Params
    ///
    /// * `x` - Predictor values.
    /// * `y` - Response values.
    ///
    /// ### Returns
    ///
    /// The fit, or `ScError::EmptyResult` when no finite point remains.
    pub fn fit(&self, x: &[f64], y: &[f64]) -> Result<LoessFit> {
        assert_same_len!(x, y);

        let mut points: Vec<(f64, f64)> = x
            .iter()
            .zip(y.iter())
            .filter(|(xi, yi)| xi.is_finite() && yi.is_finite())
            .map(|(&xi, &yi)| (xi, yi))
            .collect();

        if points.is_empty() {
            return Err(ScError::EmptyResult(
                "no finite points available for the loess fit".into(),
            ));
        }

        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n_neighbours = ((points.len() as f64) * self.span).max(1.0) as usize;
        let degree = self.degree;

        let fitted: Vec<f64> = x
            .par_iter()
            .map(|&xi| local_fit(&points, xi, n_neighbours, degree))
            .collect();

        Ok(LoessFit {
            fitted,
            points,
            n_neighbours,
            degree,
        })
    }
}

impl LoessFit {
    /// Fitted value at an arbitrary position.
    pub fn predict(&self, x: f64) -> f64 {
        local_fit(&self.points, x, self.n_neighbours, self.degree)
    }
}

/////////////
// Helpers //
/////////////

/// Fit the local polynomial around `target_x` over its `k` nearest design
/// points.
fn local_fit(points: &[(f64, f64)], target_x: f64, k: usize, degree: LoessDegree) -> f64 {
    if !target_x.is_finite() {
        return f64::NAN;
    }

    let neighbours = nearest_neighbours(points, target_x, k);

    let max_dist = neighbours
        .iter()
        .map(|&i| (points[i].0 - target_x).abs())
        .fold(0.0_f64, f64::max);

    // all neighbours sit on the target position
    if max_dist == 0.0 {
        let sum: f64 = neighbours.iter().map(|&i| points[i].1).sum();
        return sum / neighbours.len() as f64;
    }

    let mut xs = Vec::with_capacity(neighbours.len());
    let mut ys = Vec::with_capacity(neighbours.len());
    let mut ws = Vec::with_capacity(neighbours.len());

    for &i in &neighbours {
        let (nx, ny) = points[i];
        xs.push(nx);
        ys.push(ny);
        ws.push(tricube((nx - target_x).abs() / max_dist));
    }

    match degree {
        LoessDegree::Linear => weighted_linear(target_x, &xs, &ys, &ws),
        LoessDegree::Quadratic => weighted_quadratic(target_x, &xs, &ys, &ws),
    }
}

/// Indices of the `k` design points closest to `target_x`.
///
/// The points are sorted by x, so a binary search gives the insertion point
/// and the neighbourhood grows outwards from there.
fn nearest_neighbours(points: &[(f64, f64)], target_x: f64, k: usize) -> Vec<usize> {
    let n = points.len();
    if k >= n {
        return (0..n).collect();
    }

    let insert = points
        .binary_search_by(|probe| probe.0.total_cmp(&target_x))
        .unwrap_or_else(|pos| pos);

    let mut l = insert;
    let mut r = insert;
    let mut neighbours = Vec::with_capacity(k);

    for _ in 0..k {
        let left_dist = if l > 0 {
            (points[l - 1].0 - target_x).abs()
        } else {
            f64::INFINITY
        };
        let right_dist = if r < n {
            (points[r].0 - target_x).abs()
        } else {
            f64::INFINITY
        };

        if left_dist <= right_dist && l > 0 {
            l -= 1;
            neighbours.push(l);
        } else if r < n {
            neighbours.push(r);
            r += 1;
        } else {
            break;
        }
    }

    neighbours
}

/// Tricube kernel: (1 - |u|^3)^3 for |u| < 1, 0 otherwise.
#[inline]
fn tricube(u: f64) -> f64 {
    if u >= 1.0 {
        0.0
    } else {
        let t = 1.0 - u * u * u;
        t * t * t
    }
}

/// Weighted least-squares line through the neighbourhood.
fn weighted_linear(target_x: f64, x: &[f64], y: &[f64], w: &[f64]) -> f64 {
    let mut w_sum = 0.0;
    let mut wx_sum = 0.0;
    let mut wy_sum = 0.0;
    let mut wxx_sum = 0.0;
    let mut wxy_sum = 0.0;

    for ((&xi, &yi), &wi) in x.iter().zip(y.iter()).zip(w.iter()) {
        w_sum += wi;
        wx_sum += wi * xi;
        wy_sum += wi * yi;
        wxx_sum += wi * xi * xi;
        wxy_sum += wi * xi * yi;
    }

    if w_sum == 0.0 {
        return y.iter().sum::<f64>() / y.len() as f64;
    }

    let x_mean = wx_sum / w_sum;
    let y_mean = wy_sum / w_sum;

    let denominator = wxx_sum - w_sum * x_mean * x_mean;
    if denominator.abs() < 1e-12 {
        return y_mean;
    }

    let slope = (wxy_sum - w_sum * x_mean * y_mean) / denominator;
    y_mean + slope * (target_x - x_mean)
}

/// Weighted least-squares parabola through the neighbourhood; falls back to
/// the linear fit when the normal equations are singular or the
/// neighbourhood is too small.
fn weighted_quadratic(target_x: f64, x: &[f64], y: &[f64], w: &[f64]) -> f64 {
    if x.len() < 3 {
        return weighted_linear(target_x, x, y, w);
    }

    let mut a = [[0.0_f64; 3]; 3];
    let mut b = [0.0_f64; 3];

    for ((&xi, &yi), &wi) in x.iter().zip(y.iter()).zip(w.iter()) {
        let xi2 = xi * xi;

        a[0][0] += wi;
        a[0][1] += wi * xi;
        a[0][2] += wi * xi2;
        a[1][2] += wi * xi * xi2;
        a[2][2] += wi * xi2 * xi2;

        b[0] += wi * yi;
        b[1] += wi * xi * yi;
        b[2] += wi * xi2 * yi;
    }

    a[1][0] = a[0][1];
    a[1][1] = a[0][2];
    a[2][0] = a[0][2];
    a[2][1] = a[1][2];

    match solve_3x3(&a, &b) {
        Some(c) => c[0] + c[1] * target_x + c[2] * target_x * target_x,
        None => weighted_linear(target_x, x, y, w),
    }
}

/// Gaussian elimination with partial pivoting for the 3x3 normal equations.
fn solve_3x3(a: &[[f64; 3]; 3], b: &[f64; 3]) -> Option<[f64; 3]> {
    let mut m = *a;
    let mut rhs = *b;

    for i in 0..3 {
        let mut pivot = i;
        for j in (i + 1)..3 {
            if m[j][i].abs() > m[pivot][i].abs() {
                pivot = j;
            }
        }
        if pivot != i {
            m.swap(i, pivot);
            rhs.swap(i, pivot);
        }
        if m[i][i].abs() < 1e-12 {
            return None;
        }
        for j in (i + 1)..3 {
            let factor = m[j][i] / m[i][i];
            for k in i..3 {
                m[j][k] -= factor * m[i][k];
            }
            rhs[j] -= factor * rhs[i];
        }
    }

    let mut solution = [0.0_f64; 3];
    for i in (0..3).rev() {
        solution[i] = rhs[i];
        for j in (i + 1)..3 {
            solution[i] -= m[i][j] * solution[j];
        }
        solution[i] /= m[i][i];
    }

    Some(solution)
}

///////////
// Tests //
///////////
