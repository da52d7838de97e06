//! Single-profile regridding onto a uniform target grid.
//!
//! Bins are left-closed, right-open. Target bins with no native coverage
//! are NaN, never zero, so missing data survives resampling.

use ndarray::Array1;

use crate::prelude::{StageError, StageResult};

/// Vertical interpolation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpMode {
    /// Area-weighting with block (constant per bin) interpolation.
    AreaBlock,
    /// Area-weighting with linear interpolation between bin centers.
    AreaLinear,
    /// Simple linear interpolation of bin centers.
    Linear,
}

impl InterpMode {
    pub fn from_name(name: &str) -> StageResult<Self> {
        match name {
            "area_block" => Ok(Self::AreaBlock),
            "area_linear" => Ok(Self::AreaLinear),
            "linear" => Ok(Self::Linear),
            other => Err(StageError::Config(format!(
                "invalid interpolation method: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AreaBlock => "area_block",
            Self::AreaLinear => "area_linear",
            Self::Linear => "linear",
        }
    }
}

/// Bin edges from bin centers: midpoints between neighbors, extended half
/// a bin at each end. A single center gets a unit-width bin.
pub fn edges_from_centers(centers: &[f64]) -> Vec<f64> {
    let n = centers.len();
    match n {
        0 => Vec::new(),
        1 => vec![centers[0] - 0.5, centers[0] + 0.5],
        _ => {
            let mut edges = Vec::with_capacity(n + 1);
            edges.push(centers[0] - (centers[1] - centers[0]) / 2.0);
            for i in 1..n {
                edges.push((centers[i - 1] + centers[i]) / 2.0);
            }
            edges.push(centers[n - 1] + (centers[n - 1] - centers[n - 2]) / 2.0);
            edges
        }
    }
}

/// Regrids one profile of `values` on `centers` onto the target grid.
pub fn regrid(
    mode: InterpMode,
    centers: &[f64],
    values: &[f64],
    target_centers: &[f64],
    target_edges: &[f64],
) -> Array1<f64> {
    match mode {
        InterpMode::Linear => linear_point(centers, values, target_centers),
        InterpMode::AreaBlock => {
            let edges = edges_from_centers(centers);
            area_block(&edges, values, target_edges)
        }
        InterpMode::AreaLinear => {
            let edges = edges_from_centers(centers);
            area_linear(centers, &edges, values, target_edges)
        }
    }
}

/// Point interpolation of bin centers; NaN outside the native center range
/// or next to a missing native value.
pub fn linear_point(centers: &[f64], values: &[f64], target_centers: &[f64]) -> Array1<f64> {
    let n = centers.len();
    let mut out = Array1::from_elem(target_centers.len(), f64::NAN);
    if n == 0 {
        return out;
    }
    for (k, &x) in target_centers.iter().enumerate() {
        if x < centers[0] || x > centers[n - 1] {
            continue;
        }
        let j = match centers.binary_search_by(|c| c.total_cmp(&x)) {
            Ok(j) => {
                out[k] = values[j];
                continue;
            }
            Err(j) => j,
        };
        // x lies strictly between centers[j - 1] and centers[j]
        let (x0, x1) = (centers[j - 1], centers[j]);
        let (v0, v1) = (values[j - 1], values[j]);
        if v0.is_finite() && v1.is_finite() {
            out[k] = v0 + (v1 - v0) * (x - x0) / (x1 - x0);
        }
    }
    out
}

/// Mass-conserving resampling treating each native bin as a constant-value
/// interval; overlap with missing native bins counts as no coverage.
pub fn area_block(native_edges: &[f64], values: &[f64], target_edges: &[f64]) -> Array1<f64> {
    let nbins = values.len();
    let nout = target_edges.len().saturating_sub(1);
    let mut out = Array1::from_elem(nout, f64::NAN);
    let mut j0 = 0usize;
    for k in 0..nout {
        let (a, b) = (target_edges[k], target_edges[k + 1]);
        while j0 < nbins && native_edges[j0 + 1] <= a {
            j0 += 1;
        }
        let mut acc = 0.0;
        let mut covered = 0.0;
        let mut j = j0;
        while j < nbins && native_edges[j] < b {
            let lo = a.max(native_edges[j]);
            let hi = b.min(native_edges[j + 1]);
            if hi > lo && values[j].is_finite() {
                acc += (hi - lo) * values[j];
                covered += hi - lo;
            }
            j += 1;
        }
        if covered > 0.0 {
            out[k] = acc / covered;
        }
    }
    out
}

/// Mass-conserving resampling of the piecewise-linear profile through the
/// native bin centers, extended as constants to the outermost bin edges.
pub fn area_linear(
    centers: &[f64],
    native_edges: &[f64],
    values: &[f64],
    target_edges: &[f64],
) -> Array1<f64> {
    let n = centers.len();
    let nout = target_edges.len().saturating_sub(1);
    let mut out = Array1::from_elem(nout, f64::NAN);
    if n == 0 {
        return out;
    }
    // Piecewise-linear segments (x0, x1, v0, v1); segments touching a
    // missing node are dropped, leaving a coverage gap.
    let mut segments: Vec<(f64, f64, f64, f64)> = Vec::with_capacity(n + 1);
    if values[0].is_finite() {
        segments.push((native_edges[0], centers[0], values[0], values[0]));
    }
    for j in 1..n {
        if values[j - 1].is_finite() && values[j].is_finite() {
            segments.push((centers[j - 1], centers[j], values[j - 1], values[j]));
        }
    }
    if values[n - 1].is_finite() {
        segments.push((centers[n - 1], native_edges[n], values[n - 1], values[n - 1]));
    }
    let mut s0 = 0usize;
    for k in 0..nout {
        let (a, b) = (target_edges[k], target_edges[k + 1]);
        while s0 < segments.len() && segments[s0].1 <= a {
            s0 += 1;
        }
        let mut acc = 0.0;
        let mut covered = 0.0;
        let mut s = s0;
        while s < segments.len() && segments[s].0 < b {
            let (x0, x1, v0, v1) = segments[s];
            let lo = a.max(x0);
            let hi = b.min(x1);
            if hi > lo {
                let value_at = |x: f64| {
                    if x1 > x0 {
                        v0 + (v1 - v0) * (x - x0) / (x1 - x0)
                    } else {
                        v0
                    }
                };
                acc += (value_at(lo) + value_at(hi)) / 2.0 * (hi - lo);
                covered += hi - lo;
            }
            s += 1;
        }
        if covered > 0.0 {
            out[k] = acc / covered;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integral(values: &Array1<f64>, edges: &[f64]) -> f64 {
        values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| v * (edges[k + 1] - edges[k]))
            .sum()
    }

    #[test]
    fn from_name_rejects_unknown_method() {
        assert!(InterpMode::from_name("cubic").is_err());
        assert_eq!(
            InterpMode::from_name("area_linear").unwrap(),
            InterpMode::AreaLinear
        );
    }

    #[test]
    fn edges_are_midpoints_with_half_bin_extension() {
        let edges = edges_from_centers(&[25.0, 75.0, 125.0]);
        assert_eq!(edges, vec![0.0, 50.0, 100.0, 150.0]);
    }

    #[test]
    fn linear_reproduces_native_centers() {
        let centers = [25.0, 75.0, 125.0];
        let values = [1.0, 3.0, 5.0];
        let out = linear_point(&centers, &values, &centers);
        assert_eq!(out.to_vec(), values.to_vec());
    }

    #[test]
    fn linear_is_nan_outside_native_range() {
        let out = linear_point(&[25.0, 75.0], &[1.0, 2.0], &[0.0, 50.0, 100.0]);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 1.5);
        assert!(out[2].is_nan());
    }

    #[test]
    fn area_block_conserves_mass() {
        let native_edges = [0.0, 10.0, 20.0, 30.0];
        let values = [1.0, 2.0, 3.0];
        let target_edges = [0.0, 15.0, 30.0];
        let out = area_block(&native_edges, &values, &target_edges);
        let native: f64 = values
            .iter()
            .enumerate()
            .map(|(j, v)| v * (native_edges[j + 1] - native_edges[j]))
            .sum();
        assert!((integral(&out, &target_edges) - native).abs() < 1e-9);
    }

    #[test]
    fn area_linear_conserves_mass_on_uniform_grid() {
        let centers = [5.0, 15.0, 25.0, 35.0];
        let native_edges = edges_from_centers(&centers);
        let values = [2.0, 4.0, 1.0, 3.0];
        let target_edges = [0.0, 8.0, 16.0, 24.0, 32.0, 40.0];
        let out = area_linear(&centers, &native_edges, &values, &target_edges);
        let native: f64 = values.iter().map(|v| v * 10.0).sum();
        assert!((integral(&out, &target_edges) - native).abs() < 1e-9);
    }

    #[test]
    fn uncovered_target_bins_are_nan_not_zero() {
        let native_edges = [0.0, 10.0];
        let out = area_block(&native_edges, &[5.0], &[0.0, 10.0, 20.0]);
        assert_eq!(out[0], 5.0);
        assert!(out[1].is_nan());
    }

    #[test]
    fn missing_native_bins_leave_no_data() {
        let native_edges = [0.0, 10.0, 20.0];
        let out = area_block(&native_edges, &[f64::NAN, 2.0], &[0.0, 10.0, 20.0]);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 2.0);
    }
}
