use ndarray::{Array1, Array2};

use crate::dataset::{ExtraVar, ZGrid};
use crate::math::interp::{edges_from_centers, regrid, InterpMode};
use crate::prelude::{StageError, StageResult, StreamItem, StreamTransform};

/// Regrids backscatter and the kept gridded variables onto the uniform
/// height grid `[zlim_low, zlim_high]` at `zres`. Each profile is
/// resampled independently, so the stage carries no state across chunks.
pub struct ZSampleStage {
    mode: InterpMode,
    centers: Vec<f64>,
    edges: Vec<f64>,
}

impl ZSampleStage {
    pub fn new(mode: InterpMode, zlim: [f64; 2], zres: f64) -> StageResult<Self> {
        if !(zres > 0.0) || zlim[1] <= zlim[0] {
            return Err(StageError::Config(format!(
                "invalid height grid: zlim {:?}, zres {}",
                zlim, zres
            )));
        }
        let levels = ((zlim[1] - zlim[0]) / zres).round() as usize;
        if levels == 0 {
            return Err(StageError::Config(
                "height limits span less than one bin".into(),
            ));
        }
        let centers = (0..levels)
            .map(|l| zlim[0] + (l as f64 + 0.5) * zres)
            .collect();
        let edges = (0..=levels).map(|l| zlim[0] + l as f64 * zres).collect();
        Ok(Self {
            mode,
            centers,
            edges,
        })
    }

    fn regrid_var(&self, d_zfull: &ZGrid, var: &Array2<f64>) -> Array2<f64> {
        let n = var.nrows();
        let mut out = Array2::from_elem((n, self.centers.len()), f64::NAN);
        let common = match d_zfull {
            ZGrid::Common(z) => Some(z.to_vec()),
            ZGrid::PerProfile(_) => None,
        };
        for i in 0..n {
            let native: Vec<f64> = match &common {
                Some(z) => z.clone(),
                None => d_zfull.profile(i).to_vec(),
            };
            let values: Vec<f64> = var.row(i).to_vec();
            let row = regrid(self.mode, &native, &values, &self.centers, &self.edges);
            out.row_mut(i).assign(&row);
        }
        out
    }
}

impl StreamTransform for ZSampleStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        let mut d = match item {
            StreamItem::Chunk(d) => d,
            StreamItem::End => return Ok(vec![StreamItem::End]),
        };
        if d.is_empty() {
            return Ok(Vec::new());
        }
        d.backscatter = self.regrid_var(&d.zfull, &d.backscatter);
        d.backscatter_mol = d
            .backscatter_mol
            .as_ref()
            .map(|mol| self.regrid_var(&d.zfull, mol));
        d.backscatter_sd = d
            .backscatter_sd
            .as_ref()
            .map(|sd| self.regrid_var(&d.zfull, sd));
        let regridded: Vec<(String, ExtraVar)> = d
            .extra
            .iter()
            .filter_map(|(name, var)| match var {
                ExtraVar::Gridded(v) => Some((
                    name.clone(),
                    ExtraVar::Gridded(self.regrid_var(&d.zfull, v)),
                )),
                ExtraVar::Profile(_) => None,
            })
            .collect();
        for (name, var) in regridded {
            d.extra.insert(name, var);
        }
        d.zfull = ZGrid::Common(Array1::from(self.centers.clone()));
        Ok(vec![StreamItem::Chunk(d)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::chunk::testutil::chunk;

    fn first_chunk(items: Vec<StreamItem>) -> crate::dataset::ProfileChunk {
        match items.into_iter().next().unwrap() {
            StreamItem::Chunk(d) => d,
            StreamItem::End => panic!("expected a chunk"),
        }
    }

    #[test]
    fn target_grid_has_expected_levels() {
        let mut stage =
            ZSampleStage::new(InterpMode::AreaLinear, [0.0, 15000.0], 50.0).unwrap();
        let d = chunk(0.0, 2, 30.0 / 86400.0, 50.0, 100);
        let out = first_chunk(stage.push(StreamItem::Chunk(d)).unwrap());
        assert_eq!(out.levels(), 300);
        match &out.zfull {
            ZGrid::Common(z) => {
                assert_eq!(z[0], 25.0);
                assert_eq!(z[299], 14975.0);
            }
            ZGrid::PerProfile(_) => panic!("expected a common grid"),
        }
    }

    #[test]
    fn identical_grids_pass_values_through() {
        // native grid equals the target grid, so area_block is exact
        let mut stage = ZSampleStage::new(InterpMode::AreaBlock, [0.0, 500.0], 50.0).unwrap();
        let mut d = chunk(0.0, 1, 30.0 / 86400.0, 50.0, 10);
        d.backscatter[[0, 3]] = 4.2e-6;
        let out = first_chunk(stage.push(StreamItem::Chunk(d)).unwrap());
        assert!((out.backscatter[[0, 3]] - 4.2e-6).abs() < 1e-18);
    }

    #[test]
    fn bins_above_native_range_are_missing() {
        // native profile reaches 500 m, target grid reaches 1000 m
        let mut stage = ZSampleStage::new(InterpMode::AreaBlock, [0.0, 1000.0], 50.0).unwrap();
        let d = chunk(0.0, 1, 30.0 / 86400.0, 50.0, 10);
        let out = first_chunk(stage.push(StreamItem::Chunk(d)).unwrap());
        assert!(out.backscatter[[0, 5]].is_finite());
        assert!(out.backscatter[[0, 15]].is_nan());
    }

    #[test]
    fn per_profile_grids_are_resampled_independently() {
        let mut stage = ZSampleStage::new(InterpMode::Linear, [0.0, 500.0], 50.0).unwrap();
        let mut d = chunk(0.0, 2, 30.0 / 86400.0, 50.0, 10);
        // second profile's bins sit 10 m higher
        let mut z = Array2::zeros((2, 10));
        for i in 0..2 {
            for l in 0..10 {
                z[[i, l]] = (l as f64 + 0.5) * 50.0 + if i == 1 { 10.0 } else { 0.0 };
            }
        }
        d.zfull = ZGrid::PerProfile(z);
        let out = first_chunk(stage.push(StreamItem::Chunk(d)).unwrap());
        assert_eq!(out.levels(), 10);
        // profile 0 covers the first target center, profile 1 starts above it
        assert!((out.backscatter[[0, 0]] - 1e-6).abs() < 1e-18);
        assert!(out.backscatter[[1, 0]].is_nan());
        assert!((out.backscatter[[1, 1]] - 1e-6).abs() < 1e-18);
        assert!(out.zfull.is_common());
    }

    #[test]
    fn kept_gridded_variables_are_resampled() {
        let mut stage = ZSampleStage::new(InterpMode::AreaBlock, [0.0, 500.0], 50.0).unwrap();
        let mut d = chunk(0.0, 1, 30.0 / 86400.0, 50.0, 10);
        d.extra.insert(
            "input_signal".to_string(),
            ExtraVar::Gridded(Array2::from_elem((1, 10), 3.0)),
        );
        let out = first_chunk(stage.push(StreamItem::Chunk(d)).unwrap());
        match out.extra.get("input_signal") {
            Some(ExtraVar::Gridded(v)) => {
                assert_eq!(v.ncols(), 10);
                assert!((v[[0, 4]] - 3.0).abs() < 1e-12);
            }
            other => panic!("kept variable lost: {:?}", other),
        }
    }
}
