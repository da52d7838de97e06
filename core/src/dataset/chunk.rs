use std::collections::BTreeMap;

use ndarray::{concatenate, s, Array1, Array2, ArrayView1, Axis};

use crate::dataset::meta::VarMeta;
use crate::prelude::{StageError, StageResult};

/// Cloud mask bin states.
pub const MASK_MISSING: i8 = -1;
pub const MASK_CLEAR: i8 = 0;
pub const MASK_CLOUD: i8 = 1;

/// Tolerance for time-bound ordering checks, in days (about 0.1 ms).
const TIME_EPS: f64 = 1e-9;

/// Height grid of a chunk: either one grid shared by all profiles or a
/// per-profile grid (native instrument data before height resampling).
#[derive(Debug, Clone)]
pub enum ZGrid {
    Common(Array1<f64>),
    PerProfile(Array2<f64>),
}

impl ZGrid {
    pub fn levels(&self) -> usize {
        match self {
            ZGrid::Common(z) => z.len(),
            ZGrid::PerProfile(z) => z.ncols(),
        }
    }

    /// Heights for profile `i`.
    pub fn profile(&self, i: usize) -> ArrayView1<'_, f64> {
        match self {
            ZGrid::Common(z) => z.view(),
            ZGrid::PerProfile(z) => z.row(i),
        }
    }

    pub fn is_common(&self) -> bool {
        matches!(self, ZGrid::Common(_))
    }
}

/// A kept (`input_`-prefixed) variable riding through the pipeline.
#[derive(Debug, Clone)]
pub enum ExtraVar {
    Profile(Array1<f64>),
    Gridded(Array2<f64>),
}

/// Canonical in-memory representation of a contiguous batch of profiles.
///
/// All profile-dimensioned arrays share the `time` length; gridded arrays
/// are time x level. Missing data is NaN, never zero.
#[derive(Debug, Clone)]
pub struct ProfileChunk {
    pub time: Array1<f64>,
    pub time_bnds: Array2<f64>,
    pub zfull: ZGrid,
    pub altitude: Array1<f64>,
    pub lon: Array1<f64>,
    pub lat: Array1<f64>,
    pub backscatter: Array2<f64>,
    pub backscatter_mol: Option<Array2<f64>>,
    pub backscatter_sd: Option<Array2<f64>>,
    pub cloud_mask: Option<Array2<i8>>,
    pub cbh: Option<Array1<f64>>,
    pub lr: Option<Array1<f64>>,
    pub cloud_occurrence: Option<Array1<f64>>,
    pub n: Option<Array1<i64>>,
    pub extra: BTreeMap<String, ExtraVar>,
    pub meta: BTreeMap<String, VarMeta>,
}

impl ProfileChunk {
    /// Number of profiles.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Number of height bins.
    pub fn levels(&self) -> usize {
        self.zfull.levels()
    }

    /// Checks the chunk invariants: strictly increasing time, ordered and
    /// non-overlapping bounds containing the centers, consistent profile
    /// lengths, and monotonically increasing heights.
    pub fn validate(&self) -> StageResult<()> {
        let n = self.len();
        if self.time_bnds.nrows() != n || self.time_bnds.ncols() != 2 {
            return Err(StageError::InvalidInput(format!(
                "time_bnds shape {:?} does not match {} profiles",
                self.time_bnds.dim(),
                n
            )));
        }
        for i in 0..n {
            let t = self.time[i];
            let (t0, t1) = (self.time_bnds[[i, 0]], self.time_bnds[[i, 1]]);
            if !t.is_finite() || !t0.is_finite() || !t1.is_finite() {
                return Err(StageError::InvalidInput(format!(
                    "non-finite time at profile {}",
                    i
                )));
            }
            if t0 > t + TIME_EPS || t > t1 + TIME_EPS {
                return Err(StageError::InvalidInput(format!(
                    "time {} outside its bounds [{}, {}]",
                    t, t0, t1
                )));
            }
            if i > 0 {
                if self.time[i - 1] >= t {
                    return Err(StageError::InvalidInput(format!(
                        "time not strictly increasing at profile {}",
                        i
                    )));
                }
                if self.time_bnds[[i - 1, 1]] > t0 + TIME_EPS {
                    return Err(StageError::InvalidInput(format!(
                        "overlapping time bounds at profile {}",
                        i
                    )));
                }
            }
        }
        let levels = self.levels();
        if self.backscatter.dim() != (n, levels) {
            return Err(StageError::InvalidInput(format!(
                "backscatter shape {:?} does not match {} x {}",
                self.backscatter.dim(),
                n,
                levels
            )));
        }
        for (name, len) in [
            ("altitude", self.altitude.len()),
            ("lon", self.lon.len()),
            ("lat", self.lat.len()),
        ] {
            if len != n {
                return Err(StageError::InvalidInput(format!(
                    "{} length {} does not match {} profiles",
                    name, len, n
                )));
            }
        }
        if let ZGrid::PerProfile(z) = &self.zfull {
            if z.nrows() != n {
                return Err(StageError::InvalidInput(format!(
                    "per-profile zfull has {} rows for {} profiles",
                    z.nrows(),
                    n
                )));
            }
        }
        let zrows = if self.zfull.is_common() { 1 } else { n };
        for i in 0..zrows {
            let z = self.zfull.profile(i);
            for l in 1..z.len() {
                if z[l] <= z[l - 1] {
                    return Err(StageError::InvalidInput(format!(
                        "zfull not increasing at profile {} level {}",
                        i, l
                    )));
                }
            }
        }
        for (name, var) in [
            ("backscatter_mol", &self.backscatter_mol),
            ("backscatter_sd", &self.backscatter_sd),
        ] {
            if let Some(v) = var {
                if v.dim() != (n, levels) {
                    return Err(StageError::InvalidInput(format!(
                        "{} shape {:?} does not match backscatter",
                        name,
                        v.dim()
                    )));
                }
            }
        }
        for (name, var) in self.extra.iter() {
            let ok = match var {
                ExtraVar::Profile(v) => v.len() == n,
                ExtraVar::Gridded(v) => v.dim() == (n, levels),
            };
            if !ok {
                return Err(StageError::InvalidInput(format!(
                    "kept variable {} does not match the profile dimensions",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Copies profiles `start..end` into a new chunk. Level-dimensioned
    /// aggregates (`cloud_occurrence`, `n`) are carried unchanged.
    pub fn slice_profiles(&self, start: usize, end: usize) -> ProfileChunk {
        let zfull = match &self.zfull {
            ZGrid::Common(z) => ZGrid::Common(z.clone()),
            ZGrid::PerProfile(z) => ZGrid::PerProfile(z.slice(s![start..end, ..]).to_owned()),
        };
        ProfileChunk {
            time: self.time.slice(s![start..end]).to_owned(),
            time_bnds: self.time_bnds.slice(s![start..end, ..]).to_owned(),
            zfull,
            altitude: self.altitude.slice(s![start..end]).to_owned(),
            lon: self.lon.slice(s![start..end]).to_owned(),
            lat: self.lat.slice(s![start..end]).to_owned(),
            backscatter: self.backscatter.slice(s![start..end, ..]).to_owned(),
            backscatter_mol: self
                .backscatter_mol
                .as_ref()
                .map(|v| v.slice(s![start..end, ..]).to_owned()),
            backscatter_sd: self
                .backscatter_sd
                .as_ref()
                .map(|v| v.slice(s![start..end, ..]).to_owned()),
            cloud_mask: self
                .cloud_mask
                .as_ref()
                .map(|v| v.slice(s![start..end, ..]).to_owned()),
            cbh: self.cbh.as_ref().map(|v| v.slice(s![start..end]).to_owned()),
            lr: self.lr.as_ref().map(|v| v.slice(s![start..end]).to_owned()),
            cloud_occurrence: self.cloud_occurrence.clone(),
            n: self.n.clone(),
            extra: self
                .extra
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        ExtraVar::Profile(a) => {
                            ExtraVar::Profile(a.slice(s![start..end]).to_owned())
                        }
                        ExtraVar::Gridded(a) => {
                            ExtraVar::Gridded(a.slice(s![start..end, ..]).to_owned())
                        }
                    };
                    (k.clone(), v)
                })
                .collect(),
            meta: self.meta.clone(),
        }
    }

    /// Concatenates chunks along the profile dimension. All parts must
    /// share the level count, a common height grid where present, and the
    /// same set of optional variables.
    pub fn concat(parts: &[ProfileChunk]) -> StageResult<ProfileChunk> {
        let first = parts
            .first()
            .ok_or_else(|| StageError::Internal("concat of zero chunks".into()))?;
        if parts.len() == 1 {
            return Ok(first.clone());
        }
        let levels = first.levels();
        for p in parts {
            if p.levels() != levels {
                return Err(StageError::InvalidInput(format!(
                    "cannot concatenate chunks with {} and {} levels",
                    levels,
                    p.levels()
                )));
            }
        }
        let cat1 = |get: &dyn Fn(&ProfileChunk) -> ArrayView1<f64>| -> StageResult<Array1<f64>> {
            let views: Vec<_> = parts.iter().map(|p| get(p)).collect();
            concatenate(Axis(0), &views)
                .map_err(|e| StageError::Internal(format!("concatenate: {}", e)))
        };
        let cat2 = |get: &dyn Fn(&ProfileChunk) -> ndarray::ArrayView2<f64>| -> StageResult<Array2<f64>> {
            let views: Vec<_> = parts.iter().map(|p| get(p)).collect();
            concatenate(Axis(0), &views)
                .map_err(|e| StageError::Internal(format!("concatenate: {}", e)))
        };
        let zfull = match &first.zfull {
            ZGrid::Common(z) => {
                for p in parts {
                    match &p.zfull {
                        ZGrid::Common(pz) if pz == z => {}
                        _ => {
                            return Err(StageError::InvalidInput(
                                "cannot concatenate chunks with differing height grids".into(),
                            ))
                        }
                    }
                }
                ZGrid::Common(z.clone())
            }
            ZGrid::PerProfile(_) => {
                let views: Vec<_> = parts
                    .iter()
                    .map(|p| match &p.zfull {
                        ZGrid::PerProfile(z) => Ok(z.view()),
                        ZGrid::Common(_) => Err(StageError::InvalidInput(
                            "cannot concatenate mixed height grid kinds".into(),
                        )),
                    })
                    .collect::<StageResult<Vec<_>>>()?;
                ZGrid::PerProfile(
                    concatenate(Axis(0), &views)
                        .map_err(|e| StageError::Internal(format!("concatenate: {}", e)))?,
                )
            }
        };
        let opt2 = |name: &str,
                    get: &dyn Fn(&ProfileChunk) -> Option<&Array2<f64>>|
         -> StageResult<Option<Array2<f64>>> {
            if get(first).is_none() {
                if parts.iter().any(|p| get(p).is_some()) {
                    return Err(StageError::InvalidInput(format!(
                        "variable {} present in some chunks but not others",
                        name
                    )));
                }
                return Ok(None);
            }
            let views: Vec<_> = parts
                .iter()
                .map(|p| {
                    get(p).map(|v| v.view()).ok_or_else(|| {
                        StageError::InvalidInput(format!(
                            "variable {} present in some chunks but not others",
                            name
                        ))
                    })
                })
                .collect::<StageResult<Vec<_>>>()?;
            Ok(Some(concatenate(Axis(0), &views).map_err(|e| {
                StageError::Internal(format!("concatenate: {}", e))
            })?))
        };
        let opt1 = |name: &str,
                    get: &dyn Fn(&ProfileChunk) -> Option<&Array1<f64>>|
         -> StageResult<Option<Array1<f64>>> {
            if get(first).is_none() {
                if parts.iter().any(|p| get(p).is_some()) {
                    return Err(StageError::InvalidInput(format!(
                        "variable {} present in some chunks but not others",
                        name
                    )));
                }
                return Ok(None);
            }
            let views: Vec<_> = parts
                .iter()
                .map(|p| {
                    get(p).map(|v| v.view()).ok_or_else(|| {
                        StageError::InvalidInput(format!(
                            "variable {} present in some chunks but not others",
                            name
                        ))
                    })
                })
                .collect::<StageResult<Vec<_>>>()?;
            Ok(Some(concatenate(Axis(0), &views).map_err(|e| {
                StageError::Internal(format!("concatenate: {}", e))
            })?))
        };
        let cloud_mask = if first.cloud_mask.is_none() {
            if parts.iter().any(|p| p.cloud_mask.is_some()) {
                return Err(StageError::InvalidInput(
                    "cloud_mask present in some chunks but not others".into(),
                ));
            }
            None
        } else {
            let views: Vec<_> = parts
                .iter()
                .map(|p| {
                    p.cloud_mask.as_ref().map(|v| v.view()).ok_or_else(|| {
                        StageError::InvalidInput(
                            "cloud_mask present in some chunks but not others".into(),
                        )
                    })
                })
                .collect::<StageResult<Vec<_>>>()?;
            Some(
                concatenate(Axis(0), &views)
                    .map_err(|e| StageError::Internal(format!("concatenate: {}", e)))?,
            )
        };
        for p in &parts[1..] {
            if p.extra.len() != first.extra.len() {
                return Err(StageError::InvalidInput(
                    "kept variable set differs between chunks".into(),
                ));
            }
        }
        let mut extra = BTreeMap::new();
        for (name, var) in first.extra.iter() {
            let merged = match var {
                ExtraVar::Profile(_) => {
                    let views: Vec<_> = parts
                        .iter()
                        .map(|p| match p.extra.get(name) {
                            Some(ExtraVar::Profile(a)) => Ok(a.view()),
                            _ => Err(StageError::InvalidInput(format!(
                                "kept variable {} missing from a chunk",
                                name
                            ))),
                        })
                        .collect::<StageResult<Vec<_>>>()?;
                    ExtraVar::Profile(
                        concatenate(Axis(0), &views)
                            .map_err(|e| StageError::Internal(format!("concatenate: {}", e)))?,
                    )
                }
                ExtraVar::Gridded(_) => {
                    let views: Vec<_> = parts
                        .iter()
                        .map(|p| match p.extra.get(name) {
                            Some(ExtraVar::Gridded(a)) => Ok(a.view()),
                            _ => Err(StageError::InvalidInput(format!(
                                "kept variable {} missing from a chunk",
                                name
                            ))),
                        })
                        .collect::<StageResult<Vec<_>>>()?;
                    ExtraVar::Gridded(
                        concatenate(Axis(0), &views)
                            .map_err(|e| StageError::Internal(format!("concatenate: {}", e)))?,
                    )
                }
            };
            extra.insert(name.clone(), merged);
        }
        let mut meta = first.meta.clone();
        for p in &parts[1..] {
            for (k, v) in p.meta.iter() {
                meta.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        Ok(ProfileChunk {
            time: cat1(&|p| p.time.view())?,
            time_bnds: cat2(&|p| p.time_bnds.view())?,
            zfull,
            altitude: cat1(&|p| p.altitude.view())?,
            lon: cat1(&|p| p.lon.view())?,
            lat: cat1(&|p| p.lat.view())?,
            backscatter: cat2(&|p| p.backscatter.view())?,
            backscatter_mol: opt2("backscatter_mol", &|p| p.backscatter_mol.as_ref())?,
            backscatter_sd: opt2("backscatter_sd", &|p| p.backscatter_sd.as_ref())?,
            cloud_mask,
            cbh: opt1("cbh", &|p| p.cbh.as_ref())?,
            lr: opt1("lr", &|p| p.lr.as_ref())?,
            cloud_occurrence: None,
            n: None,
            extra,
            meta,
        })
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use crate::dataset::meta::canonical_meta;

    /// Builds a minimal valid chunk with a shared height grid and constant
    /// backscatter, for stage tests.
    pub fn chunk(t0: f64, nprofiles: usize, dt_days: f64, zres: f64, levels: usize) -> ProfileChunk {
        let time = Array1::from_shape_fn(nprofiles, |i| t0 + (i as f64 + 0.5) * dt_days);
        let time_bnds = Array2::from_shape_fn((nprofiles, 2), |(i, j)| {
            t0 + (i as f64 + j as f64) * dt_days
        });
        let zfull = Array1::from_shape_fn(levels, |l| (l as f64 + 0.5) * zres);
        let mut meta = BTreeMap::new();
        for name in ["time", "time_bnds", "zfull", "altitude", "lon", "lat", "backscatter"] {
            meta.insert(name.to_string(), canonical_meta(name).unwrap());
        }
        ProfileChunk {
            time,
            time_bnds,
            zfull: ZGrid::Common(zfull),
            altitude: Array1::zeros(nprofiles),
            lon: Array1::from_elem(nprofiles, 170.0),
            lat: Array1::from_elem(nprofiles, -45.0),
            backscatter: Array2::from_elem((nprofiles, levels), 1e-6),
            backscatter_mol: None,
            backscatter_sd: None,
            cloud_mask: None,
            cbh: None,
            lr: None,
            cloud_occurrence: None,
            n: None,
            extra: BTreeMap::new(),
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::chunk;
    use super::*;

    #[test]
    fn validate_accepts_well_formed_chunk() {
        let d = chunk(0.0, 4, 1.0 / 86400.0, 50.0, 10);
        d.validate().unwrap();
    }

    #[test]
    fn validate_rejects_time_outside_bounds() {
        let mut d = chunk(0.0, 4, 1.0 / 86400.0, 50.0, 10);
        d.time[2] = d.time_bnds[[2, 1]] + 1.0;
        assert!(matches!(d.validate(), Err(StageError::InvalidInput(_))));
    }

    #[test]
    fn validate_rejects_decreasing_heights() {
        let mut d = chunk(0.0, 2, 1.0 / 86400.0, 50.0, 5);
        if let ZGrid::Common(z) = &mut d.zfull {
            z[3] = z[1];
        }
        assert!(d.validate().is_err());
    }

    #[test]
    fn slice_and_concat_round_trip() {
        let d = chunk(0.0, 6, 1.0 / 86400.0, 50.0, 8);
        let a = d.slice_profiles(0, 3);
        let b = d.slice_profiles(3, 6);
        let merged = ProfileChunk::concat(&[a, b]).unwrap();
        assert_eq!(merged.len(), 6);
        assert_eq!(merged.time, d.time);
        assert_eq!(merged.backscatter, d.backscatter);
    }

    #[test]
    fn concat_rejects_mismatched_optional_variables() {
        let a = chunk(0.0, 2, 1.0 / 86400.0, 50.0, 4);
        let mut b = chunk(1.0, 2, 1.0 / 86400.0, 50.0, 4);
        b.backscatter_mol = Some(Array2::zeros((2, 4)));
        assert!(ProfileChunk::concat(&[a, b]).is_err());
    }
}
