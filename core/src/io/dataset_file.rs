//! Canonical array-dataset files.
//!
//! A dataset file is a JSON rendering of the dims/vars/attrs model used
//! throughout the pipeline: named dimensions, and per variable its
//! dimension names, flat row-major data (`null` = missing) and display
//! metadata. The structure maps one-to-one onto a NetCDF dataset.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::dataset::{canonical_meta, meta_for, ExtraVar, ProfileChunk, VarMeta, ZGrid, MASK_MISSING};
use crate::prelude::{StageError, StageResult};

/// One serialized variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarRecord {
    pub dims: Vec<String>,
    pub data: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
}

/// On-disk dataset: named dimensions plus variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetFile {
    pub dims: BTreeMap<String, usize>,
    pub vars: BTreeMap<String, VarRecord>,
}

fn pack<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> Vec<Option<f64>> {
    values
        .into_iter()
        .map(|&v| if v.is_finite() { Some(v) } else { None })
        .collect()
}

fn unpack(data: &[Option<f64>]) -> Vec<f64> {
    data.iter().map(|v| v.unwrap_or(f64::NAN)).collect()
}

impl DatasetFile {
    pub fn read(path: &Path) -> StageResult<DatasetFile> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            StageError::InvalidInput(format!("{}: {}", path.display(), e))
        })
    }

    pub fn write(&self, path: &Path) -> StageResult<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)
            .map_err(|e| StageError::Internal(format!("{}: {}", path.display(), e)))
    }

    /// A required 1-D variable as a dense vector (missing values NaN).
    pub fn require_1d(&self, name: &str) -> StageResult<Vec<f64>> {
        let var = self
            .vars
            .get(name)
            .ok_or_else(|| StageError::MissingVariable(name.to_string()))?;
        if var.dims.len() != 1 {
            return Err(StageError::InvalidInput(format!(
                "variable {} is not one-dimensional",
                name
            )));
        }
        Ok(unpack(&var.data))
    }

    fn grid(&self, name: &str, n: usize, levels: usize) -> StageResult<Option<Array2<f64>>> {
        let var = match self.vars.get(name) {
            Some(v) => v,
            None => return Ok(None),
        };
        if var.data.len() != n * levels {
            return Err(StageError::InvalidInput(format!(
                "variable {} has {} values, expected {}",
                name,
                var.data.len(),
                n * levels
            )));
        }
        let arr = Array2::from_shape_vec((n, levels), unpack(&var.data))
            .map_err(|e| StageError::InvalidInput(format!("variable {}: {}", name, e)))?;
        Ok(Some(arr))
    }

    fn profile_var(&self, name: &str, n: usize) -> StageResult<Option<Array1<f64>>> {
        let var = match self.vars.get(name) {
            Some(v) => v,
            None => return Ok(None),
        };
        let values = unpack(&var.data);
        match values.len() {
            1 => Ok(Some(Array1::from_elem(n, values[0]))),
            len if len == n => Ok(Some(Array1::from(values))),
            len => Err(StageError::InvalidInput(format!(
                "variable {} has {} values for {} profiles",
                name, len, n
            ))),
        }
    }
}

/// Converts a dataset file into a profile chunk, failing with a
/// descriptive error naming the first missing required variable.
/// Absent `altitude` defaults to 0 and absent `lon`/`lat` to missing,
/// matching the driver's fill rules.
pub fn to_chunk(ds: &DatasetFile) -> StageResult<ProfileChunk> {
    let time = Array1::from(ds.require_1d("time")?);
    let n = time.len();
    let bnds_var = ds
        .vars
        .get("time_bnds")
        .ok_or_else(|| StageError::MissingVariable("time_bnds".to_string()))?;
    if bnds_var.data.len() != n * 2 {
        return Err(StageError::InvalidInput(format!(
            "time_bnds has {} values for {} profiles",
            bnds_var.data.len(),
            n
        )));
    }
    let time_bnds = Array2::from_shape_vec((n, 2), unpack(&bnds_var.data))
        .map_err(|e| StageError::InvalidInput(format!("time_bnds: {}", e)))?;

    let zvar = ds
        .vars
        .get("zfull")
        .ok_or_else(|| StageError::MissingVariable("zfull".to_string()))?;
    let zfull = if zvar.dims.len() == 1 {
        ZGrid::Common(Array1::from(unpack(&zvar.data)))
    } else {
        let levels = zvar.data.len() / n.max(1);
        ZGrid::PerProfile(
            Array2::from_shape_vec((n, levels), unpack(&zvar.data))
                .map_err(|e| StageError::InvalidInput(format!("zfull: {}", e)))?,
        )
    };
    let levels = zfull.levels();

    let backscatter = ds
        .grid("backscatter", n, levels)?
        .ok_or_else(|| StageError::MissingVariable("backscatter".to_string()))?;

    let altitude = ds
        .profile_var("altitude", n)?
        .unwrap_or_else(|| Array1::zeros(n));
    let lon = ds
        .profile_var("lon", n)?
        .unwrap_or_else(|| Array1::from_elem(n, f64::NAN));
    let lat = ds
        .profile_var("lat", n)?
        .unwrap_or_else(|| Array1::from_elem(n, f64::NAN));

    let cloud_mask = ds.grid("cloud_mask", n, levels)?.map(|m| {
        m.mapv(|v| if v.is_finite() { v as i8 } else { MASK_MISSING })
    });
    let n_var = match ds.vars.get("n") {
        Some(v) => Some(Array1::from(
            unpack(&v.data)
                .iter()
                .map(|&x| if x.is_finite() { x as i64 } else { 0 })
                .collect::<Vec<_>>(),
        )),
        None => None,
    };
    let cloud_occurrence = ds.vars.get("cloud_occurrence").map(|v| Array1::from(unpack(&v.data)));

    let mut extra = BTreeMap::new();
    let mut meta = BTreeMap::new();
    for (name, var) in ds.vars.iter() {
        if name.starts_with("input_") {
            let parsed = if var.dims.len() == 2 {
                ExtraVar::Gridded(
                    Array2::from_shape_vec((n, levels), unpack(&var.data)).map_err(|e| {
                        StageError::InvalidInput(format!("variable {}: {}", name, e))
                    })?,
                )
            } else {
                if var.data.len() != n {
                    return Err(StageError::InvalidInput(format!(
                        "variable {} has {} values for {} profiles",
                        name,
                        var.data.len(),
                        n
                    )));
                }
                ExtraVar::Profile(Array1::from(unpack(&var.data)))
            };
            extra.insert(name.clone(), parsed);
        }
        let m = match (&var.long_name, &var.units) {
            (Some(l), Some(u)) => VarMeta::new(l, u),
            _ => match canonical_meta(name) {
                Some(m) => m,
                None => VarMeta::new(name, "1"),
            },
        };
        meta.insert(name.clone(), m);
    }
    for name in ["altitude", "lon", "lat"] {
        meta.entry(name.to_string()).or_insert_with(|| meta_for(name));
    }

    Ok(ProfileChunk {
        time,
        time_bnds,
        zfull,
        altitude,
        lon,
        lat,
        backscatter,
        backscatter_mol: ds.grid("backscatter_mol", n, levels)?,
        backscatter_sd: ds.grid("backscatter_sd", n, levels)?,
        cloud_mask,
        cbh: ds.profile_var("cbh", n)?,
        lr: ds.profile_var("lr", n)?,
        cloud_occurrence,
        n: n_var,
        extra,
        meta,
    })
}

/// Serializes a profile chunk, attaching units and long names from the
/// chunk metadata (canonical entries as fallback).
pub fn from_chunk(d: &ProfileChunk) -> DatasetFile {
    let n = d.len();
    let levels = d.levels();
    let mut ds = DatasetFile::default();
    ds.dims.insert("time".to_string(), n);
    ds.dims.insert("level".to_string(), levels);
    ds.dims.insert("bnd".to_string(), 2);

    let lookup = |name: &str| -> (Option<String>, Option<String>) {
        let m = d
            .meta
            .get(name)
            .cloned()
            .or_else(|| canonical_meta(name))
            .unwrap_or_else(|| VarMeta::new(name, "1"));
        (Some(m.units), Some(m.long_name))
    };
    let mut put = |ds: &mut DatasetFile, name: &str, dims: Vec<&str>, data: Vec<Option<f64>>| {
        let (units, long_name) = lookup(name);
        ds.vars.insert(
            name.to_string(),
            VarRecord {
                dims: dims.into_iter().map(String::from).collect(),
                data,
                units,
                long_name,
            },
        );
    };

    put(&mut ds, "time", vec!["time"], pack(d.time.iter()));
    put(&mut ds, "time_bnds", vec!["time", "bnd"], pack(d.time_bnds.iter()));
    match &d.zfull {
        ZGrid::Common(z) => put(&mut ds, "zfull", vec!["level"], pack(z.iter())),
        ZGrid::PerProfile(z) => put(&mut ds, "zfull", vec!["time", "level"], pack(z.iter())),
    }
    put(&mut ds, "altitude", vec!["time"], pack(d.altitude.iter()));
    put(&mut ds, "lon", vec!["time"], pack(d.lon.iter()));
    put(&mut ds, "lat", vec!["time"], pack(d.lat.iter()));
    put(
        &mut ds,
        "backscatter",
        vec!["time", "level"],
        pack(d.backscatter.iter()),
    );
    if let Some(v) = &d.backscatter_mol {
        put(&mut ds, "backscatter_mol", vec!["time", "level"], pack(v.iter()));
    }
    if let Some(v) = &d.backscatter_sd {
        put(&mut ds, "backscatter_sd", vec!["time", "level"], pack(v.iter()));
    }
    if let Some(m) = &d.cloud_mask {
        // Mask no-data is an explicit state, kept numeric rather than null.
        let data = m.iter().map(|&v| Some(v as f64)).collect();
        put(&mut ds, "cloud_mask", vec!["time", "level"], data);
    }
    if let Some(v) = &d.cbh {
        put(&mut ds, "cbh", vec!["time"], pack(v.iter()));
    }
    if let Some(v) = &d.lr {
        put(&mut ds, "lr", vec!["time"], pack(v.iter()));
    }
    if let Some(v) = &d.cloud_occurrence {
        put(&mut ds, "cloud_occurrence", vec!["level"], pack(v.iter()));
    }
    if let Some(v) = &d.n {
        let data = v.iter().map(|&x| Some(x as f64)).collect();
        put(&mut ds, "n", vec!["level"], data);
    }
    for (name, var) in d.extra.iter() {
        match var {
            ExtraVar::Profile(v) => put(&mut ds, name, vec!["time"], pack(v.iter())),
            ExtraVar::Gridded(v) => put(&mut ds, name, vec!["time", "level"], pack(v.iter())),
        }
    }
    ds
}

pub fn read_chunk(path: &Path) -> StageResult<ProfileChunk> {
    to_chunk(&DatasetFile::read(path)?)
}

pub fn write_chunk(path: &Path, d: &ProfileChunk) -> StageResult<()> {
    from_chunk(d).write(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::chunk::testutil::chunk;
    use crate::dataset::MASK_CLOUD;

    #[test]
    fn chunk_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk.json");
        let mut d = chunk(100.0, 3, 300.0 / 86400.0, 50.0, 5);
        d.backscatter[[1, 2]] = f64::NAN;
        d.cloud_mask = Some(Array2::from_elem((3, 5), MASK_CLOUD));
        write_chunk(&path, &d).unwrap();
        let back = read_chunk(&path).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.levels(), 5);
        assert!(back.backscatter[[1, 2]].is_nan());
        assert_eq!(back.backscatter[[0, 0]], d.backscatter[[0, 0]]);
        assert_eq!(back.cloud_mask.unwrap()[[2, 4]], MASK_CLOUD);
        assert_eq!(back.time, d.time);
    }

    #[test]
    fn missing_required_variable_is_named() {
        let d = chunk(0.0, 2, 1.0 / 86400.0, 50.0, 4);
        let mut ds = from_chunk(&d);
        ds.vars.remove("backscatter");
        match to_chunk(&ds) {
            Err(StageError::MissingVariable(name)) => assert_eq!(name, "backscatter"),
            other => panic!("expected missing-variable error, got {:?}", other),
        }
    }

    #[test]
    fn scalar_position_broadcasts_over_profiles() {
        let d = chunk(0.0, 4, 1.0 / 86400.0, 50.0, 4);
        let mut ds = from_chunk(&d);
        ds.vars.get_mut("lon").unwrap().data = vec![Some(42.0)];
        let back = to_chunk(&ds).unwrap();
        assert_eq!(back.lon.len(), 4);
        assert!(back.lon.iter().all(|&v| v == 42.0));
    }

    #[test]
    fn kept_variables_survive_serialization() {
        let mut d = chunk(0.0, 2, 1.0 / 86400.0, 50.0, 3);
        d.extra.insert(
            "input_range_corrected".to_string(),
            ExtraVar::Gridded(Array2::from_elem((2, 3), 7.0)),
        );
        let back = to_chunk(&from_chunk(&d)).unwrap();
        match back.extra.get("input_range_corrected") {
            Some(ExtraVar::Gridded(v)) => assert_eq!(v[[1, 2]], 7.0),
            other => panic!("kept variable lost: {:?}", other),
        }
    }
}
