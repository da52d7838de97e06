//! Instrument reader registry.
//!
//! Each reader converts one native or Cloudnet-style file into the
//! canonical profile-chunk format. The built-in `default` reader consumes
//! the pipeline's own output format; all other instrument tags are
//! provided by external reader crates registered here.

use std::path::Path;

use crate::dataset::ProfileChunk;
use crate::io::dataset_file;
use crate::prelude::{StageError, StageResult};

/// Options forwarded to every reader.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Instrument altitude override (m).
    pub altitude: Option<f64>,
    /// Keep only profiles with center time inside these limits (days).
    pub tlim: Option<[f64; 2]>,
    /// Apply the CL31/CL51 range-correction fix.
    pub fix_cl_range: bool,
    /// Critical range for `fix_cl_range` (m).
    pub cl_crit_range: f64,
    /// Input variables to keep through the pipeline.
    pub keep_vars: Vec<String>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            altitude: None,
            tlim: None,
            fix_cl_range: false,
            cl_crit_range: 6000.0,
            keep_vars: Vec::new(),
        }
    }
}

/// A per-instrument file reader.
pub trait InstrumentReader {
    /// Nominal calibration constant of the instrument, used to normalize
    /// coefficients read from calibration files.
    fn nominal_calibration(&self) -> f64 {
        1.0
    }

    /// Reads one file into a profile chunk; `Ok(None)` signals absence of
    /// data (e.g. all profiles outside the requested time limits).
    fn read(&self, path: &Path, opts: &ReadOptions) -> StageResult<Option<ProfileChunk>>;
}

/// Reader for data already in the canonical format. Kept variables are
/// expected to carry their `input_` prefix in the input; the range
/// correction options do not apply.
pub struct DefaultReader;

impl InstrumentReader for DefaultReader {
    fn read(&self, path: &Path, opts: &ReadOptions) -> StageResult<Option<ProfileChunk>> {
        let mut d = dataset_file::read_chunk(path)?;
        if let Some([t0, t1]) = opts.tlim {
            let start = d.time.iter().position(|&t| t >= t0).unwrap_or(d.len());
            let end = d.time.iter().rposition(|&t| t <= t1).map_or(start, |i| i + 1);
            if start >= end {
                return Ok(None);
            }
            if start > 0 || end < d.len() {
                d = d.slice_profiles(start, end);
            }
        }
        if let Some(a) = opts.altitude {
            d.altitude.fill(a);
        }
        if !opts.keep_vars.is_empty() {
            let keep = &opts.keep_vars;
            d.extra.retain(|name, _| {
                keep.iter().any(|k| {
                    name == k || name.strip_prefix("input_") == Some(k.as_str())
                })
            });
        }
        Ok(Some(d))
    }
}

/// Resolves an instrument type tag to its reader.
pub fn by_type(tag: &str) -> StageResult<Box<dyn InstrumentReader>> {
    match tag {
        "default" => Ok(Box::new(DefaultReader)),
        other => Err(StageError::Config(format!(
            "invalid instrument type: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::chunk::testutil::chunk;
    use crate::io::dataset_file::write_chunk;

    #[test]
    fn by_type_rejects_unknown_instruments() {
        assert!(matches!(by_type("cl99"), Err(StageError::Config(_))));
    }

    #[test]
    fn default_reader_applies_time_limits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        // 10 profiles at 5-minute spacing starting at day 100
        let d = chunk(100.0, 10, 300.0 / 86400.0, 50.0, 4);
        write_chunk(&path, &d).unwrap();

        let reader = DefaultReader;
        let opts = ReadOptions {
            tlim: Some([d.time[2], d.time[6]]),
            ..Default::default()
        };
        let out = reader.read(&path, &opts).unwrap().unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out.time[0], d.time[2]);
    }

    #[test]
    fn default_reader_signals_no_data_outside_limits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        let d = chunk(100.0, 4, 300.0 / 86400.0, 50.0, 4);
        write_chunk(&path, &d).unwrap();

        let reader = DefaultReader;
        let opts = ReadOptions {
            tlim: Some([200.0, 201.0]),
            ..Default::default()
        };
        assert!(reader.read(&path, &opts).unwrap().is_none());
    }
}
