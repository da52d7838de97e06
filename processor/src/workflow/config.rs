use anyhow::Context;
use lidarcore::prelude::{StageError, StageResult};
use lidarcore::stages::{CloudConfig, NoiseConfig};
use lidarcore::timeutil;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Full configuration surface of a pipeline run, loadable from YAML or
/// assembled from command-line arguments. Validated once at pipeline
/// construction, never per call.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Instrument altitude override (m).
    pub altitude: Option<f64>,
    /// Instrument longitude override (degrees East).
    pub lon: Option<f64>,
    /// Instrument latitude override (degrees North).
    pub lat: Option<f64>,
    /// Track files assigning positions to profile times.
    pub track: Vec<PathBuf>,
    /// Track interpolation gap threshold (s); 0 disables the gap rule.
    pub track_gap: f64,
    /// Profile time limits, ISO 8601.
    pub time: Option<[String; 2]>,
    /// Time resolution (s).
    pub tres: f64,
    /// Time shift (s).
    pub tshift: f64,
    /// Height resolution (m).
    pub zres: f64,
    /// Height limits (m).
    pub zlim: [f64; 2],
    pub cloud_detection: String,
    pub cloud_base_detection: String,
    pub noise_removal: String,
    pub calibration: String,
    /// Output sampling period (s).
    pub output_sampling: f64,
    /// Align output periods and time bins to absolute multiples.
    pub align_output: bool,
    pub calibration_file: Option<PathBuf>,
    /// Directory or file of processed data to couple to.
    pub couple: Option<PathBuf>,
    /// Apply the CL31/CL51 range-correction fix.
    pub fix_cl_range: bool,
    /// Critical range for `fix_cl_range` (m).
    pub cl_crit_range: f64,
    /// Input variables kept through the pipeline.
    pub keep_vars: Vec<String>,
    /// Vertical interpolation: `area_block`, `area_linear` or `linear`.
    pub interp: String,
    /// Process the input directory recursively.
    pub recursive: bool,
    /// Print full error chains for skipped files.
    pub debug: bool,
    pub cloud_nsd: f64,
    pub cloud_threshold: f64,
    pub cloud_threshold_exp: Option<[f64; 3]>,
    pub bsd: Option<f64>,
    pub bsd_z: f64,
    pub noise_removal_sampling: f64,
    pub near_noise: [f64; 2],
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            altitude: None,
            lon: None,
            lat: None,
            track: Vec::new(),
            track_gap: 21600.0,
            time: None,
            tres: 300.0,
            tshift: 0.0,
            zres: 50.0,
            zlim: [0.0, 15000.0],
            cloud_detection: "default".to_string(),
            cloud_base_detection: "default".to_string(),
            noise_removal: "default".to_string(),
            calibration: "default".to_string(),
            output_sampling: 86400.0,
            align_output: true,
            calibration_file: None,
            couple: None,
            fix_cl_range: false,
            cl_crit_range: 6000.0,
            keep_vars: Vec::new(),
            interp: "area_linear".to_string(),
            recursive: false,
            debug: false,
            cloud_nsd: 5.0,
            cloud_threshold: 2e-6,
            cloud_threshold_exp: None,
            bsd: None,
            bsd_z: 8000.0,
            noise_removal_sampling: 300.0,
            near_noise: [0.0, 0.0],
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn noise_config(&self) -> NoiseConfig {
        NoiseConfig {
            sampling: self.noise_removal_sampling,
            align: self.align_output,
            near_noise: self.near_noise,
        }
    }

    pub fn cloud_config(&self) -> CloudConfig {
        CloudConfig {
            nsd: self.cloud_nsd,
            threshold: self.cloud_threshold,
            threshold_exp: self.cloud_threshold_exp,
            bsd: self.bsd,
            bsd_z: self.bsd_z,
        }
    }

    /// Profile time limits in fractional days; malformed strings are a
    /// configuration error raised before any processing.
    pub fn time_limits(&self) -> StageResult<Option<[f64; 2]>> {
        match &self.time {
            None => Ok(None),
            Some([low, high]) => {
                let parse = |s: &str| {
                    timeutil::from_iso(s).ok_or_else(|| {
                        StageError::Config(format!("invalid time format: {}", s))
                    })
                };
                Ok(Some([parse(low)?, parse(high)?]))
            }
        }
    }
}
