use std::path::{Path, PathBuf};

use anyhow::Context;
use lidarcore::dataset::ProfileChunk;
use lidarcore::io::calibration;
use lidarcore::io::reader::{by_type, InstrumentReader, ReadOptions};
use lidarcore::io::WriteStage;
use lidarcore::math::InterpMode;
use lidarcore::prelude::{StreamItem, StreamTransform};
use lidarcore::registry;
use lidarcore::stages::{
    CoupleStage, LidarRatioStage, OccurrenceStage, Pipeline, PreprocessStage, TSampleStage,
    WindowStage, ZSampleStage,
};
use lidarcore::telemetry::{LogManager, MetricsRecorder};
use lidarcore::track::{read_track, Track};

use crate::workflow::config::WorkflowConfig;

#[derive(Debug)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
}

/// Drives one pipeline run: resolves the reader and algorithms, wires
/// the stages in fixed order, iterates the input files in lexicographic
/// order (assumed chronological by naming convention) and pushes the
/// end-of-stream marker so every stage flushes.
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, instrument: &str, input: &Path, output: &Path) -> anyhow::Result<RunSummary> {
        let cfg = &self.config;
        let reader = by_type(instrument)?;
        let tlim = cfg.time_limits()?;
        let interp = InterpMode::from_name(&cfg.interp)?;
        let track = match cfg.track.is_empty() {
            true => None,
            false => Some(
                read_track(&cfg.track, cfg.track_gap / 86400.0).context("reading track")?,
            ),
        };
        let coeff = match &cfg.calibration_file {
            Some(path) => {
                calibration::read_coeff(path).context("reading calibration file")?
                    / reader.nominal_calibration()
            }
            None => 1.0,
        };
        let mut pipeline = self.build_pipeline(interp, coeff, output)?;
        let opts = ReadOptions {
            altitude: cfg.altitude,
            tlim,
            fix_cl_range: cfg.fix_cl_range,
            cl_crit_range: cfg.cl_crit_range,
            keep_vars: cfg.keep_vars.clone(),
        };
        let logger = LogManager::new();
        let metrics = MetricsRecorder::new();

        if input.is_dir() {
            let mut files = Vec::new();
            discover(input, cfg.recursive, &mut files)
                .with_context(|| format!("listing {}", input.display()))?;
            files.sort();
            for file in &files {
                logger.input(file);
                match self.process_file(reader.as_ref(), &opts, track.as_ref(), &mut pipeline, file)
                {
                    Ok(true) => metrics.record_processed(),
                    Ok(false) => {}
                    Err(err) => {
                        metrics.record_skipped();
                        if cfg.debug {
                            log::warn!("{}: {:#}", file.display(), err);
                        } else {
                            logger.skip(file, &err);
                        }
                    }
                }
            }
        } else {
            logger.input(input);
            if self
                .process_file(reader.as_ref(), &opts, track.as_ref(), &mut pipeline, input)
                .with_context(|| format!("processing {}", input.display()))?
            {
                metrics.record_processed();
            }
        }
        pipeline.push(StreamItem::End)?;

        let (processed, skipped) = metrics.snapshot();
        Ok(RunSummary { processed, skipped })
    }

    fn process_file(
        &self,
        reader: &dyn InstrumentReader,
        opts: &ReadOptions,
        track: Option<&Track>,
        pipeline: &mut Pipeline,
        file: &Path,
    ) -> anyhow::Result<bool> {
        let mut d = match reader.read(file, opts)? {
            Some(d) => d,
            None => return Ok(false),
        };
        self.fill_position(&mut d, track);
        pipeline.push(StreamItem::Chunk(d))?;
        Ok(true)
    }

    /// Track positions fill in where no explicit option is given;
    /// explicit `altitude`/`lon`/`lat` override both reader and track.
    fn fill_position(&self, d: &mut ProfileChunk, track: Option<&Track>) {
        let cfg = &self.config;
        if let Some(a) = cfg.altitude {
            d.altitude.fill(a);
        }
        if let Some(track) = track {
            for i in 0..d.len() {
                let (lon, lat) = track.locate(d.time[i]);
                if cfg.lon.is_none() {
                    d.lon[i] = lon;
                }
                if cfg.lat.is_none() {
                    d.lat[i] = lat;
                }
            }
        }
        if let Some(v) = cfg.lon {
            d.lon.fill(v);
        }
        if let Some(v) = cfg.lat {
            d.lat.fill(v);
        }
    }

    fn build_pipeline(
        &self,
        interp: InterpMode,
        coeff: f64,
        output: &Path,
    ) -> anyhow::Result<Pipeline> {
        let cfg = &self.config;
        let mut stages: Vec<Box<dyn StreamTransform>> = Vec::new();
        stages.push(Box::new(PreprocessStage::new(cfg.tshift)));
        if let Some(path) = &cfg.couple {
            stages.push(Box::new(CoupleStage::new(path, interp)?));
        }
        stages.push(registry::noise_removal(
            &cfg.noise_removal,
            cfg.noise_config(),
        )?);
        stages.push(registry::calibration(&cfg.calibration, coeff)?);
        stages.push(Box::new(ZSampleStage::new(interp, cfg.zlim, cfg.zres)?));
        stages.push(Box::new(TSampleStage::new(cfg.tres, cfg.align_output)?));
        stages.push(Box::new(WindowStage::new(
            cfg.output_sampling,
            cfg.align_output,
        )?));
        stages.push(registry::cloud_detection(
            &cfg.cloud_detection,
            cfg.cloud_config(),
        )?);
        stages.push(registry::cloud_base_detection(&cfg.cloud_base_detection)?);
        stages.push(Box::new(OccurrenceStage));
        stages.push(Box::new(LidarRatioStage));
        stages.push(Box::new(WriteStage::new(output.to_path_buf())));
        Ok(Pipeline::new(stages))
    }
}

fn discover(dir: &Path, recursive: bool, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                discover(&path, true, files)?;
            }
        } else if path.extension().map_or(false, |ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(())
}
