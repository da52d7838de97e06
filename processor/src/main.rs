use clap::Parser;
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Lidar backscatter profile-processing driver")]
struct Args {
    /// Instrument type of the input data
    instrument: String,
    /// Input data file or directory
    input: PathBuf,
    /// Output directory
    output: PathBuf,
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Instrument altitude (m)
    #[arg(long)]
    altitude: Option<f64>,
    /// Instrument longitude (degrees East)
    #[arg(long)]
    lon: Option<f64>,
    /// Instrument latitude (degrees North)
    #[arg(long)]
    lat: Option<f64>,
    /// Time resolution (s)
    #[arg(long)]
    tres: Option<f64>,
    /// Time shift (s)
    #[arg(long)]
    tshift: Option<f64>,
    /// Height resolution (m)
    #[arg(long)]
    zres: Option<f64>,
    /// Output sampling period (s)
    #[arg(long)]
    output_sampling: Option<f64>,
    /// Vertical interpolation method
    #[arg(long)]
    interp: Option<String>,
    /// Calibration coefficient file
    #[arg(long)]
    calibration_file: Option<PathBuf>,
    /// Couple to other processed lidar data
    #[arg(long)]
    couple: Option<PathBuf>,
    /// Track file(s) assigning positions to profiles
    #[arg(long)]
    track: Vec<PathBuf>,
    /// Process the input directory recursively
    #[arg(short, long, default_value_t = false)]
    recursive: bool,
    /// Print full error chains for skipped files
    #[arg(long, default_value_t = false)]
    debug: bool,
}

impl Args {
    fn to_config(&self) -> anyhow::Result<WorkflowConfig> {
        let mut config = match &self.workflow {
            Some(path) => WorkflowConfig::load(path)?,
            None => WorkflowConfig::default(),
        };
        if let Some(v) = self.altitude {
            config.altitude = Some(v);
        }
        if let Some(v) = self.lon {
            config.lon = Some(v);
        }
        if let Some(v) = self.lat {
            config.lat = Some(v);
        }
        if let Some(v) = self.tres {
            config.tres = v;
        }
        if let Some(v) = self.tshift {
            config.tshift = v;
        }
        if let Some(v) = self.zres {
            config.zres = v;
        }
        if let Some(v) = self.output_sampling {
            config.output_sampling = v;
        }
        if let Some(v) = &self.interp {
            config.interp = v.clone();
        }
        if let Some(v) = &self.calibration_file {
            config.calibration_file = Some(v.clone());
        }
        if let Some(v) = &self.couple {
            config.couple = Some(v.clone());
        }
        if !self.track.is_empty() {
            config.track = self.track.clone();
        }
        if self.recursive {
            config.recursive = true;
        }
        if self.debug {
            config.debug = true;
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = args.to_config()?;
    let runner = Runner::new(config);
    let summary = runner.run(&args.instrument, &args.input, &args.output)?;

    println!(
        "Processed {} file(s), skipped {}",
        summary.processed, summary.skipped
    );
    Ok(())
}
