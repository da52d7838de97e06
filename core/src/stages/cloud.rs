use ndarray::Array2;

use crate::dataset::{meta_for, MASK_CLEAR, MASK_CLOUD, MASK_MISSING};
use crate::prelude::{StageError, StageResult, StreamItem, StreamTransform};

/// Options of the default cloud detection algorithm.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Number of noise standard deviations to subtract.
    pub nsd: f64,
    /// Constant detection threshold (m-1 sr-1).
    pub threshold: f64,
    /// Exponential threshold `{x, y, h}`: `x` at the surface, decaying to
    /// `y` at infinite height with half-height `h`. Supersedes the
    /// constant threshold when set.
    pub threshold_exp: Option<[f64; 3]>,
    /// Manual noise standard deviation applying at height `bsd_z`,
    /// range-scaled to other heights; `None` uses the value carried from
    /// noise removal.
    pub bsd: Option<f64>,
    pub bsd_z: f64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            nsd: 5.0,
            threshold: 2e-6,
            threshold_exp: None,
            bsd: None,
            bsd_z: 8000.0,
        }
    }
}

/// Flags each bin as cloud, clear or no-data by comparing
/// noise-suppressed backscatter against the detection threshold.
pub struct CloudStage {
    config: CloudConfig,
}

impl CloudStage {
    pub fn new(config: CloudConfig) -> StageResult<Self> {
        if let Some([_, _, h]) = config.threshold_exp {
            if !(h > 0.0) {
                return Err(StageError::Config(
                    "cloud threshold half-height must be positive".into(),
                ));
            }
        }
        if config.bsd_z <= 0.0 {
            return Err(StageError::Config("bsd_z must be positive".into()));
        }
        Ok(Self { config })
    }

    fn threshold(&self, r: f64) -> f64 {
        match self.config.threshold_exp {
            Some([x, y, h]) => y + (x - y) * (-r.max(0.0) / h).exp2(),
            None => self.config.threshold,
        }
    }
}

impl StreamTransform for CloudStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        let mut d = match item {
            StreamItem::Chunk(d) => d,
            StreamItem::End => return Ok(vec![StreamItem::End]),
        };
        let n = d.len();
        let levels = d.levels();
        let mut mask = Array2::from_elem((n, levels), MASK_MISSING);
        for i in 0..n {
            let z = d.zfull.profile(i);
            for l in 0..levels {
                let b = d.backscatter[[i, l]];
                if !b.is_finite() {
                    continue;
                }
                let r = (z[l] - d.altitude[i]).max(0.0);
                let sd = match self.config.bsd {
                    Some(bsd) => bsd * (r / self.config.bsd_z) * (r / self.config.bsd_z),
                    None => match &d.backscatter_sd {
                        Some(sd) if sd[[i, l]].is_finite() => sd[[i, l]],
                        _ => 0.0,
                    },
                };
                mask[[i, l]] = if b - self.config.nsd * sd > self.threshold(r) {
                    MASK_CLOUD
                } else {
                    MASK_CLEAR
                };
            }
        }
        d.cloud_mask = Some(mask);
        d.meta
            .entry("cloud_mask".to_string())
            .or_insert_with(|| meta_for("cloud_mask"));
        Ok(vec![StreamItem::Chunk(d)])
    }
}
