use ndarray::Array2;

use crate::dataset::{meta_for, ProfileChunk};
use crate::math::stats::StatsHelper;
use crate::prelude::{StageError, StageResult, StreamItem, StreamTransform};
use crate::timeutil::SECONDS_PER_DAY;

/// Options of the default noise removal algorithm.
#[derive(Debug, Clone)]
pub struct NoiseConfig {
    /// Sampling period for the noise estimate (seconds), independent of
    /// the final time resolution.
    pub sampling: f64,
    /// Align sampling periods to absolute multiples of the period.
    pub align: bool,
    /// Additional exponentially-decaying near-range noise: value at zero
    /// range and the range at which it decays to a half (m). `{0, 0}`
    /// disables the term.
    pub near_noise: [f64; 2],
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            sampling: 300.0,
            align: true,
            near_noise: [0.0, 0.0],
        }
    }
}

/// Estimates the noise floor from the top height bin, where signal is
/// assumed negligible, and subtracts it from `backscatter`.
///
/// Backscatter is range-corrected, so the top-bin noise mean and standard
/// deviation scale to other bins by `(r / r_top)^2`. The standard
/// deviation is stored as `backscatter_sd` for cloud detection. Profiles
/// of an unfinished sampling period are carried across chunk boundaries
/// and flushed on end-of-stream.
pub struct NoiseStage {
    sampling: f64,
    align: bool,
    near_scale: f64,
    near_half: f64,
    origin: Option<f64>,
    buf: Option<ProfileChunk>,
}

impl NoiseStage {
    pub fn new(config: NoiseConfig) -> StageResult<Self> {
        if !(config.sampling > 0.0) {
            return Err(StageError::Config(
                "noise removal sampling period must be positive".into(),
            ));
        }
        Ok(Self {
            sampling: config.sampling / SECONDS_PER_DAY,
            align: config.align,
            near_scale: config.near_noise[0],
            near_half: config.near_noise[1],
            origin: None,
            buf: None,
        })
    }

    fn period_of(&self, t: f64) -> i64 {
        let origin = self.origin.unwrap_or(0.0);
        ((t - origin) / self.sampling + 1e-6).floor() as i64
    }

    fn remove(&self, mut d: ProfileChunk) -> ProfileChunk {
        let n = d.len();
        let levels = d.levels();
        if levels == 0 || n == 0 {
            return d;
        }
        let top = levels - 1;
        let top_samples: Vec<f64> = (0..n).map(|i| d.backscatter[[i, top]]).collect();
        let mean = StatsHelper::nan_mean(&top_samples);
        let sd = StatsHelper::nan_sd(&top_samples);

        let mut sd_out = Array2::from_elem((n, levels), f64::NAN);
        for i in 0..n {
            let z = d.zfull.profile(i);
            let r_top = z[top] - d.altitude[i];
            for l in 0..levels {
                let r = z[l] - d.altitude[i];
                let scale = if r_top > 0.0 {
                    (r / r_top) * (r / r_top)
                } else {
                    1.0
                };
                let near = if self.near_scale > 0.0 && self.near_half > 0.0 {
                    self.near_scale * (-r.max(0.0) / self.near_half).exp2()
                } else {
                    0.0
                };
                let b = d.backscatter[[i, l]];
                if b.is_finite() {
                    let floor = if mean.is_finite() { mean * scale } else { 0.0 };
                    d.backscatter[[i, l]] = b - floor - near;
                }
                if sd.is_finite() {
                    sd_out[[i, l]] = sd * scale;
                }
            }
        }
        d.backscatter_sd = Some(sd_out);
        d.meta
            .entry("backscatter_sd".to_string())
            .or_insert_with(|| meta_for("backscatter_sd"));
        d
    }

    /// Emits the buffered profiles of every period before `open`, one
    /// chunk per period; `None` flushes everything.
    fn drain(&mut self, open: Option<i64>) -> StageResult<Vec<StreamItem>> {
        let buf = match self.buf.take() {
            Some(b) => b,
            None => return Ok(Vec::new()),
        };
        let n = buf.len();
        let periods: Vec<i64> = buf.time.iter().map(|&t| self.period_of(t)).collect();
        let cut = match open {
            Some(open) => periods.iter().position(|&p| p >= open).unwrap_or(n),
            None => n,
        };
        let mut out = Vec::new();
        let mut start = 0usize;
        while start < cut {
            let mut end = start + 1;
            while end < cut && periods[end] == periods[start] {
                end += 1;
            }
            out.push(StreamItem::Chunk(
                self.remove(buf.slice_profiles(start, end)),
            ));
            start = end;
        }
        if cut < n {
            self.buf = Some(buf.slice_profiles(cut, n));
        }
        Ok(out)
    }
}

impl StreamTransform for NoiseStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        match item {
            StreamItem::Chunk(d) => {
                if d.is_empty() {
                    return Ok(Vec::new());
                }
                if self.origin.is_none() {
                    self.origin = Some(if self.align { 0.0 } else { d.time[0] });
                }
                self.buf = Some(match self.buf.take() {
                    Some(buf) => ProfileChunk::concat(&[buf, d])?,
                    None => d,
                });
                let open = self
                    .buf
                    .as_ref()
                    .map(|b| self.period_of(b.time[b.len() - 1]));
                self.drain(open)
            }
            StreamItem::End => {
                let mut out = self.drain(None)?;
                out.push(StreamItem::End);
                Ok(out)
            }
        }
    }
}
