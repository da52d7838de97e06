use ndarray::Array1;

use crate::dataset::{meta_for, ProfileChunk, MASK_CLOUD, MASK_MISSING};
use crate::prelude::{StageError, StageResult, StreamItem, StreamTransform};
use crate::timeutil::SECONDS_PER_DAY;

const BIN_EPS: f64 = 1e-6;

/// Groups resampled profiles into fixed-length output periods. A profile
/// belongs to exactly one period, decided solely by its time bin start.
/// The open period is buffered across chunks and emitted as one merged
/// chunk when a profile of a later period arrives, or on end-of-stream.
pub struct WindowStage {
    period: f64,
    align: bool,
    origin: Option<f64>,
    current: Option<(i64, ProfileChunk)>,
}

impl WindowStage {
    /// `period` is in seconds.
    pub fn new(period: f64, align: bool) -> StageResult<Self> {
        if !(period > 0.0) {
            return Err(StageError::Config(
                "output sampling period must be positive".into(),
            ));
        }
        Ok(Self {
            period: period / SECONDS_PER_DAY,
            align,
            origin: None,
            current: None,
        })
    }

    fn period_of(&self, t: f64) -> i64 {
        let origin = self.origin.unwrap_or(0.0);
        ((t - origin) / self.period + BIN_EPS).floor() as i64
    }
}

impl StreamTransform for WindowStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        match item {
            StreamItem::Chunk(d) => {
                if d.is_empty() {
                    return Ok(Vec::new());
                }
                if self.origin.is_none() {
                    self.origin = Some(if self.align { 0.0 } else { d.time_bnds[[0, 0]] });
                }
                let mut out = Vec::new();
                let n = d.len();
                let mut start = 0usize;
                while start < n {
                    let p = self.period_of(d.time_bnds[[start, 0]]);
                    let mut end = start + 1;
                    while end < n && self.period_of(d.time_bnds[[end, 0]]) == p {
                        end += 1;
                    }
                    let group = d.slice_profiles(start, end);
                    self.current = Some(match self.current.take() {
                        Some((cp, buf)) if cp == p => {
                            (p, ProfileChunk::concat(&[buf, group])?)
                        }
                        Some((_, buf)) => {
                            out.push(StreamItem::Chunk(buf));
                            (p, group)
                        }
                        None => (p, group),
                    });
                    start = end;
                }
                Ok(out)
            }
            StreamItem::End => {
                let mut out = Vec::new();
                if let Some((_, buf)) = self.current.take() {
                    out.push(StreamItem::Chunk(buf));
                }
                out.push(StreamItem::End);
                Ok(out)
            }
        }
    }
}

/// Computes the per-level cloud occurrence statistics of one output
/// period: the valid sample count `n` and the percentage of cloud-flagged
/// samples among them. Without a cloud mask, `n` counts valid
/// backscatter samples and occurrence is omitted.
pub struct OccurrenceStage;

impl StreamTransform for OccurrenceStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        let mut d = match item {
            StreamItem::Chunk(d) => d,
            StreamItem::End => return Ok(vec![StreamItem::End]),
        };
        let levels = d.levels();
        let nprof = d.len();
        match &d.cloud_mask {
            Some(mask) => {
                let mut counts = Array1::zeros(levels);
                let mut occurrence = Array1::from_elem(levels, f64::NAN);
                for l in 0..levels {
                    let mut valid = 0i64;
                    let mut cloud = 0i64;
                    for i in 0..nprof {
                        match mask[[i, l]] {
                            MASK_MISSING => {}
                            MASK_CLOUD => {
                                valid += 1;
                                cloud += 1;
                            }
                            _ => valid += 1,
                        }
                    }
                    counts[l] = valid;
                    if valid > 0 {
                        occurrence[l] = 100.0 * cloud as f64 / valid as f64;
                    }
                }
                d.n = Some(counts);
                d.cloud_occurrence = Some(occurrence);
                d.meta
                    .entry("cloud_occurrence".to_string())
                    .or_insert_with(|| meta_for("cloud_occurrence"));
            }
            None => {
                let mut counts = Array1::zeros(levels);
                for l in 0..levels {
                    counts[l] = (0..nprof)
                        .filter(|&i| d.backscatter[[i, l]].is_finite())
                        .count() as i64;
                }
                d.n = Some(counts);
            }
        }
        d.meta
            .entry("n".to_string())
            .or_insert_with(|| meta_for("n"));
        Ok(vec![StreamItem::Chunk(d)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::chunk::testutil::chunk;
    use crate::dataset::MASK_CLEAR;
    use ndarray::Array2;

    fn collect_chunks(items: Vec<StreamItem>) -> Vec<ProfileChunk> {
        items
            .into_iter()
            .filter_map(|i| match i {
                StreamItem::Chunk(d) => Some(d),
                StreamItem::End => None,
            })
            .collect()
    }

    #[test]
    fn windows_split_on_aligned_period_boundaries() {
        // 12 hourly profiles starting at noon: 12 in day 100, none beyond
        let t0 = 100.5;
        let d = chunk(t0, 16, 3600.0 / 86400.0, 50.0, 3);
        let mut stage = WindowStage::new(86400.0, true).unwrap();
        let mut out = collect_chunks(stage.push(StreamItem::Chunk(d)).unwrap());
        out.extend(collect_chunks(stage.push(StreamItem::End).unwrap()));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 12);
        assert_eq!(out[1].len(), 4);
        assert!((out[1].time_bnds[[0, 0]] - 101.0).abs() < 1e-9);
    }

    #[test]
    fn period_membership_follows_the_bin_start() {
        // a profile whose bin starts just before midnight belongs to the
        // earlier period even though it ends in the later one
        let d = chunk(100.0 + 86100.0 / 86400.0, 2, 600.0 / 86400.0, 50.0, 3);
        let mut stage = WindowStage::new(86400.0, true).unwrap();
        let mut out = collect_chunks(stage.push(StreamItem::Chunk(d)).unwrap());
        out.extend(collect_chunks(stage.push(StreamItem::End).unwrap()));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[1].len(), 1);
    }

    #[test]
    fn open_window_spans_chunk_boundaries() {
        let a = chunk(100.0, 3, 300.0 / 86400.0, 50.0, 3);
        let b = chunk(100.0 + 3.0 * 300.0 / 86400.0, 3, 300.0 / 86400.0, 50.0, 3);
        let mut stage = WindowStage::new(86400.0, true).unwrap();
        assert!(collect_chunks(stage.push(StreamItem::Chunk(a)).unwrap()).is_empty());
        assert!(collect_chunks(stage.push(StreamItem::Chunk(b)).unwrap()).is_empty());
        let out = collect_chunks(stage.push(StreamItem::End).unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 6);
    }

    #[test]
    fn occurrence_counts_cloud_against_valid_samples() {
        let mut d = chunk(100.0, 4, 300.0 / 86400.0, 50.0, 2);
        let mut mask = Array2::from_elem((4, 2), MASK_CLEAR);
        mask[[0, 0]] = MASK_CLOUD;
        mask[[1, 0]] = MASK_CLOUD;
        mask[[2, 0]] = MASK_MISSING;
        for i in 0..4 {
            mask[[i, 1]] = MASK_MISSING;
        }
        d.cloud_mask = Some(mask);
        let mut stage = OccurrenceStage;
        let out = collect_chunks(stage.push(StreamItem::Chunk(d)).unwrap());
        let d = &out[0];
        let n = d.n.as_ref().unwrap();
        let occ = d.cloud_occurrence.as_ref().unwrap();
        assert_eq!(n[0], 3);
        assert!((occ[0] - 100.0 * 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(n[1], 0);
        assert!(occ[1].is_nan());
    }

    #[test]
    fn occurrence_without_mask_counts_valid_backscatter() {
        let mut d = chunk(100.0, 3, 300.0 / 86400.0, 50.0, 2);
        d.backscatter[[1, 0]] = f64::NAN;
        let mut stage = OccurrenceStage;
        let out = collect_chunks(stage.push(StreamItem::Chunk(d)).unwrap());
        let d = &out[0];
        assert_eq!(d.n.as_ref().unwrap()[0], 2);
        assert!(d.cloud_occurrence.is_none());
    }
}
