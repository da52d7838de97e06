use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::dataset::{meta_for, ExtraVar};
use crate::io::dataset_file;
use crate::math::interp::{edges_from_centers, regrid, InterpMode};
use crate::prelude::{StageError, StageResult, StreamItem, StreamTransform};

struct CoupledProfile {
    time: f64,
    zfull: Vec<f64>,
    backscatter: Vec<f64>,
}

/// Merges a second instrument's already-processed profiles onto the
/// primary grid. Coupled files are loaded incrementally so the buffer
/// only ever spans the primary chunk's time range; for each primary
/// profile the coupled backscatter is interpolated linearly in time and
/// regridded onto the primary heights, stored as `couple_backscatter`.
pub struct CoupleStage {
    files: VecDeque<PathBuf>,
    buf: VecDeque<CoupledProfile>,
    exhausted: bool,
    mode: InterpMode,
}

impl CoupleStage {
    pub fn new(path: &Path, mode: InterpMode) -> StageResult<Self> {
        let mut files: Vec<PathBuf> = if path.is_dir() {
            std::fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.is_file() && p.extension().map_or(false, |ext| ext == "json")
                })
                .collect()
        } else {
            vec![path.to_path_buf()]
        };
        files.sort();
        if files.is_empty() {
            return Err(StageError::Config(format!(
                "no coupled data found in {}",
                path.display()
            )));
        }
        Ok(Self {
            files: files.into(),
            buf: VecDeque::new(),
            exhausted: false,
            mode,
        })
    }

    fn ensure_coverage(&mut self, until: f64) -> StageResult<()> {
        while !self.exhausted && self.buf.back().map_or(true, |p| p.time < until) {
            match self.files.pop_front() {
                Some(file) => {
                    let d = dataset_file::read_chunk(&file)?;
                    for i in 0..d.len() {
                        self.buf.push_back(CoupledProfile {
                            time: d.time[i],
                            zfull: d.zfull.profile(i).to_vec(),
                            backscatter: d.backscatter.row(i).to_vec(),
                        });
                    }
                }
                None => self.exhausted = true,
            }
        }
        Ok(())
    }

    fn trim(&mut self, before: f64) {
        while self.buf.len() > 1 && self.buf[1].time < before {
            self.buf.pop_front();
        }
    }

    /// Coupled backscatter at time `t` on the coupled native grid.
    fn at_time(&self, t: f64) -> Option<(Vec<f64>, Vec<f64>)> {
        let first = self.buf.front()?;
        let last = self.buf.back()?;
        if t < first.time || t > last.time {
            return None;
        }
        let j = self
            .buf
            .partition_point(|p| p.time < t);
        if j < self.buf.len() && self.buf[j].time == t {
            let p = &self.buf[j];
            return Some((p.zfull.clone(), p.backscatter.clone()));
        }
        let (a, b) = (&self.buf[j - 1], &self.buf[j]);
        let w = (t - a.time) / (b.time - a.time);
        if a.zfull.len() != b.zfull.len() {
            // differing grids: take the nearest profile
            let p = if w < 0.5 { a } else { b };
            return Some((p.zfull.clone(), p.backscatter.clone()));
        }
        let values = a
            .backscatter
            .iter()
            .zip(&b.backscatter)
            .map(|(&va, &vb)| {
                if va.is_finite() && vb.is_finite() {
                    va + (vb - va) * w
                } else {
                    f64::NAN
                }
            })
            .collect();
        Some((a.zfull.clone(), values))
    }
}

impl StreamTransform for CoupleStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        let mut d = match item {
            StreamItem::Chunk(d) => d,
            StreamItem::End => return Ok(vec![StreamItem::End]),
        };
        if d.is_empty() {
            return Ok(Vec::new());
        }
        let n = d.len();
        let levels = d.levels();
        self.ensure_coverage(d.time[n - 1])?;
        self.trim(d.time[0]);
        let mut coupled = Array2::from_elem((n, levels), f64::NAN);
        for i in 0..n {
            let (zc, values) = match self.at_time(d.time[i]) {
                Some(v) => v,
                None => continue,
            };
            let target: Vec<f64> = d.zfull.profile(i).to_vec();
            let target_edges = edges_from_centers(&target);
            let row = regrid(self.mode, &zc, &values, &target, &target_edges);
            coupled.row_mut(i).assign(&row);
        }
        d.extra
            .insert("couple_backscatter".to_string(), ExtraVar::Gridded(coupled));
        d.meta
            .entry("couple_backscatter".to_string())
            .or_insert_with(|| meta_for("couple_backscatter"));
        Ok(vec![StreamItem::Chunk(d)])
    }
}
