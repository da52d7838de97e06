use std::collections::BTreeMap;

use ndarray::{Array1, Array2};

use crate::dataset::{ExtraVar, ProfileChunk, VarMeta, ZGrid};
use crate::prelude::{StageError, StageResult, StreamItem, StreamTransform};
use crate::timeutil::SECONDS_PER_DAY;

/// Guard against edge rounding when assigning times to bins, as a
/// fraction of the bin width.
const BIN_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Default)]
struct ScalarAcc {
    sum: f64,
    w: f64,
}

impl ScalarAcc {
    fn add(&mut self, v: f64, w: f64) {
        if v.is_finite() {
            self.sum += v * w;
            self.w += w;
        }
    }

    fn mean(&self) -> f64 {
        if self.w > 0.0 {
            self.sum / self.w
        } else {
            f64::NAN
        }
    }
}

#[derive(Debug, Clone)]
struct VecAcc {
    sum: Vec<f64>,
    w: Vec<f64>,
}

impl VecAcc {
    fn new(levels: usize) -> Self {
        Self {
            sum: vec![0.0; levels],
            w: vec![0.0; levels],
        }
    }

    fn add(&mut self, values: &[f64], w: f64) {
        for (l, &v) in values.iter().enumerate() {
            if v.is_finite() {
                self.sum[l] += v * w;
                self.w[l] += w;
            }
        }
    }

    fn mean(&self) -> Vec<f64> {
        self.sum
            .iter()
            .zip(&self.w)
            .map(|(&s, &w)| if w > 0.0 { s / w } else { f64::NAN })
            .collect()
    }
}

/// Standard deviations of independent noise combine under a weighted
/// mean as sqrt(sum(w^2 sd^2)) / sum(w).
#[derive(Debug, Clone)]
struct SdAcc {
    sum_sq: Vec<f64>,
    w: Vec<f64>,
}

impl SdAcc {
    fn new(levels: usize) -> Self {
        Self {
            sum_sq: vec![0.0; levels],
            w: vec![0.0; levels],
        }
    }

    fn add(&mut self, values: &[f64], w: f64) {
        for (l, &v) in values.iter().enumerate() {
            if v.is_finite() {
                self.sum_sq[l] += w * w * v * v;
                self.w[l] += w;
            }
        }
    }

    fn combined(&self) -> Vec<f64> {
        self.sum_sq
            .iter()
            .zip(&self.w)
            .map(|(&s, &w)| if w > 0.0 { s.sqrt() / w } else { f64::NAN })
            .collect()
    }
}

#[derive(Debug, Clone)]
enum ExtraAcc {
    Profile(ScalarAcc),
    Gridded(VecAcc),
}

#[derive(Debug, Clone)]
struct BinAcc {
    backscatter: VecAcc,
    mol: Option<VecAcc>,
    sd: Option<SdAcc>,
    altitude: ScalarAcc,
    lon: ScalarAcc,
    lat: ScalarAcc,
    extra: BTreeMap<String, ExtraAcc>,
}

/// Per-run layout captured from the first chunk; later chunks must match.
struct Template {
    zfull: Array1<f64>,
    has_mol: bool,
    has_sd: bool,
    extra: Vec<(String, bool)>,
    meta: BTreeMap<String, VarMeta>,
}

impl Template {
    fn new_bin(&self) -> BinAcc {
        let levels = self.zfull.len();
        BinAcc {
            backscatter: VecAcc::new(levels),
            mol: self.has_mol.then(|| VecAcc::new(levels)),
            sd: self.has_sd.then(|| SdAcc::new(levels)),
            altitude: ScalarAcc::default(),
            lon: ScalarAcc::default(),
            lat: ScalarAcc::default(),
            extra: self
                .extra
                .iter()
                .map(|(name, gridded)| {
                    let acc = if *gridded {
                        ExtraAcc::Gridded(VecAcc::new(levels))
                    } else {
                        ExtraAcc::Profile(ScalarAcc::default())
                    };
                    (name.clone(), acc)
                })
                .collect(),
        }
    }
}

/// Regrids profiles onto a uniform time grid at `tres`, left-closed
/// right-open bins, optionally aligned to multiples of `tres` from the
/// epoch. Profiles contribute to bins by the overlap of their bounds
/// with the bin; bins with no contribution inside the observed span are
/// emitted as missing rows. The trailing partial bin is held in state
/// until a profile starts at or beyond its upper edge, or the stream
/// ends.
pub struct TSampleStage {
    tres: f64,
    align: bool,
    origin: Option<f64>,
    next_emit: Option<i64>,
    bins: BTreeMap<i64, BinAcc>,
    template: Option<Template>,
}

impl TSampleStage {
    /// `tres` is in seconds.
    pub fn new(tres: f64, align: bool) -> StageResult<Self> {
        if !(tres > 0.0) {
            return Err(StageError::Config(
                "time resolution must be positive".into(),
            ));
        }
        Ok(Self {
            tres: tres / SECONDS_PER_DAY,
            align,
            origin: None,
            next_emit: None,
            bins: BTreeMap::new(),
            template: None,
        })
    }

    fn bin_of(&self, t: f64) -> i64 {
        let origin = self.origin.unwrap_or(0.0);
        ((t - origin) / self.tres + BIN_EPS).floor() as i64
    }

    fn edge(&self, k: i64) -> f64 {
        self.origin.unwrap_or(0.0) + k as f64 * self.tres
    }

    fn check_template(&mut self, d: &ProfileChunk) -> StageResult<()> {
        let zfull = match &d.zfull {
            ZGrid::Common(z) => z.clone(),
            ZGrid::PerProfile(_) => {
                return Err(StageError::InvalidInput(
                    "time resampling requires a common height grid".into(),
                ))
            }
        };
        match &self.template {
            None => {
                self.template = Some(Template {
                    zfull,
                    has_mol: d.backscatter_mol.is_some(),
                    has_sd: d.backscatter_sd.is_some(),
                    extra: d
                        .extra
                        .iter()
                        .map(|(name, var)| {
                            (name.clone(), matches!(var, ExtraVar::Gridded(_)))
                        })
                        .collect(),
                    meta: d.meta.clone(),
                });
                Ok(())
            }
            Some(t) => {
                if t.zfull != zfull {
                    return Err(StageError::InvalidInput(
                        "height grid changed across chunks".into(),
                    ));
                }
                if t.has_mol != d.backscatter_mol.is_some()
                    || t.has_sd != d.backscatter_sd.is_some()
                {
                    return Err(StageError::InvalidInput(
                        "variable set changed across chunks".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    fn accumulate(&mut self, d: &ProfileChunk) -> StageResult<()> {
        let n = d.len();
        for i in 0..n {
            let t0 = d.time_bnds[[i, 0]];
            let t1 = d.time_bnds[[i, 1]];
            if t1 <= t0 {
                let k = self.bin_of(d.time[i]);
                self.add_profile(d, i, k, 1.0)?;
                continue;
            }
            let mut k = self.bin_of(t0);
            while self.edge(k) < t1 {
                let lo = t0.max(self.edge(k));
                let hi = t1.min(self.edge(k + 1));
                let w = hi - lo;
                if w > self.tres * BIN_EPS {
                    self.add_profile(d, i, k, w)?;
                }
                k += 1;
            }
        }
        Ok(())
    }

    fn add_profile(&mut self, d: &ProfileChunk, i: usize, k: i64, w: f64) -> StageResult<()> {
        if !self.bins.contains_key(&k) {
            let bin = match &self.template {
                Some(t) => t.new_bin(),
                None => return Err(StageError::Internal("stage not initialized".into())),
            };
            self.bins.insert(k, bin);
        }
        let bin = match self.bins.get_mut(&k) {
            Some(bin) => bin,
            None => return Err(StageError::Internal("bin vanished".into())),
        };
        let row: Vec<f64> = d.backscatter.row(i).to_vec();
        bin.backscatter.add(&row, w);
        if let (Some(acc), Some(mol)) = (bin.mol.as_mut(), d.backscatter_mol.as_ref()) {
            acc.add(&mol.row(i).to_vec(), w);
        }
        if let (Some(acc), Some(sd)) = (bin.sd.as_mut(), d.backscatter_sd.as_ref()) {
            acc.add(&sd.row(i).to_vec(), w);
        }
        bin.altitude.add(d.altitude[i], w);
        bin.lon.add(d.lon[i], w);
        bin.lat.add(d.lat[i], w);
        for (name, acc) in bin.extra.iter_mut() {
            match (acc, d.extra.get(name)) {
                (ExtraAcc::Profile(a), Some(ExtraVar::Profile(v))) => a.add(v[i], w),
                (ExtraAcc::Gridded(a), Some(ExtraVar::Gridded(v))) => {
                    a.add(&v.row(i).to_vec(), w)
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Builds the output chunk for bins `first..last` (exclusive),
    /// consuming their accumulators; bins without one become missing rows.
    fn emit_range(&mut self, first: i64, last: i64) -> StageResult<ProfileChunk> {
        let template = match &self.template {
            Some(t) => t,
            None => return Err(StageError::Internal("stage not initialized".into())),
        };
        let levels = template.zfull.len();
        let n = (last - first) as usize;
        let mut time = Array1::zeros(n);
        let mut time_bnds = Array2::zeros((n, 2));
        let mut backscatter = Array2::from_elem((n, levels), f64::NAN);
        let mut mol = template
            .has_mol
            .then(|| Array2::from_elem((n, levels), f64::NAN));
        let mut sd = template
            .has_sd
            .then(|| Array2::from_elem((n, levels), f64::NAN));
        let mut altitude = Array1::from_elem(n, f64::NAN);
        let mut lon = Array1::from_elem(n, f64::NAN);
        let mut lat = Array1::from_elem(n, f64::NAN);
        let mut extra: BTreeMap<String, ExtraVar> = template
            .extra
            .iter()
            .map(|(name, gridded)| {
                let var = if *gridded {
                    ExtraVar::Gridded(Array2::from_elem((n, levels), f64::NAN))
                } else {
                    ExtraVar::Profile(Array1::from_elem(n, f64::NAN))
                };
                (name.clone(), var)
            })
            .collect();

        for (row, k) in (first..last).enumerate() {
            let t0 = self.edge(k);
            let t1 = self.edge(k + 1);
            time[row] = t0 + self.tres / 2.0;
            time_bnds[[row, 0]] = t0;
            time_bnds[[row, 1]] = t1;
            let bin = match self.bins.remove(&k) {
                Some(bin) => bin,
                None => continue,
            };
            for (l, v) in bin.backscatter.mean().into_iter().enumerate() {
                backscatter[[row, l]] = v;
            }
            if let (Some(out), Some(acc)) = (mol.as_mut(), bin.mol.as_ref()) {
                for (l, v) in acc.mean().into_iter().enumerate() {
                    out[[row, l]] = v;
                }
            }
            if let (Some(out), Some(acc)) = (sd.as_mut(), bin.sd.as_ref()) {
                for (l, v) in acc.combined().into_iter().enumerate() {
                    out[[row, l]] = v;
                }
            }
            altitude[row] = bin.altitude.mean();
            lon[row] = bin.lon.mean();
            lat[row] = bin.lat.mean();
            for (name, acc) in bin.extra.iter() {
                match (acc, extra.get_mut(name)) {
                    (ExtraAcc::Profile(a), Some(ExtraVar::Profile(v))) => {
                        v[row] = a.mean();
                    }
                    (ExtraAcc::Gridded(a), Some(ExtraVar::Gridded(v))) => {
                        for (l, x) in a.mean().into_iter().enumerate() {
                            v[[row, l]] = x;
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(ProfileChunk {
            time,
            time_bnds,
            zfull: ZGrid::Common(template.zfull.clone()),
            altitude,
            lon,
            lat,
            backscatter,
            backscatter_mol: mol,
            backscatter_sd: sd,
            cloud_mask: None,
            cbh: None,
            lr: None,
            cloud_occurrence: None,
            n: None,
            extra,
            meta: template.meta.clone(),
        })
    }
}

impl StreamTransform for TSampleStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        match item {
            StreamItem::Chunk(d) => {
                if d.is_empty() {
                    return Ok(Vec::new());
                }
                if self.origin.is_none() {
                    self.origin = Some(if self.align { 0.0 } else { d.time_bnds[[0, 0]] });
                }
                self.check_template(&d)?;
                self.accumulate(&d)?;
                let open = self.bin_of(d.time_bnds[[d.len() - 1, 0]]);
                let first = match self.bins.keys().next() {
                    Some(&k) => k,
                    None => return Ok(Vec::new()),
                };
                let start = self.next_emit.unwrap_or(first);
                if start >= open {
                    if self.next_emit.is_none() {
                        self.next_emit = Some(start);
                    }
                    return Ok(Vec::new());
                }
                self.next_emit = Some(open);
                Ok(vec![StreamItem::Chunk(self.emit_range(start, open)?)])
            }
            StreamItem::End => {
                let mut out = Vec::new();
                if let (Some(&first), Some(&last)) =
                    (self.bins.keys().next(), self.bins.keys().next_back())
                {
                    let start = self.next_emit.unwrap_or(first);
                    out.push(StreamItem::Chunk(self.emit_range(start, last + 1)?));
                }
                self.bins.clear();
                self.next_emit = None;
                out.push(StreamItem::End);
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::chunk::testutil::chunk;

    fn collect_chunks(items: Vec<StreamItem>) -> Vec<ProfileChunk> {
        items
            .into_iter()
            .filter_map(|i| match i {
                StreamItem::Chunk(d) => Some(d),
                StreamItem::End => None,
            })
            .collect()
    }

    fn run_all(stage: &mut TSampleStage, chunks: Vec<ProfileChunk>) -> ProfileChunk {
        let mut out = Vec::new();
        for d in chunks {
            out.extend(collect_chunks(stage.push(StreamItem::Chunk(d)).unwrap()));
        }
        out.extend(collect_chunks(stage.push(StreamItem::End).unwrap()));
        ProfileChunk::concat(&out).unwrap()
    }

    #[test]
    fn resampling_a_uniform_grid_is_idempotent() {
        // input already on an aligned 300 s grid
        let d = chunk(100.0, 12, 300.0 / 86400.0, 50.0, 5);
        let mut stage = TSampleStage::new(300.0, true).unwrap();
        let out = run_all(&mut stage, vec![d.clone()]);
        assert_eq!(out.len(), d.len());
        for i in 0..d.len() {
            assert!((out.time[i] - d.time[i]).abs() < 1e-9);
            assert!((out.time_bnds[[i, 0]] - d.time_bnds[[i, 0]]).abs() < 1e-9);
            for l in 0..d.levels() {
                assert!((out.backscatter[[i, l]] - d.backscatter[[i, l]]).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn profiles_in_one_bin_are_averaged() {
        // 10 profiles at 30 s fill one 300 s bin
        let mut d = chunk(100.0, 10, 30.0 / 86400.0, 50.0, 3);
        for i in 0..10 {
            d.backscatter[[i, 0]] = i as f64;
        }
        let mut stage = TSampleStage::new(300.0, false).unwrap();
        let out = run_all(&mut stage, vec![d]);
        assert_eq!(out.len(), 1);
        assert!((out.backscatter[[0, 0]] - 4.5).abs() < 1e-9);
    }

    #[test]
    fn chunk_boundary_does_not_change_the_result() {
        let d = chunk(100.0, 20, 45.0 / 86400.0, 50.0, 4);
        let mut whole = TSampleStage::new(300.0, true).unwrap();
        let expected = run_all(&mut whole, vec![d.clone()]);
        for cut in [1, 7, 13, 19] {
            let mut split = TSampleStage::new(300.0, true).unwrap();
            let parts = vec![d.slice_profiles(0, cut), d.slice_profiles(cut, d.len())];
            let got = run_all(&mut split, parts);
            assert_eq!(got.len(), expected.len(), "cut at {}", cut);
            for i in 0..got.len() {
                for l in 0..got.levels() {
                    let (a, b) = (got.backscatter[[i, l]], expected.backscatter[[i, l]]);
                    assert!(
                        (a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-12,
                        "cut {} profile {} level {}",
                        cut,
                        i,
                        l
                    );
                }
            }
        }
    }

    #[test]
    fn gaps_inside_the_span_become_missing_rows() {
        let a = chunk(100.0, 2, 300.0 / 86400.0, 50.0, 3);
        // second chunk starts 3 bins later
        let b = chunk(100.0 + 5.0 * 300.0 / 86400.0, 2, 300.0 / 86400.0, 50.0, 3);
        let mut stage = TSampleStage::new(300.0, true).unwrap();
        let out = run_all(&mut stage, vec![a, b]);
        assert_eq!(out.len(), 7);
        assert!(out.backscatter[[0, 0]].is_finite());
        assert!(out.backscatter[[3, 0]].is_nan());
        assert!(out.lon[3].is_nan());
        assert!(out.backscatter[[5, 0]].is_finite());
    }

    #[test]
    fn noise_sd_combines_as_independent_noise() {
        let mut d = chunk(100.0, 4, 30.0 / 86400.0, 50.0, 2);
        d.backscatter_sd = Some(Array2::from_elem((4, 2), 1e-6));
        let mut stage = TSampleStage::new(300.0, false).unwrap();
        let out = run_all(&mut stage, vec![d]);
        let sd = out.backscatter_sd.as_ref().unwrap();
        // four equal-weight profiles: sd of the mean is sd / 2
        assert!((sd[[0, 0]] - 0.5e-6).abs() < 1e-12);
    }

    #[test]
    fn time_bounds_invariant_holds_on_output() {
        let d = chunk(100.0, 17, 47.0 / 86400.0, 50.0, 3);
        let mut stage = TSampleStage::new(300.0, true).unwrap();
        let out = run_all(&mut stage, vec![d]);
        out.validate().unwrap();
    }
}
