use ndarray::Array1;

use crate::dataset::meta_for;
use crate::math::interp::edges_from_centers;
use crate::prelude::{StageResult, StreamItem, StreamTransform};

/// Derives the effective extinction-to-backscatter ratio of each profile
/// from the height-integrated calibrated backscatter, with the molecular
/// reference subtracted when present: `lr = 1 / (2 integral(b dz))`.
/// A diagnostic enrichment with no internal buffering.
pub struct LidarRatioStage;

impl StreamTransform for LidarRatioStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        let mut d = match item {
            StreamItem::Chunk(d) => d,
            StreamItem::End => return Ok(vec![StreamItem::End]),
        };
        let n = d.len();
        let levels = d.levels();
        let mut lr = Array1::from_elem(n, f64::NAN);
        for i in 0..n {
            let z = d.zfull.profile(i).to_vec();
            let edges = edges_from_centers(&z);
            let mut integral = 0.0;
            let mut any = false;
            for l in 0..levels {
                let mut b = d.backscatter[[i, l]];
                if !b.is_finite() {
                    continue;
                }
                if let Some(mol) = &d.backscatter_mol {
                    if mol[[i, l]].is_finite() {
                        b -= mol[[i, l]];
                    }
                }
                integral += b * (edges[l + 1] - edges[l]);
                any = true;
            }
            if any && integral > 0.0 {
                lr[i] = 1.0 / (2.0 * integral);
            }
        }
        d.lr = Some(lr);
        d.meta
            .entry("lr".to_string())
            .or_insert_with(|| meta_for("lr"));
        Ok(vec![StreamItem::Chunk(d)])
    }
}
