use ndarray::Array1;

use crate::dataset::{meta_for, MASK_CLOUD};
use crate::prelude::{StageResult, StreamItem, StreamTransform};

/// Derives the cloud base height of each profile: the height of the
/// lowest cloud-flagged bin, or missing when no bin is flagged (an
/// explicit no-cloud marker, never zero). Chunks without a cloud mask
/// pass through unchanged.
pub struct CloudBaseStage;

impl StreamTransform for CloudBaseStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        let mut d = match item {
            StreamItem::Chunk(d) => d,
            StreamItem::End => return Ok(vec![StreamItem::End]),
        };
        let mask = match &d.cloud_mask {
            Some(mask) => mask,
            None => return Ok(vec![StreamItem::Chunk(d)]),
        };
        let n = d.len();
        let levels = d.levels();
        let mut cbh = Array1::from_elem(n, f64::NAN);
        for i in 0..n {
            let z = d.zfull.profile(i);
            for l in 0..levels {
                if mask[[i, l]] == MASK_CLOUD {
                    cbh[i] = z[l];
                    break;
                }
            }
        }
        d.cbh = Some(cbh);
        d.meta
            .entry("cbh".to_string())
            .or_insert_with(|| meta_for("cbh"));
        Ok(vec![StreamItem::Chunk(d)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::chunk::testutil::chunk;
    use crate::dataset::{MASK_CLEAR, MASK_MISSING};
    use ndarray::Array2;

    #[test]
    fn cloud_base_is_the_lowest_flagged_bin() {
        let mut d = chunk(0.0, 2, 30.0 / 86400.0, 50.0, 5);
        let mut mask = Array2::from_elem((2, 5), MASK_CLEAR);
        mask[[0, 2]] = MASK_CLOUD;
        mask[[0, 4]] = MASK_CLOUD;
        mask[[1, 0]] = MASK_MISSING;
        d.cloud_mask = Some(mask);
        let mut stage = CloudBaseStage;
        let out = stage.push(StreamItem::Chunk(d)).unwrap();
        match &out[0] {
            StreamItem::Chunk(d) => {
                let cbh = d.cbh.as_ref().unwrap();
                assert_eq!(cbh[0], 125.0);
                assert!(cbh[1].is_nan());
            }
            StreamItem::End => panic!("expected a chunk"),
        }
    }
}
