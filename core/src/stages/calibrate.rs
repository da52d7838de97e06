use crate::prelude::{StageResult, StreamItem, StreamTransform};

/// Scales `backscatter` (and the molecular reference, if present) by a
/// constant calibration coefficient. Purely stateless per-chunk scaling.
pub struct CalibrationStage {
    coeff: f64,
}

impl CalibrationStage {
    pub fn new(coeff: f64) -> Self {
        Self { coeff }
    }
}

impl StreamTransform for CalibrationStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        let mut d = match item {
            StreamItem::Chunk(d) => d,
            StreamItem::End => return Ok(vec![StreamItem::End]),
        };
        if self.coeff != 1.0 {
            let c = self.coeff;
            d.backscatter.mapv_inplace(|v| v * c);
            if let Some(mol) = d.backscatter_mol.as_mut() {
                mol.mapv_inplace(|v| v * c);
            }
        }
        Ok(vec![StreamItem::Chunk(d)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::chunk::testutil::chunk;

    #[test]
    fn calibration_scales_backscatter() {
        let mut stage = CalibrationStage::new(2.0);
        let d = chunk(0.0, 2, 300.0 / 86400.0, 50.0, 3);
        let expected = d.backscatter[[0, 0]] * 2.0;
        let out = stage.push(StreamItem::Chunk(d)).unwrap();
        match &out[0] {
            StreamItem::Chunk(d) => assert_eq!(d.backscatter[[0, 0]], expected),
            StreamItem::End => panic!("expected a chunk"),
        }
    }

    #[test]
    fn calibration_preserves_missing_values() {
        let mut stage = CalibrationStage::new(3.0);
        let mut d = chunk(0.0, 2, 300.0 / 86400.0, 50.0, 3);
        d.backscatter[[1, 1]] = f64::NAN;
        let out = stage.push(StreamItem::Chunk(d)).unwrap();
        match &out[0] {
            StreamItem::Chunk(d) => assert!(d.backscatter[[1, 1]].is_nan()),
            StreamItem::End => panic!("expected a chunk"),
        }
    }
}
