use crate::prelude::{StageResult, StreamItem, StreamTransform};
use crate::timeutil::SECONDS_PER_DAY;

/// First pipeline stage: re-checks the chunk invariants coming out of the
/// reader and applies the configured time shift to `time` and
/// `time_bnds`. Stateless, but implements the stream contract like every
/// other stage.
pub struct PreprocessStage {
    tshift: f64,
}

impl PreprocessStage {
    /// `tshift` is in seconds.
    pub fn new(tshift: f64) -> Self {
        Self {
            tshift: tshift / SECONDS_PER_DAY,
        }
    }
}

impl StreamTransform for PreprocessStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        let mut d = match item {
            StreamItem::Chunk(d) => d,
            StreamItem::End => return Ok(vec![StreamItem::End]),
        };
        d.validate()?;
        if self.tshift != 0.0 {
            let shift = self.tshift;
            d.time.mapv_inplace(|t| t + shift);
            d.time_bnds.mapv_inplace(|t| t + shift);
        }
        Ok(vec![StreamItem::Chunk(d)])
    }
}
