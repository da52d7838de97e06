pub mod calibrate;
pub mod cloud;
pub mod cloud_base;
pub mod couple;
pub mod lidar_ratio;
pub mod noise;
pub mod output;
pub mod preprocess;
pub mod tsample;
pub mod zsample;

pub use calibrate::CalibrationStage;
pub use cloud::{CloudConfig, CloudStage};
pub use cloud_base::CloudBaseStage;
pub use couple::CoupleStage;
pub use lidar_ratio::LidarRatioStage;
pub use noise::{NoiseConfig, NoiseStage};
pub use output::{OccurrenceStage, WindowStage};
pub use preprocess::PreprocessStage;
pub use tsample::TSampleStage;
pub use zsample::ZSampleStage;

use crate::prelude::{StageResult, StreamItem, StreamTransform};

/// A fixed-order chain of stream transforms. Every output item of stage
/// `k` is fed to stage `k + 1` within the same call, so pushing a chunk
/// (or the end marker) drives the whole chain.
pub struct Pipeline {
    stages: Vec<Box<dyn StreamTransform>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn StreamTransform>>) -> Self {
        Self { stages }
    }

    pub fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        let mut items = vec![item];
        for stage in self.stages.iter_mut() {
            let mut next = Vec::new();
            for item in items {
                next.extend(stage.push(item)?);
            }
            items = next;
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Identity;

    #[test]
    fn pipeline_fans_items_through_all_stages() {
        let mut pipeline = Pipeline::new(vec![Box::new(Identity), Box::new(Identity)]);
        let out = pipeline.push(StreamItem::End).unwrap();
        assert!(matches!(out.as_slice(), [StreamItem::End]));
    }
}
