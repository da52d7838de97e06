//! String-keyed algorithm selection.
//!
//! Each pluggable stage resolves its algorithm name to a stream
//! transform; `none` maps to the identity transform, never a missing
//! stage. Unknown names fail at pipeline construction, before any file
//! is read.

use crate::prelude::{StageError, StageResult, StreamItem, StreamTransform};
use crate::stages::{
    CalibrationStage, CloudBaseStage, CloudConfig, CloudStage, NoiseConfig, NoiseStage,
};

/// Pass-through transform backing every `none` selection.
pub struct Identity;

impl StreamTransform for Identity {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        Ok(vec![item])
    }
}

pub fn noise_removal(name: &str, config: NoiseConfig) -> StageResult<Box<dyn StreamTransform>> {
    match name {
        "default" => Ok(Box::new(NoiseStage::new(config)?)),
        "none" => Ok(Box::new(Identity)),
        other => Err(StageError::Config(format!(
            "invalid noise removal algorithm: {}",
            other
        ))),
    }
}

pub fn calibration(name: &str, coeff: f64) -> StageResult<Box<dyn StreamTransform>> {
    match name {
        "default" => Ok(Box::new(CalibrationStage::new(coeff))),
        "none" => Ok(Box::new(Identity)),
        other => Err(StageError::Config(format!(
            "invalid calibration algorithm: {}",
            other
        ))),
    }
}

pub fn cloud_detection(name: &str, config: CloudConfig) -> StageResult<Box<dyn StreamTransform>> {
    match name {
        "default" => Ok(Box::new(CloudStage::new(config)?)),
        "none" => Ok(Box::new(Identity)),
        other => Err(StageError::Config(format!(
            "invalid cloud detection algorithm: {}",
            other
        ))),
    }
}

pub fn cloud_base_detection(name: &str) -> StageResult<Box<dyn StreamTransform>> {
    match name {
        "default" => Ok(Box::new(CloudBaseStage)),
        "none" => Ok(Box::new(Identity)),
        other => Err(StageError::Config(format!(
            "invalid cloud base detection algorithm: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_algorithm_names_fail_at_construction() {
        assert!(matches!(
            noise_removal("median", NoiseConfig::default()),
            Err(StageError::Config(_))
        ));
        assert!(matches!(
            cloud_detection("gradient", CloudConfig::default()),
            Err(StageError::Config(_))
        ));
        assert!(matches!(
            cloud_base_detection("lowest"),
            Err(StageError::Config(_))
        ));
        assert!(matches!(calibration("auto", 1.0), Err(StageError::Config(_))));
    }

    #[test]
    fn none_selects_a_pass_through_stage() {
        let mut stage = noise_removal("none", NoiseConfig::default()).unwrap();
        let out = stage.push(StreamItem::End).unwrap();
        assert!(matches!(out.as_slice(), [StreamItem::End]));
    }
}
