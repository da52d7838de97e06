//! Calibration-coefficient files: a JSON key-value record carrying at
//! least `calibration_coeff`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::prelude::{StageError, StageResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub calibration_coeff: f64,
}

/// Reads the calibration coefficient from `path`.
pub fn read_coeff(path: &Path) -> StageResult<f64> {
    let file = File::open(path)?;
    let record: CalibrationRecord = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| StageError::InvalidInput(format!("{}: {}", path.display(), e)))?;
    if !record.calibration_coeff.is_finite() || record.calibration_coeff <= 0.0 {
        return Err(StageError::InvalidInput(format!(
            "{}: calibration_coeff must be positive",
            path.display()
        )));
    }
    Ok(record.calibration_coeff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_coeff_parses_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"{\"calibration_coeff\": 1.2e-5}").unwrap();
        assert_eq!(read_coeff(&path).unwrap(), 1.2e-5);
    }

    #[test]
    fn read_coeff_rejects_non_positive_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"{\"calibration_coeff\": 0.0}").unwrap();
        assert!(read_coeff(&path).is_err());
    }
}
