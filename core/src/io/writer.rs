//! Terminal pipeline stage writing one file per output period.

use std::fs;
use std::path::PathBuf;

use crate::io::dataset_file;
use crate::prelude::{StageResult, StreamItem, StreamTransform};
use crate::telemetry::log::LogManager;
use crate::timeutil;

/// Writes each incoming chunk to the output directory, named from the
/// period's start instant (ISO 8601, colons stripped). Empty chunks are
/// dropped; nothing is forwarded downstream.
pub struct WriteStage {
    output: PathBuf,
    logger: LogManager,
}

impl WriteStage {
    pub fn new(output: PathBuf) -> Self {
        Self {
            output,
            logger: LogManager::new(),
        }
    }
}

impl StreamTransform for WriteStage {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>> {
        let d = match item {
            StreamItem::Chunk(d) => d,
            StreamItem::End => return Ok(vec![StreamItem::End]),
        };
        if d.is_empty() {
            return Ok(Vec::new());
        }
        let t0 = d.time_bnds[[0, 0]];
        let rounded = (t0 * timeutil::SECONDS_PER_DAY).round() / timeutil::SECONDS_PER_DAY;
        fs::create_dir_all(&self.output)?;
        let path = self
            .output
            .join(format!("{}.json", timeutil::file_stem(rounded)));
        dataset_file::write_chunk(&path, &d)?;
        self.logger.output(&path);
        Ok(Vec::new())
    }
}
