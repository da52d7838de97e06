pub mod calibration;
pub mod dataset_file;
pub mod reader;
pub mod writer;

pub use dataset_file::{read_chunk, write_chunk, DatasetFile, VarRecord};
pub use reader::{by_type, InstrumentReader, ReadOptions};
pub use writer::WriteStage;
