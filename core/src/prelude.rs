use crate::dataset::ProfileChunk;

/// One element of the profile stream passed between pipeline stages.
///
/// `End` is the explicit end-of-stream marker, propagated downstream by
/// every stage after it has flushed its buffered state. It is distinct
/// from a chunk with zero profiles, which means "nothing produced this
/// round, the stream continues".
#[derive(Debug, Clone)]
pub enum StreamItem {
    Chunk(ProfileChunk),
    End,
}

impl StreamItem {
    pub fn is_end(&self) -> bool {
        matches!(self, StreamItem::End)
    }
}

/// Common error type for pipeline construction and stage execution.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("missing required variable: {0}")]
    MissingVariable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type StageResult<T> = Result<T, StageError>;

/// Trait describing one stateful transform in the profile stream.
///
/// Implementations must consume items in order and may buffer any suffix
/// of the stream internally. On receiving [`StreamItem::End`] a stage must
/// flush everything it holds into final output chunks and re-emit the
/// marker as its last output item. Stages never reorder profiles; chunk
/// boundaries may be split or merged.
pub trait StreamTransform {
    fn push(&mut self, item: StreamItem) -> StageResult<Vec<StreamItem>>;
}
