pub mod chunk;
pub mod meta;

pub use chunk::{ExtraVar, ProfileChunk, ZGrid, MASK_CLEAR, MASK_CLOUD, MASK_MISSING};
pub use meta::{canonical_meta, meta_for, VarMeta};
