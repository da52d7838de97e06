pub mod interp;
pub mod stats;

pub use interp::InterpMode;
pub use stats::StatsHelper;
