use std::fmt::Display;
use std::path::Path;

use log::{info, warn};

pub struct LogManager;

impl LogManager {
    pub fn new() -> Self {
        Self
    }

    pub fn input(&self, path: &Path) {
        info!("<- {}", path.display());
    }

    pub fn output(&self, path: &Path) {
        info!("-> {}", path.display());
    }

    pub fn skip(&self, path: &Path, err: &dyn Display) {
        warn!("{}: {}", path.display(), err);
    }

    pub fn record(&self, message: &str) {
        info!("{}", message);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
