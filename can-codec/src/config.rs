//! Parser configuration
//!
//! Enforcement toggles for the decoder's data-quality checks. The defaults
//! verify everything; bench rigs replaying captured traffic with stale
//! counters can relax them per parser instance.

use serde::{Deserialize, Serialize};

/// Configuration for a [`CanParser`](crate::CanParser) instance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Skip checksum verification on frames whose message binds one
    #[serde(default)]
    pub ignore_checksum: bool,

    /// Skip rolling-counter verification
    #[serde(default)]
    pub ignore_counter: bool,
}

impl ParserConfig {
    /// Create a configuration with every check enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: disable checksum verification
    pub fn with_ignore_checksum(mut self, ignore: bool) -> Self {
        self.ignore_checksum = ignore;
        self
    }

    /// Builder method: disable counter verification
    pub fn with_ignore_counter(mut self, ignore: bool) -> Self {
        self.ignore_counter = ignore;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ParserConfig::new()
            .with_ignore_checksum(true)
            .with_ignore_counter(false);
        assert!(config.ignore_checksum);
        assert!(!config.ignore_counter);

        let defaults = ParserConfig::default();
        assert!(!defaults.ignore_checksum);
        assert!(!defaults.ignore_counter);
    }
}
