//! Engine configuration.

use std::env;

/// Default maximum length of a `Char` field.
pub const DEFAULT_CHAR_LENGTH: usize = 255;

/// Default cap on errors collected by one import.
pub const DEFAULT_IMPORT_ERROR_CAP: usize = 10;

/// Configuration shared by every environment built on one registry.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of errors a single `load` call reports.
    pub import_error_cap: usize,

    /// Whether every mutating call opens its own store session when the
    /// environment has none, so it is all-or-nothing. When disabled, a
    /// call that fails after its first flush keeps what it flushed.
    pub implicit_transactions: bool,

    /// Length used by `Field::char` when none is given.
    pub default_char_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            import_error_cap: DEFAULT_IMPORT_ERROR_CAP,
            implicit_transactions: true,
            default_char_length: DEFAULT_CHAR_LENGTH,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from `DOCSET_IMPORT_ERROR_CAP` and
    /// `DOCSET_IMPLICIT_TRANSACTIONS`. Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(cap) = env::var("DOCSET_IMPORT_ERROR_CAP")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            config.import_error_cap = cap;
        }
        if let Ok(value) = env::var("DOCSET_IMPLICIT_TRANSACTIONS") {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.implicit_transactions = true,
                "0" | "false" | "no" => config.implicit_transactions = false,
                _ => {}
            }
        }
        config
    }

    /// Sets the import error cap.
    #[must_use]
    pub const fn import_error_cap(mut self, cap: usize) -> Self {
        self.import_error_cap = cap;
        self
    }

    /// Sets whether mutating calls open implicit sessions.
    #[must_use]
    pub const fn implicit_transactions(mut self, value: bool) -> Self {
        self.implicit_transactions = value;
        self
    }

    /// Sets the default `Char` length.
    #[must_use]
    pub const fn default_char_length(mut self, length: usize) -> Self {
        self.default_char_length = length;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.import_error_cap, 10);
        assert!(config.implicit_transactions);
        assert_eq!(config.default_char_length, 255);
    }

    #[test]
    fn builder_pattern() {
        let config = EngineConfig::new()
            .import_error_cap(3)
            .implicit_transactions(false)
            .default_char_length(64);
        assert_eq!(config.import_error_cap, 3);
        assert!(!config.implicit_transactions);
        assert_eq!(config.default_char_length, 64);
    }
}
