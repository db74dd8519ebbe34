//! Engine configuration
//!
//! Options can be built in code or loaded from the `[engine]` table of a TOML
//! file:
//!
//! ```toml
//! [engine]
//! max_stack_depth = 4096
//! max_pooled_temps = 16
//! validation = true
//! except_report = "at_throw"
//! log_failures = true
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::exception::ExceptReport;
use crate::stack::DEFAULT_MAX_DEPTH;

/// Spare temps kept per class by default
pub const DEFAULT_MAX_POOLED_TEMPS: usize = 32;

/// Per-engine options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Maximum call stack depth in slots
    pub max_stack_depth: usize,

    /// Spare temps kept per class; extras are freed when popped
    pub max_pooled_temps: usize,

    /// Extra runtime checks on copies and stack access
    pub validation: bool,

    /// When the exception reporter is notified
    pub except_report: ExceptReport,

    /// Log native failures as they are turned into macro exceptions
    pub log_failures: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_stack_depth: DEFAULT_MAX_DEPTH,
            max_pooled_temps: DEFAULT_MAX_POOLED_TEMPS,
            validation: true,
            except_report: ExceptReport::default(),
            log_failures: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct OptionsFile {
    #[serde(default)]
    engine: EngineOptions,
}

impl EngineOptions {
    /// Load options from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load options from TOML text
    ///
    /// A missing `[engine]` table gives the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: OptionsFile = toml::from_str(content)?;
        file.engine.validate()?;
        Ok(file.engine)
    }

    /// Validate the options
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_stack_depth == 0 {
            return Err(ConfigError::Validation(
                "max_stack_depth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the maximum stack depth
    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    /// Set how many spare temps are kept per class
    pub fn with_max_pooled_temps(mut self, count: usize) -> Self {
        self.max_pooled_temps = count;
        self
    }

    /// Enable or disable extra runtime checks
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the exception report mode
    pub fn with_except_report(mut self, report: ExceptReport) -> Self {
        self.except_report = report;
        self
    }

    /// Enable or disable failure logging
    pub fn with_log_failures(mut self, log: bool) -> Self {
        self.log_failures = log;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.max_stack_depth, 64 * 1024);
        assert!(options.validation);
        assert_eq!(options.except_report, ExceptReport::NotHandled);
        assert!(!options.log_failures);
    }

    #[test]
    fn test_from_toml_str() {
        let options = EngineOptions::from_toml_str(
            r#"
[engine]
max_stack_depth = 128
max_pooled_temps = 4
except_report = "at_throw"
log_failures = true
"#,
        )
        .unwrap();
        assert_eq!(options.max_stack_depth, 128);
        assert_eq!(options.max_pooled_temps, 4);
        assert!(options.validation);
        assert_eq!(options.except_report, ExceptReport::AtThrow);
        assert!(options.log_failures);
    }

    #[test]
    fn test_missing_table_gives_defaults() {
        assert_eq!(EngineOptions::from_toml_str("").unwrap(), EngineOptions::default());
    }

    #[test]
    fn test_zero_depth_rejected() {
        let err = EngineOptions::from_toml_str("[engine]\nmax_stack_depth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_bad_toml() {
        let err = EngineOptions::from_toml_str("[engine\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nvalidation = false\nexcept_report = \"dont_report\"").unwrap();
        let options = EngineOptions::from_file(file.path()).unwrap();
        assert!(!options.validation);
        assert_eq!(options.except_report, ExceptReport::DontReport);

        let missing = EngineOptions::from_file(Path::new("/nonexistent/cml.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_builder_setters() {
        let options = EngineOptions::default()
            .with_max_stack_depth(32)
            .with_validation(false)
            .with_except_report(ExceptReport::AtThrow)
            .with_log_failures(true);
        assert_eq!(options.max_stack_depth, 32);
        assert!(!options.validation);
        assert!(options.log_failures);
        assert_eq!(options.max_pooled_temps, DEFAULT_MAX_POOLED_TEMPS);
        assert_eq!(EngineOptions::default().with_max_pooled_temps(0).max_pooled_temps, 0);
        assert!(options.validate().is_ok());
    }
}
