//! Macro level exceptions
//!
//! A macro exception is raised by building a [`MacroException`] record and
//! returning it as [`EngineError::Thrown`]. It travels up the Rust call chain
//! like any other error until the interpreter finds a `Try` marker inside the
//! frame that is unwinding. There is no engine-wide "current exception"; the
//! record is copied into the engine's thrown-exception value only when a
//! catch block takes it.

use std::fmt;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::{ClassId, BAD_ID};

/// One raised macro exception
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroException {
    /// Class id of the error enum
    pub err_class_id: ClassId,
    /// Path of the class that threw
    pub src_class_path: String,
    /// Ordinal of the error enum item
    pub error_num: u32,
    /// `Enum.Item` name of the error
    pub error_name: String,
    /// Message with tokens already substituted
    pub error_text: String,
    /// Source line current when thrown
    pub line: u32,
}

impl MacroException {
    /// Create an exception record
    pub fn new(
        err_class_id: ClassId,
        src_class_path: impl Into<String>,
        error_num: u32,
        error_name: impl Into<String>,
        error_text: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            err_class_id,
            src_class_path: src_class_path.into(),
            error_num,
            error_name: error_name.into(),
            error_text: error_text.into(),
            line,
        }
    }

    /// True if this is the given error of the given enum
    #[inline]
    pub fn check(&self, err_class_id: ClassId, error_num: u32) -> bool {
        self.err_class_id == err_class_id && self.error_num == error_num
    }

    /// True if this is an error of the given enum past the given ordinal
    #[inline]
    pub fn check_greater(&self, err_class_id: ClassId, error_num: u32) -> bool {
        self.err_class_id == err_class_id && self.error_num > error_num
    }

    /// Multi-line rendering used by debuggers and error reports
    pub fn long_format(&self) -> String {
        format!(
            "Class: {}\nError: {}\nError Text: {}\nLine: {}",
            self.src_class_path, self.error_name, self.error_text, self.line
        )
    }
}

impl Default for MacroException {
    fn default() -> Self {
        Self {
            err_class_id: BAD_ID,
            src_class_path: String::new(),
            error_num: u32::MAX,
            error_name: String::new(),
            error_text: String::new(),
            line: 0,
        }
    }
}

impl fmt::Display for MacroException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, line {}): {}",
            self.error_name, self.src_class_path, self.line, self.error_text
        )
    }
}

// ============================================================================
// Token replacement
// ============================================================================

/// Replace `%(1)` through `%(9)` in `template` with `values[0..]`
///
/// Tokens without a matching value are left in place so a short value list
/// is visible in the resulting text.
pub fn replace_tokens(template: &str, values: &[String]) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 3 < bytes.len()
            && bytes[i + 1] == b'('
            && bytes[i + 2].is_ascii_digit()
            && bytes[i + 3] == b')'
        {
            let token = usize::from(bytes[i + 2] - b'0');
            if token > 0 {
                if let Some(value) = values.get(token - 1) {
                    out.push_str(value);
                    i += 4;
                    continue;
                }
            }
        }

        // Copy through one full character
        let ch_len = template[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&template[i..i + ch_len]);
        i += ch_len;
    }
    out
}

// ============================================================================
// Error enums
// ============================================================================

/// Handle to a class's nested error enum
///
/// Handlers keep one of these from `init` and use it to turn native failures
/// into macro exceptions attributed to their own class.
#[derive(Debug, Clone)]
pub struct ErrorEnum {
    class_id: ClassId,
    src_path: String,
}

impl ErrorEnum {
    /// Bind an error enum class to the class that throws it
    pub fn new(class_id: ClassId, src_path: impl Into<String>) -> Self {
        Self {
            class_id,
            src_path: src_path.into(),
        }
    }

    /// Error enum class id
    #[inline]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    /// Path of the class the errors are attributed to
    #[inline]
    pub fn src_path(&self) -> &str {
        &self.src_path
    }

    /// Throw with an explicit message
    pub fn throw(&self, engine: &Engine, ordinal: u32, text: impl Into<String>) -> EngineError {
        engine.raise(self.class_id, &self.src_path, ordinal, text)
    }

    /// Throw with the item's template text and token values
    pub fn throw_fmt(
        &self,
        engine: &Engine,
        ordinal: u32,
        tokens: &[&dyn fmt::Display],
    ) -> EngineError {
        engine.raise_fmt(self.class_id, &self.src_path, ordinal, tokens)
    }
}

impl Default for ErrorEnum {
    fn default() -> Self {
        Self {
            class_id: BAD_ID,
            src_path: String::new(),
        }
    }
}

// ============================================================================
// Reporting
// ============================================================================

/// When the engine tells its reporter about macro exceptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptReport {
    /// Report every exception as it is raised
    AtThrow,
    /// Report only exceptions that escape to the embedder
    #[default]
    NotHandled,
    /// Never report
    DontReport,
}

/// Embedder hook for exception reporting
pub trait ExceptionReporter: Send {
    /// Called with each reported exception
    fn report(&self, exception: &MacroException);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_tokens() {
        let text = replace_tokens(
            "No device with ids %(1)/%(2) was found",
            &["0x9999".to_string(), "0x0001".to_string()],
        );
        assert_eq!(text, "No device with ids 0x9999/0x0001 was found");
    }

    #[test]
    fn test_replace_tokens_repeated_and_missing() {
        let text = replace_tokens("%(1) and %(1) but not %(3)", &["x".to_string()]);
        assert_eq!(text, "x and x but not %(3)");
    }

    #[test]
    fn test_replace_tokens_passes_other_text() {
        assert_eq!(replace_tokens("100% (ok) é", &[]), "100% (ok) é");
        assert_eq!(replace_tokens("%(", &["a".to_string()]), "%(");
    }

    #[test]
    fn test_check_and_check_greater() {
        let exc = MacroException::new(12, "MEng.X", 3, "XErrors.C", "text", 5);
        assert!(exc.check(12, 3));
        assert!(!exc.check(12, 2));
        assert!(!exc.check(11, 3));
        assert!(exc.check_greater(12, 2));
        assert!(!exc.check_greater(12, 3));
        assert!(!exc.check_greater(13, 0));
    }

    #[test]
    fn test_long_format() {
        let exc = MacroException::new(1, "MEng.A", 0, "AErrors.Bad", "went wrong", 42);
        assert_eq!(
            exc.long_format(),
            "Class: MEng.A\nError: AErrors.Bad\nError Text: went wrong\nLine: 42"
        );
    }

    #[test]
    fn test_default_is_reset_state() {
        let exc = MacroException::default();
        assert_eq!(exc.err_class_id, BAD_ID);
        assert_eq!(exc.error_num, u32::MAX);
        assert!(exc.error_text.is_empty());
    }
}
