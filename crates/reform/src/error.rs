//! Form error types

use thiserror::Error;

/// Errors surfaced by controls and validators.
///
/// These are implementation-level faults. Ordinary input problems are
/// reported as [`ValidationEvent`](crate::ValidationEvent)s, not errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    /// A validator failed to produce a result
    #[error("Validator failed: {0}")]
    Validator(String),

    /// A JSON pointer did not resolve to a control
    #[error("No control at path: {0}")]
    UnknownPath(String),

    /// A JSON value could not be converted into a control value
    #[error("Cannot convert value at '{pointer}': {message}")]
    Conversion { pointer: String, message: String },

    /// The operation targeted a control that has been disposed
    #[error("Control has been disposed")]
    Disposed,
}

impl FormError {
    /// Prefix the pointer of a conversion or path error with a parent segment
    pub fn nest(self, segment: &str) -> Self {
        let segment = escape_segment(segment);
        match self {
            FormError::Conversion { pointer, message } => FormError::Conversion {
                pointer: format!("/{segment}{pointer}"),
                message,
            },
            FormError::UnknownPath(pointer) => FormError::UnknownPath(format!("/{segment}{pointer}")),
            other => other,
        }
    }

    pub(crate) fn conversion(error: serde_json::Error) -> Self {
        FormError::Conversion {
            pointer: String::new(),
            message: error.to_string(),
        }
    }
}

/// Escape a key for use as a JSON pointer segment
pub(crate) fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Result type for form operations
pub type Result<T> = std::result::Result<T, FormError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nest_builds_pointer_outward() {
        let err = FormError::Conversion {
            pointer: String::new(),
            message: "expected a string".into(),
        };
        let nested = err.nest("street").nest("address");

        assert_eq!(
            nested.to_string(),
            "Cannot convert value at '/address/street': expected a string"
        );
    }

    #[test]
    fn test_nest_escapes_segments() {
        let nested = FormError::UnknownPath(String::new()).nest("a/b~c");
        assert_eq!(nested, FormError::UnknownPath("/a~1b~0c".into()));
    }

    #[test]
    fn test_nest_leaves_other_variants() {
        assert_eq!(FormError::Disposed.nest("x"), FormError::Disposed);
    }
}
