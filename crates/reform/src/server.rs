//! Server error payloads
//!
//! Only the data shape lives here; fetching the payload is the caller's job.
//! Field messages are addressed by JSON pointer (`/address/street`,
//! `/items/0`) and applied with
//! [`AbstractControl::apply_server_errors`](crate::AbstractControl::apply_server_errors).

use crate::error::{FormError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Errors reported by a server for a submitted form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerErrors {
    /// Messages for the form as a whole (assigned to the root control)
    #[serde(default)]
    pub form: Vec<String>,
    /// Messages keyed by the JSON pointer of the offending control
    #[serde(default)]
    pub fields: IndexMap<String, Vec<String>>,
}

impl ServerErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a payload such as `{"form": [...], "fields": {"/name": [...]}}`
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        Self::deserialize(value).map_err(FormError::conversion)
    }

    pub fn with_form_error(mut self, message: impl Into<String>) -> Self {
        self.form.push(message.into());
        self
    }

    pub fn with_field_error(mut self, pointer: impl Into<String>, message: impl Into<String>) -> Self {
        self.fields
            .entry(pointer.into())
            .or_default()
            .push(message.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.form.is_empty() && self.fields.values().all(Vec::is_empty)
    }
}

/// Split a JSON pointer into unescaped segments.
///
/// The empty pointer addresses the root and yields no segments.
pub fn pointer_segments(pointer: &str) -> Result<Vec<String>> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(FormError::UnknownPath(pointer.to_string()));
    };
    Ok(rest
        .split('/')
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect())
}
