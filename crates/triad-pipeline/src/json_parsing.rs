//! Thin bridge from `triad_providers::json_extract` to a `ClassifiedError`
//! a stage's `parse` closure can return directly.

use triad_errors::{ClassifiedError, ErrorKind};
use triad_providers::json_extract::extract_json;

pub fn parse_json_output(text: &str) -> Result<serde_json::Value, ClassifiedError> {
    extract_json(text).map(|extracted| extracted.value).ok_or_else(|| ClassifiedError::new(ErrorKind::Client, "response did not contain recoverable JSON"))
}
