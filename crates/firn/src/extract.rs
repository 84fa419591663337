//! Dotted-path evaluation against record values.
//!
//! Traversal is lenient about absence (an absent field or map key is
//! `Missing`, not an error) but strict about shape: descending into a
//! primitive is a record-type error, because the configured path can never
//! match such records.

use snafu::prelude::*;

use crate::data::SinkData;
use crate::error::{ExtractError, NotAStructSnafu};

/// Result of a path lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Extracted<'a> {
    Scalar(&'a SinkData),
    Missing,
}

/// Rendering of an absent partition value.
pub const MISSING: &str = "[missing]";

impl Extracted<'_> {
    /// Render for use in an object key. Absent values render as the literal
    /// `[missing]` marker; present values must be renderable primitives.
    pub fn render(&self) -> Result<String, ExtractError> {
        match self {
            Extracted::Missing => Ok(MISSING.to_string()),
            Extracted::Scalar(SinkData::Null) => Ok(MISSING.to_string()),
            Extracted::Scalar(data) => data.render().ok_or(ExtractError::NonPrimitiveValue {
                actual: data.type_name(),
            }),
        }
    }
}

/// Evaluate a dotted path against a value.
///
/// An empty path selects the value itself. A `Null` anywhere along the path
/// resolves to `Missing`.
pub fn extract_path<'a>(
    data: &'a SinkData,
    path: &[String],
) -> Result<Extracted<'a>, ExtractError> {
    let mut current = data;

    for segment in path {
        current = match current {
            SinkData::Struct { fields, .. } => match fields.get(segment) {
                Some(value) => value,
                None => return Ok(Extracted::Missing),
            },
            SinkData::Map(entries) => match entries.get(segment) {
                Some(value) => value,
                None => return Ok(Extracted::Missing),
            },
            SinkData::Null => return Ok(Extracted::Missing),
            other => {
                return NotAStructSnafu {
                    segment: segment.clone(),
                    actual: other.type_name(),
                }
                .fail()
            }
        };
        if current.is_null() {
            return Ok(Extracted::Missing);
        }
    }

    Ok(Extracted::Scalar(current))
}
