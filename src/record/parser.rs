//! CDR line parser.

use thiserror::Error;

use super::normalize::{
    digits_only_int, duration_seconds, passthrough, FieldError, TimestampConverter,
};
use super::schema::{FieldKind, FieldSpec, FIELDS, RECORD_WIDTH};
use super::types::{Cell, CdrRecord, FieldWarning};

/// Record-level parse failures. The record is dropped; the connection stays up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("incomplete record: {found} of {} fields", RECORD_WIDTH)]
    Incomplete { found: usize },
}

impl ParseError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::Incomplete { .. } => "incomplete",
        }
    }
}

/// Parse result: the record plus any fields that fell back to defaults.
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub record: CdrRecord,
    pub warnings: Vec<FieldWarning>,
    /// Segments past the significant width, ignored
    pub extra_fields: usize,
}

/// Splits raw lines and normalizes each position according to the field table.
#[derive(Debug, Clone, Default)]
pub struct RecordParser {
    timestamps: TimestampConverter,
}

impl RecordParser {
    pub fn new(timestamps: TimestampConverter) -> Self {
        Self { timestamps }
    }

    /// Parse one raw record.
    pub fn parse(&self, raw: &str) -> Result<ParsedRecord, ParseError> {
        let segments: Vec<&str> = raw.split(',').collect();
        if segments.len() < RECORD_WIDTH {
            return Err(ParseError::Incomplete {
                found: segments.len(),
            });
        }

        let mut warnings = Vec::new();
        let cells = std::array::from_fn(|i| {
            self.convert(&FIELDS[i], segments[i].trim(), &mut warnings)
        });

        Ok(ParsedRecord {
            record: CdrRecord::new(cells),
            warnings,
            extra_fields: segments.len() - RECORD_WIDTH,
        })
    }

    fn convert(&self, spec: &FieldSpec, raw: &str, warnings: &mut Vec<FieldWarning>) -> Cell {
        match spec.kind {
            FieldKind::DigitsOnly => {
                Cell::Int(recover(spec, raw, digits_only_int(raw), None, warnings))
            }
            FieldKind::Timestamp => {
                Cell::Time(recover(spec, raw, self.timestamps.convert(raw), None, warnings))
            }
            FieldKind::Duration => {
                Cell::Seconds(recover(spec, raw, duration_seconds(raw), 0, warnings))
            }
            FieldKind::Text => Cell::Text(passthrough(raw)),
        }
    }
}

fn recover<T>(
    spec: &FieldSpec,
    raw: &str,
    result: Result<T, FieldError>,
    fallback: T,
    warnings: &mut Vec<FieldWarning>,
) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            warnings.push(FieldWarning {
                index: spec.index,
                name: spec.name,
                raw: raw.to_string(),
                error,
            });
            fallback
        }
    }
}
