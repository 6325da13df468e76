//! CDR record pipeline: schema, field normalizers, parser and classifier.
//!
//! Everything here is pure and shareable across connection tasks:
//! - [`schema`] binds each of the 27 positions to a converter
//! - [`normalize`] converts raw sub-fields into typed values
//! - [`RecordParser`] turns one raw line into a [`CdrRecord`]
//! - [`Classifier`] decides whether a record is a missed call

mod classify;
pub mod normalize;
mod parser;
pub mod schema;
mod types;

pub use classify::{Classifier, Decision, DEFAULT_EXCLUDED_QUEUE};
pub use normalize::{ConverterError, FieldError, TimestampConverter, DEFAULT_TIMESTAMP_FORMAT};
pub use parser::{ParseError, ParsedRecord, RecordParser};
pub use schema::{FieldKind, FieldSpec, FIELDS, RECORD_WIDTH};
pub use types::{Cell, CdrRecord, FieldWarning};

#[cfg(test)]
pub(crate) use parser::tests::line as sample_line;
