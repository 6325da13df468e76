//! Positional field table for switch CDR lines.
//!
//! The switch emits at least [`RECORD_WIDTH`] comma-separated fields; only the first
//! [`RECORD_WIDTH`] are significant. Each position is bound to exactly one converter.

use std::fmt;

/// Number of significant fields in a record.
pub const RECORD_WIDTH: usize = 27;

/// Position of the queue identifier.
pub const QUEUE_ID: usize = 0;

/// Position of the call duration.
pub const DURATION: usize = 6;

/// Position of the disposition/termination code.
pub const DISPOSITION: usize = 14;

/// Converter applied to a raw field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-digits stripped, remainder parsed as an integer
    DigitsOnly,
    /// Source-zone wall clock converted to the target zone
    Timestamp,
    /// `HH:MM:SS` converted to seconds
    Duration,
    /// Trimmed text, absent when empty
    Text,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::DigitsOnly => write!(f, "digits"),
            FieldKind::Timestamp => write!(f, "timestamp"),
            FieldKind::Duration => write!(f, "duration"),
            FieldKind::Text => write!(f, "text"),
        }
    }
}

/// One entry of the field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub index: usize,
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(index: usize, name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { index, name, kind }
}

use FieldKind::{DigitsOnly, Duration, Text, Timestamp};

/// The record layout, indexed by position.
pub static FIELDS: [FieldSpec; RECORD_WIDTH] = [
    field(0, "queue_id", DigitsOnly),
    field(1, "id_1", DigitsOnly),
    field(2, "id_2", DigitsOnly),
    field(3, "time_3", Timestamp),
    field(4, "time_4", Timestamp),
    field(5, "time_5", Timestamp),
    field(6, "duration", Duration),
    field(7, "text_7", Text),
    field(8, "text_8", Text),
    field(9, "text_9", Text),
    field(10, "text_10", Text),
    field(11, "id_11", DigitsOnly),
    field(12, "id_12", DigitsOnly),
    field(13, "id_13", DigitsOnly),
    field(14, "disposition", Text),
    field(15, "text_15", Text),
    field(16, "text_16", Text),
    field(17, "text_17", Text),
    field(18, "text_18", Text),
    field(19, "text_19", Text),
    field(20, "text_20", Text),
    field(21, "text_21", Text),
    field(22, "text_22", Text),
    field(23, "text_23", Text),
    field(24, "text_24", Text),
    field(25, "text_25", Text),
    field(26, "text_26", Text),
];

/// Look up a field by name.
pub fn field_named(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn indices_of(kind: FieldKind) -> Vec<usize> {
        FIELDS.iter().filter(|f| f.kind == kind).map(|f| f.index).collect()
    }

    #[test]
    fn test_table_is_positional() {
        for (i, spec) in FIELDS.iter().enumerate() {
            assert_eq!(spec.index, i, "field {} is out of place", spec.name);
        }
    }

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = FIELDS.iter().map(|f| f.name).collect();
        assert_eq!(names.len(), RECORD_WIDTH);
    }

    #[test]
    fn test_dispatch_layout() {
        assert_eq!(indices_of(FieldKind::DigitsOnly), vec![0, 1, 2, 11, 12, 13]);
        assert_eq!(indices_of(FieldKind::Timestamp), vec![3, 4, 5]);
        assert_eq!(indices_of(FieldKind::Duration), vec![6]);

        let mut text: Vec<usize> = (7..=10).collect();
        text.extend(14..=26);
        assert_eq!(indices_of(FieldKind::Text), text);
    }

    #[test]
    fn test_well_known_positions() {
        assert_eq!(FIELDS[QUEUE_ID].name, "queue_id");
        assert_eq!(FIELDS[DURATION].kind, FieldKind::Duration);
        assert_eq!(field_named("disposition").map(|f| f.index), Some(DISPOSITION));
        assert!(field_named("missing").is_none());
    }
}
