//! Typed record cells.

use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use super::normalize::FieldError;
use super::schema::{FieldSpec, DISPOSITION, DURATION, FIELDS, QUEUE_ID, RECORD_WIDTH};

/// One normalized field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    /// Integer identifier, absent when empty or unparseable
    Int(Option<i64>),
    /// Timestamp rendered in the target timezone
    Time(Option<String>),
    /// Duration in seconds (0 when missing or invalid)
    Seconds(i64),
    /// Trimmed free text
    Text(Option<String>),
}

impl Cell {
    /// Check if the cell holds no value.
    pub fn is_absent(&self) -> bool {
        match self {
            Cell::Int(v) => v.is_none(),
            Cell::Time(v) | Cell::Text(v) => v.is_none(),
            Cell::Seconds(_) => false,
        }
    }

    /// Integer value, for `Int` and `Seconds` cells.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => *v,
            Cell::Seconds(v) => Some(*v),
            _ => None,
        }
    }

    /// String value, for `Time` and `Text` cells.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Time(v) | Cell::Text(v) => v.as_deref(),
            _ => None,
        }
    }

    /// Textual form of the value, `None` when absent.
    pub fn render(&self) -> Option<String> {
        match self {
            Cell::Int(v) => v.map(|n| n.to_string()),
            Cell::Seconds(v) => Some(v.to_string()),
            Cell::Time(v) | Cell::Text(v) => v.clone(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Some(s) => f.write_str(&s),
            None => f.write_str("-"),
        }
    }
}

/// A fully normalized CDR line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdrRecord {
    cells: [Cell; RECORD_WIDTH],
}

impl CdrRecord {
    /// Wrap an already normalized set of cells.
    pub fn new(cells: [Cell; RECORD_WIDTH]) -> Self {
        Self { cells }
    }

    /// All cells in positional order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Cell at a position.
    pub fn get(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// Cell by schema name.
    pub fn field(&self, name: &str) -> Option<&Cell> {
        super::schema::field_named(name).and_then(|spec| self.get(spec.index))
    }

    /// Queue identifier (position 0).
    pub fn queue_id(&self) -> Option<i64> {
        self.cells[QUEUE_ID].as_int()
    }

    /// Call duration in seconds (position 6).
    pub fn duration_secs(&self) -> i64 {
        self.cells[DURATION].as_int().unwrap_or(0)
    }

    /// Disposition code (position 14).
    pub fn disposition(&self) -> Option<&str> {
        self.cells[DISPOSITION].as_str()
    }

    /// Iterate over (field, cell) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static FieldSpec, &Cell)> {
        FIELDS.iter().zip(self.cells.iter())
    }
}

// Serialized as a map keyed by schema field name.
impl Serialize for CdrRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(RECORD_WIDTH))?;
        for (spec, cell) in self.iter() {
            map.serialize_entry(spec.name, cell)?;
        }
        map.end()
    }
}

/// A field that failed to normalize and fell back to its default value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWarning {
    pub index: usize,
    pub name: &'static str,
    pub raw: String,
    pub error: FieldError,
}

impl fmt::Display for FieldWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {} ({}) '{}': {}", self.index, self.name, self.raw, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CdrRecord {
        let cells = std::array::from_fn(|i| match i {
            QUEUE_ID => Cell::Int(Some(4100)),
            DURATION => Cell::Seconds(95),
            DISPOSITION => Cell::Text(Some("ABANDON".into())),
            3 => Cell::Time(Some("2024/01/15 12:00:00".into())),
            _ => Cell::Text(None),
        });
        CdrRecord::new(cells)
    }

    #[test]
    fn test_accessors() {
        let record = sample();
        assert_eq!(record.queue_id(), Some(4100));
        assert_eq!(record.duration_secs(), 95);
        assert_eq!(record.disposition(), Some("ABANDON"));
        assert_eq!(record.field("time_3").and_then(Cell::as_str), Some("2024/01/15 12:00:00"));
        assert_eq!(record.cells().len(), RECORD_WIDTH);
    }

    #[test]
    fn test_absence() {
        assert!(Cell::Int(None).is_absent());
        assert!(Cell::Text(None).is_absent());
        assert!(!Cell::Seconds(0).is_absent());
        assert_eq!(Cell::Int(Some(9900)).render().as_deref(), Some("9900"));
        assert_eq!(Cell::Text(None).to_string(), "-");
    }

    #[test]
    fn test_serializes_by_field_name() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["queue_id"], 4100);
        assert_eq!(json["duration"], 95);
        assert_eq!(json["disposition"], "ABANDON");
        assert!(json["text_26"].is_null());
        assert_eq!(json.as_object().unwrap().len(), RECORD_WIDTH);
    }
}
