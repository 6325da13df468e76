//! Field normalizers.
//!
//! Every converter is total: it either yields a value or a [`FieldError`] describing why the
//! raw text was rejected. Callers pick the fallback (`None` or `0`) and decide how to report
//! the error; nothing here logs.

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use thiserror::Error;

/// Wire format of switch timestamps.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Field-level normalization errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("invalid timestamp (expected {format}): {reason}")]
    Timestamp { format: String, reason: String },

    #[error("local time does not exist in {zone}")]
    NonexistentLocalTime { zone: String },

    #[error("duration needs 3 ':'-separated parts, got {parts}")]
    DurationShape { parts: usize },

    #[error("non-numeric duration component '{0}'")]
    DurationComponent(String),

    #[error("duration out of range")]
    DurationOverflow,

    #[error("no digits in value")]
    NoDigits,

    #[error("integer out of range")]
    IntegerOverflow,
}

impl FieldError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldError::Timestamp { .. } => "timestamp",
            FieldError::NonexistentLocalTime { .. } => "nonexistent_local_time",
            FieldError::DurationShape { .. } => "duration_shape",
            FieldError::DurationComponent(_) => "duration_component",
            FieldError::DurationOverflow => "duration_overflow",
            FieldError::NoDigits => "no_digits",
            FieldError::IntegerOverflow => "integer_overflow",
        }
    }
}

/// Errors building a [`TimestampConverter`].
#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("invalid timestamp format '{0}'")]
    InvalidFormat(String),
}

fn is_null(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("null")
}

/// Converts switch wall-clock timestamps between timezones.
#[derive(Debug, Clone)]
pub struct TimestampConverter {
    source: Tz,
    target: Tz,
    format: String,
}

impl TimestampConverter {
    /// Create a converter from IANA zone names and a strftime format.
    ///
    /// The format must both render and parse back a full date and time, otherwise
    /// conversion output could not be re-read by the same converter.
    pub fn new(source: &str, target: &str, format: &str) -> Result<Self, ConverterError> {
        let source: Tz = source
            .parse()
            .map_err(|_| ConverterError::UnknownTimezone(source.to_string()))?;
        let target: Tz = target
            .parse()
            .map_err(|_| ConverterError::UnknownTimezone(target.to_string()))?;

        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(ConverterError::InvalidFormat(format.to_string()));
        }

        let probe = NaiveDate::from_ymd_opt(2001, 2, 3)
            .and_then(|d| d.and_hms_opt(4, 5, 6))
            .ok_or_else(|| ConverterError::InvalidFormat(format.to_string()))?;
        let rendered = probe.format(format).to_string();
        match NaiveDateTime::parse_from_str(&rendered, format) {
            Ok(parsed) if parsed == probe => {}
            _ => return Err(ConverterError::InvalidFormat(format.to_string())),
        }

        Ok(Self {
            source,
            target,
            format: format.to_string(),
        })
    }

    pub fn source(&self) -> Tz {
        self.source
    }

    pub fn target(&self) -> Tz {
        self.target
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Convert a source-zone timestamp into the target zone.
    ///
    /// Empty input and the token `null` (any case) yield `Ok(None)`.
    pub fn convert(&self, raw: &str) -> Result<Option<String>, FieldError> {
        if is_null(raw) {
            return Ok(None);
        }

        let naive = NaiveDateTime::parse_from_str(raw, &self.format).map_err(|e| {
            FieldError::Timestamp {
                format: self.format.clone(),
                reason: e.to_string(),
            }
        })?;

        // Ambiguous wall-clock times (DST fold) resolve to the earlier instant.
        let local = self
            .source
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| FieldError::NonexistentLocalTime {
                zone: self.source.name().to_string(),
            })?;

        Ok(Some(
            local.with_timezone(&self.target).format(&self.format).to_string(),
        ))
    }
}

impl Default for TimestampConverter {
    fn default() -> Self {
        Self {
            source: chrono_tz::UTC,
            target: chrono_tz::US::Eastern,
            format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

/// Convert `HH:MM:SS` into seconds. Empty and `null` yield 0.
pub fn duration_seconds(raw: &str) -> Result<i64, FieldError> {
    if is_null(raw) {
        return Ok(0);
    }

    let parts: Vec<&str> = raw.split(':').collect();
    let &[hours, minutes, seconds] = parts.as_slice() else {
        return Err(FieldError::DurationShape { parts: parts.len() });
    };

    let component = |s: &str| -> Result<i64, FieldError> {
        s.trim()
            .parse::<i64>()
            .map_err(|_| FieldError::DurationComponent(s.to_string()))
    };

    let (h, m, s) = (component(hours)?, component(minutes)?, component(seconds)?);

    h.checked_mul(3600)
        .and_then(|h| m.checked_mul(60).and_then(|m| h.checked_add(m)))
        .and_then(|hm| hm.checked_add(s))
        .ok_or(FieldError::DurationOverflow)
}

/// Strip every non-digit and parse the remainder. Empty input yields `Ok(None)`.
pub fn digits_only_int(raw: &str) -> Result<Option<i64>, FieldError> {
    if raw.is_empty() {
        return Ok(None);
    }

    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(FieldError::NoDigits);
    }

    digits
        .parse::<i64>()
        .map(Some)
        .map_err(|_| FieldError::IntegerOverflow)
}

/// Trim; absent when nothing is left.
pub fn passthrough(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        assert_eq!(duration_seconds("01:02:03"), Ok(3723));
        assert_eq!(duration_seconds("00:00:00"), Ok(0));
        assert_eq!(duration_seconds(""), Ok(0));
        assert_eq!(duration_seconds("null"), Ok(0));
        assert_eq!(duration_seconds("NULL"), Ok(0));
    }

    #[test]
    fn test_duration_rejects_bad_shapes() {
        assert_eq!(
            duration_seconds("bad"),
            Err(FieldError::DurationShape { parts: 1 })
        );
        assert_eq!(
            duration_seconds("01:02"),
            Err(FieldError::DurationShape { parts: 2 })
        );
        assert_eq!(
            duration_seconds("01:02:03:04"),
            Err(FieldError::DurationShape { parts: 4 })
        );
        assert_eq!(
            duration_seconds("01:xx:03"),
            Err(FieldError::DurationComponent("xx".into()))
        );
        assert_eq!(
            duration_seconds("9223372036854775807:00:00"),
            Err(FieldError::DurationOverflow)
        );
    }

    #[test]
    fn test_digits_only() {
        assert_eq!(digits_only_int("Q-100"), Ok(Some(100)));
        assert_eq!(digits_only_int("9900"), Ok(Some(9900)));
        assert_eq!(digits_only_int(" 42 "), Ok(Some(42)));
        assert_eq!(digits_only_int(""), Ok(None));
        assert_eq!(digits_only_int("queue"), Err(FieldError::NoDigits));
        assert_eq!(
            digits_only_int("99999999999999999999"),
            Err(FieldError::IntegerOverflow)
        );
    }

    #[test]
    fn test_passthrough() {
        assert_eq!(passthrough("  ABANDON "), Some("ABANDON".to_string()));
        assert_eq!(passthrough("   "), None);
        assert_eq!(passthrough(""), None);
        assert_eq!(passthrough("null"), Some("null".to_string()));
    }

    #[test]
    fn test_timestamp_utc_to_eastern_standard_time() {
        let converter = TimestampConverter::default();
        assert_eq!(
            converter.convert("2024/01/15 17:00:00"),
            Ok(Some("2024/01/15 12:00:00".to_string()))
        );
    }

    #[test]
    fn test_timestamp_utc_to_eastern_daylight_time() {
        let converter = TimestampConverter::default();
        assert_eq!(
            converter.convert("2024/07/04 16:30:00"),
            Ok(Some("2024/07/04 12:30:00".to_string()))
        );
        // Crosses midnight backwards
        assert_eq!(
            converter.convert("2024/03/01 02:15:00"),
            Ok(Some("2024/02/29 21:15:00".to_string()))
        );
    }

    #[test]
    fn test_timestamp_null_and_invalid() {
        let converter = TimestampConverter::default();
        assert_eq!(converter.convert(""), Ok(None));
        assert_eq!(converter.convert("Null"), Ok(None));
        assert!(matches!(
            converter.convert("2024-01-15 17:00:00"),
            Err(FieldError::Timestamp { .. })
        ));
        assert!(matches!(
            converter.convert("2024/13/15 17:00:00"),
            Err(FieldError::Timestamp { .. })
        ));
    }

    #[test]
    fn test_timestamp_nonexistent_local_time() {
        let converter =
            TimestampConverter::new("US/Eastern", "UTC", DEFAULT_TIMESTAMP_FORMAT).unwrap();
        // 02:30 is skipped by the spring-forward transition
        assert!(matches!(
            converter.convert("2024/03/10 02:30:00"),
            Err(FieldError::NonexistentLocalTime { .. })
        ));
        assert_eq!(
            converter.convert("2024/01/15 12:00:00"),
            Ok(Some("2024/01/15 17:00:00".to_string()))
        );
    }

    #[test]
    fn test_timestamp_ambiguous_local_time_takes_earlier_instant() {
        let converter =
            TimestampConverter::new("US/Eastern", "UTC", DEFAULT_TIMESTAMP_FORMAT).unwrap();
        assert_eq!(converter.source(), chrono_tz::US::Eastern);
        assert_eq!(converter.target(), chrono_tz::UTC);
        assert_eq!(converter.format(), DEFAULT_TIMESTAMP_FORMAT);

        // 01:30 happens twice on fall-back day; the EDT (UTC-4) reading wins
        assert_eq!(
            converter.convert("2024/11/03 01:30:00"),
            Ok(Some("2024/11/03 05:30:00".to_string()))
        );
        assert_eq!(
            converter.convert("2024/11/03 02:30:00"),
            Ok(Some("2024/11/03 07:30:00".to_string()))
        );
    }

    #[test]
    fn test_converter_rejects_bad_config() {
        assert!(matches!(
            TimestampConverter::new("Mars/Olympus", "UTC", DEFAULT_TIMESTAMP_FORMAT),
            Err(ConverterError::UnknownTimezone(_))
        ));
        assert!(matches!(
            TimestampConverter::new("UTC", "UTC", "%Y/%m/%d"),
            Err(ConverterError::InvalidFormat(_))
        ));
        assert!(matches!(
            TimestampConverter::new("UTC", "UTC", "%Q"),
            Err(ConverterError::InvalidFormat(_))
        ));
    }
}
