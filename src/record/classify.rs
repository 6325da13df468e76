//! Missed-call classification.

use std::fmt;

use super::schema::{DISPOSITION, QUEUE_ID};
use super::types::Cell;

/// Queue code that is never reported as missed.
pub const DEFAULT_EXCLUDED_QUEUE: &str = "9900";

/// Outcome of classifying one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Disposition present on a non-excluded queue
    Missed,
    /// Queue is on the exclusion list
    ExcludedQueue,
    /// No disposition code
    NoDisposition,
    /// Too few cells to classify
    Incomplete,
}

impl Decision {
    pub fn is_missed(self) -> bool {
        self == Decision::Missed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Missed => "missed",
            Decision::ExcludedQueue => "excluded_queue",
            Decision::NoDisposition => "no_disposition",
            Decision::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether a parsed record is a missed call worth storing.
#[derive(Debug, Clone)]
pub struct Classifier {
    excluded_queues: Vec<String>,
}

impl Classifier {
    /// Create a classifier with the given excluded queue codes.
    pub fn new<I, S>(excluded_queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded_queues: excluded_queues.into_iter().map(Into::into).collect(),
        }
    }

    pub fn excluded_queues(&self) -> &[String] {
        &self.excluded_queues
    }

    /// Classify a record's cells.
    ///
    /// The exclusion check on the queue runs first and wins over the disposition.
    pub fn classify(&self, cells: &[Cell]) -> Decision {
        if cells.len() <= DISPOSITION {
            return Decision::Incomplete;
        }

        if let Some(queue) = cells[QUEUE_ID].render() {
            if self.excluded_queues.iter().any(|q| *q == queue) {
                return Decision::ExcludedQueue;
            }
        }

        if cells[DISPOSITION].is_absent() {
            Decision::NoDisposition
        } else {
            Decision::Missed
        }
    }

    pub fn is_missed_call(&self, cells: &[Cell]) -> bool {
        self.classify(cells).is_missed()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new([DEFAULT_EXCLUDED_QUEUE])
    }
}
