//! Stored missed-call type.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{CdrRecord, FIELDS};

/// A missed call as handed to the writers.
#[derive(Debug, Clone, Serialize)]
pub struct MissedCall {
    /// Receive time (RFC3339, UTC)
    pub received_at: String,

    /// Listener that accepted the connection
    pub listener: String,

    /// Connection the record arrived on
    pub connection_id: u64,

    /// Switch address
    pub peer: String,

    /// Normalized record
    pub record: CdrRecord,
}

impl MissedCall {
    pub fn new(record: CdrRecord, listener: &str, connection_id: u64, peer: SocketAddr) -> Self {
        Self {
            received_at: Utc::now().to_rfc3339(),
            listener: listener.to_string(),
            connection_id,
            peer: peer.to_string(),
            record,
        }
    }

    /// Queue identifier of the underlying record.
    pub fn queue_id(&self) -> Option<i64> {
        self.record.queue_id()
    }

    /// Receive time as DateTime.
    pub fn received_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.received_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Convert to CSV line.
    pub fn to_csv_line(&self) -> String {
        let mut fields = vec![
            self.received_at.clone(),
            self.listener.clone(),
            self.connection_id.to_string(),
            self.peer.clone(),
        ];
        fields.extend(
            self.record
                .cells()
                .iter()
                .map(|cell| cell.render().unwrap_or_default()),
        );

        // Escape commas and quotes
        fields
            .into_iter()
            .map(|f| {
                if f.contains(',') || f.contains('"') || f.contains('\n') {
                    format!("\"{}\"", f.replace('"', "\"\""))
                } else {
                    f
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// CSV header.
    pub fn csv_header() -> String {
        let mut columns = vec!["received_at", "listener", "connection_id", "peer"];
        columns.extend(FIELDS.iter().map(|f| f.name));
        columns.join(",")
    }
}

/// Calls returned by a query when no limit is given.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Filter over stored missed calls. Every unset field matches everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MissedCallQuery {
    pub queue: Option<i64>,
    /// Earliest receive time, inclusive
    pub since: Option<DateTime<Utc>>,
    /// Latest receive time, inclusive
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MissedCallQuery {
    pub fn matches(&self, call: &MissedCall) -> bool {
        if self.queue.is_some() && call.queue_id() != self.queue {
            return false;
        }
        if self.since.is_none() && self.until.is_none() {
            return true;
        }

        match call.received_datetime() {
            Some(ts) => {
                self.since.map_or(true, |since| ts >= since)
                    && self.until.map_or(true, |until| ts <= until)
            }
            None => false,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
    }
}
