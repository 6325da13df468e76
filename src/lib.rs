//! cdrd: call-detail-record listener.
//!
//! Accepts TCP connections from a phone switch, parses each comma-separated CDR into 27
//! typed fields, and stores the records that describe missed calls.

pub mod bootstrap;
pub mod config;
pub mod listener;
pub mod record;
pub mod store;
pub mod telemetry;
