//! Input record parsing
//!
//! Usage events and prescription targets arrive from the event store as JSON,
//! either as a single array or as NDJSON (one record per line).

mod parser;

pub use parser::*;
