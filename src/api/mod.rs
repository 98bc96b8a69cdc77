//! HTTP API Module
//!
//! Read-only REST API for operators and dashboards.

mod http;

pub use http::{EventLog, HttpServer, MemberView, RecordedEvent, EVENT_HISTORY};
