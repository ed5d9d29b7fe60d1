//! Request and response bodies for the stream endpoints
//!
//! Records and finalize metadata are arbitrary JSON and travel as
//! [`serde_json::Value`]; complete documents are returned as
//! [`FinalizedDocument`](crate::stream::FinalizedDocument) directly.

use serde::{Deserialize, Serialize};

use crate::observability::MetricsSnapshot;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppendResponse {
    pub key: String,
}

/// Result of an edit or delete
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RewriteResponse {
    pub key: String,
    /// Lines replaced or removed
    pub affected: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub metrics: MetricsSnapshot,
}
