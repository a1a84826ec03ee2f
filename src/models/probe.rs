use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Endpoint;

/// Result of a single probe attempt against one endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub proxy: Endpoint,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_meta: Option<HashMap<String, String>>,
}

impl ProbeOutcome {
    pub fn available(proxy: Endpoint, response_meta: Option<HashMap<String, String>>) -> Self {
        Self {
            proxy,
            available: true,
            response_meta,
        }
    }

    pub fn unavailable(proxy: Endpoint) -> Self {
        Self {
            proxy,
            available: false,
            response_meta: None,
        }
    }
}

/// Aggregate of repeated probe attempts against one endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StabilityRecord {
    pub proxy: Endpoint,
    pub success_count: u32,
    pub attempts: u32,
    /// Fraction of successful attempts, rounded to two decimals
    pub stability: f64,
    /// Headers echoed by the most recent successful attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_meta: Option<HashMap<String, String>>,
}

impl StabilityRecord {
    pub fn new(proxy: Endpoint, success_count: u32, attempts: u32) -> Self {
        let attempts = attempts.max(1);
        let success_count = success_count.min(attempts);
        let ratio = success_count as f64 / attempts as f64;

        Self {
            proxy,
            success_count,
            attempts,
            stability: (ratio * 100.0).round() / 100.0,
            response_meta: None,
        }
    }

    pub fn with_meta(mut self, response_meta: Option<HashMap<String, String>>) -> Self {
        self.response_meta = response_meta;
        self
    }

    /// Inclusive threshold check
    pub fn passes(&self, threshold: f64) -> bool {
        self.stability >= threshold
    }
}

/// Per-endpoint availability returned by the check endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub proxy: Endpoint,
    pub available: bool,
}

impl From<&StabilityRecord> for AvailabilityReport {
    fn from(record: &StabilityRecord) -> Self {
        Self {
            proxy: record.proxy.clone(),
            available: record.success_count > 0,
        }
    }
}
