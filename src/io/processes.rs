//! Client for the OGC API - Processes execution service

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::types::{FieldError, FieldResult};

/// Result object returned by a process execution
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessOutput {
    /// Identifying tag of the produced output (e.g. the index name)
    #[serde(default)]
    pub id: Option<String>,
    /// Output payload; a base64 raster for the index processes
    pub value: JsonValue,
}

pub struct ProcessesClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl ProcessesClient {
    pub fn new(base_url: &str) -> FieldResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| FieldError::Remote(format!("failed to create HTTP client: {}", e)))?;
        Ok(ProcessesClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Execute a process synchronously: `POST /processes/{id}/execution`
    pub fn execute(&self, process_id: &str, inputs: &JsonValue) -> FieldResult<ProcessOutput> {
        let url = format!("{}/processes/{}/execution", self.base_url, process_id);
        log::info!("Executing process '{}' at {}", process_id, self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "inputs": inputs }))
            .send()
            .map_err(|e| FieldError::Remote(format!("POST {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(FieldError::Remote(format!(
                "process '{}' returned {}: {}",
                process_id, status, body
            )));
        }
        response.json().map_err(|e| {
            FieldError::Remote(format!(
                "process '{}': malformed JSON result: {}",
                process_id, e
            ))
        })
    }
}
