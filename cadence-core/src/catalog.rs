//! Workload catalog - the fixed, ordered set of prompts and sampling
//! configurations that the driver cycles through.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::request::{Request, RequestId, SamplingParams};

/// A prompt paired with its sampling configuration and priority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadEntry {
    pub prompt: String,
    pub params: SamplingParams,
    /// Passed through to the engine untouched
    #[serde(default)]
    pub priority: i32,
}

impl WorkloadEntry {
    pub fn new(prompt: impl Into<String>, params: SamplingParams, priority: i32) -> Self {
        Self {
            prompt: prompt.into(),
            params,
            priority,
        }
    }

    /// Build the request submitted under `id`.
    pub fn to_request(&self, id: impl Into<RequestId>) -> Request {
        Request::new(id, self.prompt.clone(), self.params.clone(), self.priority)
    }
}

/// Non-empty list of workload entries, reused cyclically
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    entries: Vec<WorkloadEntry>,
}

impl Catalog {
    /// Validate and wrap `entries`. Fails on an empty list or on any entry
    /// whose sampling parameters are inconsistent.
    pub fn new(entries: Vec<WorkloadEntry>) -> Result<Self, DriverError> {
        if entries.is_empty() {
            return Err(DriverError::Configuration(
                "workload catalog must contain at least one entry".to_string(),
            ));
        }
        for (index, entry) in entries.iter().enumerate() {
            entry.params.validate().map_err(|e| {
                DriverError::Configuration(format!("catalog entry {}: {}", index, e))
            })?;
        }
        Ok(Self { entries })
    }

    /// The built-in catalog: greedy with log-probabilities, top-k with a
    /// presence penalty, nucleus sampling with best-of selection, and beam search.
    pub fn standard() -> Self {
        Self {
            entries: vec![
                WorkloadEntry::new(
                    "A",
                    SamplingParams::greedy().with_logprobs(1).with_prompt_logprobs(1),
                    10,
                ),
                WorkloadEntry::new(
                    "T",
                    SamplingParams::default()
                        .with_temperature(0.8)
                        .with_top_k(5)
                        .with_presence_penalty(0.2),
                    1,
                ),
                WorkloadEntry::new(
                    "W",
                    SamplingParams::default()
                        .with_n(2)
                        .with_best_of(5)
                        .with_temperature(0.8)
                        .with_top_p(0.95)
                        .with_frequency_penalty(0.1),
                    1,
                ),
                WorkloadEntry::new(
                    "I",
                    SamplingParams::greedy()
                        .with_n(3)
                        .with_best_of(3)
                        .with_beam_search(),
                    1,
                ),
            ],
        }
    }

    /// Parse a JSON array of entries.
    pub fn from_json_str(json: &str) -> Result<Self, DriverError> {
        let entries: Vec<WorkloadEntry> = serde_json::from_str(json)
            .map_err(|e| DriverError::Configuration(format!("malformed catalog: {}", e)))?;
        Self::new(entries)
    }

    /// Load a JSON catalog from disk.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DriverError::Configuration(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Entry used for the request with the given sequence number.
    pub fn entry_at(&self, sequence_number: u64) -> &WorkloadEntry {
        let index = sequence_number % self.entries.len() as u64;
        &self.entries[index as usize]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[WorkloadEntry] {
        &self.entries
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}
