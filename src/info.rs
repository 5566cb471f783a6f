//! The dataset's JSON document: schema, shard ledger and free-form metadata.

use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{ShardError, ShardResult};
use crate::features::Features;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    #[serde(default)]
    pub description: String,
    /// One shard name per sample, in write order.
    #[serde(default)]
    pub file_list: Vec<String>,
    pub features: Features,
    /// Total bytes across all shards; set when the writer closes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
}

/// A shard's contiguous run of ledger positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRun {
    pub name: String,
    pub positions: Range<usize>,
}

impl DatasetInfo {
    pub fn new(features: Features) -> Self {
        DatasetInfo {
            description: String::new(),
            file_list: Vec::new(),
            features,
            size_in_bytes: None,
            metadata: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn num_samples(&self) -> usize {
        self.file_list.len()
    }

    /// Group the ledger into per-shard runs.
    ///
    /// Each shard must own a single contiguous run, and runs must follow
    /// shard sequence order.
    pub fn shard_runs(&self) -> ShardResult<Vec<ShardRun>> {
        let mut runs: Vec<ShardRun> = Vec::new();
        for (position, name) in self.file_list.iter().enumerate() {
            if let Some(run) = runs.last_mut()
                && run.name == *name
            {
                run.positions.end = position + 1;
                continue;
            }
            if let Some(prev) = runs.last()
                && shard_order(name) <= shard_order(&prev.name)
            {
                return Err(ShardError::Config(format!(
                    "ledger entry {position} ({name}) is out of order after {}",
                    prev.name
                )));
            }
            runs.push(ShardRun {
                name: name.clone(),
                positions: position..position + 1,
            });
        }
        Ok(runs)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> ShardResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ShardError::Config(format!("Invalid dataset info: {e}")))
    }

    pub fn to_json_bytes(&self, pretty: bool) -> ShardResult<Vec<u8>> {
        let bytes = if pretty {
            serde_json::to_vec_pretty(self)?
        } else {
            serde_json::to_vec(self)?
        };
        Ok(bytes)
    }

    /// Load from `path`. A missing or unreadable file is a configuration
    /// error, as is a malformed document.
    pub fn read_from(path: impl AsRef<Path>) -> ShardResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            ShardError::Config(format!("Cannot read dataset info {}: {e}", path.display()))
        })?;
        Self::from_json_bytes(&bytes)
    }

    /// Write to `path` through a temporary sibling, so readers never see a
    /// half-written document.
    pub fn write_to(&self, path: impl AsRef<Path>) -> ShardResult<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, self.to_json_bytes(true)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

// Shard names are fixed width, but a writer that outgrows its width
// produces longer names; longer sorts later.
fn shard_order(name: &str) -> (usize, &str) {
    (name.len(), name)
}
