//! Writing samples into rotating shards.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::ArchiveWriter;
use crate::codecs::{CodecRegistry, Compression};
use crate::error::{ShardError, ShardResult};
use crate::info::DatasetInfo;
use crate::mapper::encode_sample;
use crate::store::LocalStore;
use crate::value::Value;

// ---------------------------------------------------------------------------
// WriterOptions
// ---------------------------------------------------------------------------

/// Shard rotation and layout settings.
///
/// A shard is closed once it holds `max_count` samples or `max_size` bytes,
/// whichever comes first; `None` disables that threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    pub max_count: Option<usize>,
    pub max_size: Option<u64>,
    pub compression: Compression,
    /// Digits in shard file names.
    pub name_width: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            max_count: Some(1000),
            max_size: Some(3_000_000_000),
            compression: Compression::Stored,
            name_width: 5,
        }
    }
}

impl WriterOptions {
    pub fn with_max_count(mut self, max_count: Option<usize>) -> Self {
        self.max_count = max_count;
        self
    }

    pub fn with_max_size(mut self, max_size: Option<u64>) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn validate(&self) -> ShardResult<()> {
        if self.max_count == Some(0) {
            return Err(ShardError::Config("max_count must be positive".into()));
        }
        if self.max_size == Some(0) {
            return Err(ShardError::Config("max_size must be positive".into()));
        }
        if self.max_count.is_none() && self.max_size.is_none() {
            return Err(ShardError::Config(
                "at least one of max_count or max_size must be set".into(),
            ));
        }
        if self.name_width == 0 {
            return Err(ShardError::Config("name_width must be at least 1".into()));
        }
        Ok(())
    }

    fn is_full(&self, count: usize, bytes: u64) -> bool {
        self.max_count.is_some_and(|max| count >= max) || self.max_size.is_some_and(|max| bytes >= max)
    }
}

// ---------------------------------------------------------------------------
// ShardWriter
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ActiveShard {
    name: String,
    archive: ArchiveWriter,
    count: usize,
}

#[derive(Debug)]
enum State {
    Open,
    Writing(ActiveShard),
    Closed,
}

/// Appends samples to numbered shards in one directory and records which
/// shard holds each sample.
///
/// Dropping an unclosed writer closes it; errors on that path are logged.
#[derive(Debug)]
pub struct ShardWriter {
    store: LocalStore,
    info: DatasetInfo,
    options: WriterOptions,
    registry: CodecRegistry,
    state: State,
    next_shard: usize,
    total_bytes: u64,
}

impl ShardWriter {
    pub fn create(
        dir: impl AsRef<Path>,
        info: DatasetInfo,
        options: WriterOptions,
    ) -> ShardResult<Self> {
        Self::with_registry(dir, info, options, CodecRegistry::default())
    }

    pub fn with_registry(
        dir: impl AsRef<Path>,
        mut info: DatasetInfo,
        options: WriterOptions,
        registry: CodecRegistry,
    ) -> ShardResult<Self> {
        options.validate()?;
        if !info.file_list.is_empty() {
            return Err(ShardError::Config(
                "a new dataset must start with an empty file_list".into(),
            ));
        }
        info.size_in_bytes = None;

        let store = LocalStore::new(dir.as_ref());
        if store.info_path().exists() {
            return Err(ShardError::Config(format!(
                "{} already holds a dataset",
                store.root().display()
            )));
        }
        store.ensure_root()?;
        debug!(
            "writer at {} (max_count={:?}, max_size={:?}, compression={})",
            store.root().display(),
            options.max_count,
            options.max_size,
            options.compression.name()
        );
        Ok(ShardWriter {
            store,
            info,
            options,
            registry,
            state: State::Open,
            next_shard: 0,
            total_bytes: 0,
        })
    }

    /// Encode `sample` and append it to the active shard, opening or rotating
    /// shards as needed. A sample that fails to encode or to reach the disk
    /// leaves every shard as it was and is not added to the ledger.
    pub fn write(&mut self, sample: &Value) -> ShardResult<()> {
        let index = match &self.state {
            State::Closed => return Err(ShardError::WriterClosed),
            State::Open => 0,
            State::Writing(active) => active.count,
        };
        let members = encode_sample(&self.info.features, &self.registry, sample, index)?;

        let compression = self.options.compression;
        let active = self.active_shard()?;
        active.archive.append(&members, compression)?;
        active.count += 1;
        let (name, count, bytes) = (
            active.name.clone(),
            active.count,
            active.archive.bytes_written(),
        );
        self.info.file_list.push(name);

        if self.options.is_full(count, bytes) {
            self.finish_shard()?;
        }
        Ok(())
    }

    /// Finalize the active shard and persist the dataset info. Closing twice
    /// is a no-op.
    pub fn close(&mut self) -> ShardResult<()> {
        if matches!(self.state, State::Closed) {
            return Ok(());
        }
        let result = self.finish_shard();
        self.state = State::Closed;
        result?;

        self.info.size_in_bytes = Some(self.total_bytes);
        self.info.write_to(self.store.info_path())?;
        info!(
            "{} examples have been written to {} shards",
            self.info.num_samples(),
            self.next_shard
        );
        Ok(())
    }

    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    pub fn num_samples(&self) -> usize {
        self.info.num_samples()
    }

    /// Shards opened so far, including the active one.
    pub fn num_shards(&self) -> usize {
        self.next_shard
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    fn active_shard(&mut self) -> ShardResult<&mut ActiveShard> {
        if matches!(self.state, State::Open) {
            let name = LocalStore::shard_name(self.next_shard, self.options.name_width);
            let archive = self.store.create_shard(&name)?;
            debug!("opened shard {name}");
            self.next_shard += 1;
            self.state = State::Writing(ActiveShard {
                name,
                archive,
                count: 0,
            });
        }
        match &mut self.state {
            State::Writing(active) => Ok(active),
            State::Open | State::Closed => Err(ShardError::WriterClosed),
        }
    }

    fn finish_shard(&mut self) -> ShardResult<()> {
        if let State::Writing(active) = std::mem::replace(&mut self.state, State::Open) {
            let ActiveShard {
                name,
                archive,
                count,
            } = active;
            let size = archive.finish()?;
            self.total_bytes += size;
            debug!("closed shard {name}: {count} samples, {size} bytes");
        }
        Ok(())
    }
}

impl Drop for ShardWriter {
    fn drop(&mut self) {
        if !self.is_closed()
            && let Err(e) = self.close()
        {
            warn!("failed to close writer at {}: {e}", self.store.root().display());
        }
    }
}
