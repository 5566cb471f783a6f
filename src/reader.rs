//! Reading samples back out of a dataset directory.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tracing::{debug, info};

use crate::archive::scan;
use crate::codecs::CodecRegistry;
use crate::error::{ShardError, ShardResult};
use crate::features::Features;
use crate::info::{DatasetInfo, ShardRun};
use crate::mapper::{DecodeContext, MemberTree, decode_sample};
use crate::path::Segment;
use crate::store::{DATASET_INFO_FILENAME, LocalStore};
use crate::value::Value;

/// One reconstructed sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Shard file holding the sample.
    pub shard: String,
    /// Index of the sample within its shard.
    pub index: usize,
    /// Position of the sample in the whole dataset.
    pub position: usize,
    pub value: Value,
}

// ---------------------------------------------------------------------------
// ShardIndex
// ---------------------------------------------------------------------------

/// Path index of one shard, built by a single sequential scan.
#[derive(Debug)]
pub struct ShardIndex {
    name: String,
    source: Bytes,
    samples: Vec<MemberTree>,
}

impl ShardIndex {
    pub fn open(store: &LocalStore, name: &str) -> ShardResult<Self> {
        let source = store.open_shard(name)?;
        Self::build(name, source)
    }

    /// Index the shard bytes in `source`. Every member must belong to a
    /// sample, and sample indices must run from zero without gaps.
    pub fn build(name: &str, source: Bytes) -> ShardResult<Self> {
        let entries = scan(&source, name)?;
        let member_count = entries.len();

        let mut by_sample: BTreeMap<usize, MemberTree> = BTreeMap::new();
        for entry in entries {
            let segments = entry.path.segments().to_vec();
            let Some((Segment::Index(sample), rest)) = segments.split_first() else {
                return Err(ShardError::integrity(
                    name,
                    format!("member {} belongs to no sample", entry.path),
                ));
            };
            by_sample
                .entry(*sample)
                .or_default()
                .insert(rest, entry)
                .map_err(|dup| {
                    ShardError::integrity(name, format!("duplicate member {}", dup.path))
                })?;
        }

        let mut samples = Vec::with_capacity(by_sample.len());
        for (expected, (index, tree)) in by_sample.into_iter().enumerate() {
            if index != expected {
                return Err(ShardError::integrity(
                    name,
                    format!("sample {expected} is missing"),
                ));
            }
            samples.push(tree);
        }

        debug!(
            "indexed shard {name}: {} samples, {member_count} members",
            samples.len()
        );
        Ok(ShardIndex {
            name: name.to_string(),
            source,
            samples,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Member tree of sample `index`.
    pub fn sample(&self, index: usize) -> Option<&MemberTree> {
        self.samples.get(index)
    }

    pub fn decode(
        &self,
        features: &Features,
        registry: &CodecRegistry,
        index: usize,
    ) -> ShardResult<Value> {
        let tree = self.sample(index).ok_or_else(|| {
            ShardError::integrity(&self.name, format!("sample {index} is missing"))
        })?;
        let ctx = DecodeContext {
            registry,
            source: &self.source,
            location: &self.name,
        };
        decode_sample(features, tree, index, &ctx)
    }
}

// ---------------------------------------------------------------------------
// ShardReader
// ---------------------------------------------------------------------------

/// A dataset opened for reading. Shards are opened on first use.
#[derive(Debug)]
pub struct ShardReader {
    store: LocalStore,
    info: DatasetInfo,
    runs: Vec<ShardRun>,
    registry: CodecRegistry,
    indexes: Mutex<HashMap<String, Arc<ShardIndex>>>,
}

impl ShardReader {
    /// Open the dataset described by `path`: either a `dataset_info.json`
    /// file or the directory holding one.
    pub fn from_dataset_info(path: impl AsRef<Path>) -> ShardResult<Self> {
        Self::with_registry(path, CodecRegistry::default())
    }

    pub fn with_registry(path: impl AsRef<Path>, registry: CodecRegistry) -> ShardResult<Self> {
        let path = path.as_ref();
        let info_path = if path.is_dir() {
            path.join(DATASET_INFO_FILENAME)
        } else {
            path.to_path_buf()
        };
        let info = DatasetInfo::read_from(&info_path)?;
        let runs = info.shard_runs()?;
        let root = info_path.parent().unwrap_or_else(|| Path::new(""));
        info!(
            "loaded {}: {} samples in {} shards",
            info_path.display(),
            info.num_samples(),
            runs.len()
        );
        Ok(ShardReader {
            store: LocalStore::new(root),
            info,
            runs,
            registry,
            indexes: Mutex::new(HashMap::new()),
        })
    }

    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    pub fn features(&self) -> &Features {
        &self.info.features
    }

    pub fn len(&self) -> usize {
        self.info.num_samples()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct shard names, in ledger order.
    pub fn shard_names(&self) -> impl Iterator<Item = &str> {
        self.runs.iter().map(|run| run.name.as_str())
    }

    /// Iterate every sample in ledger order. Each call starts over.
    pub fn iter(&self) -> SampleIter<'_> {
        SampleIter {
            reader: self,
            position: 0,
            current: None,
        }
    }

    /// Sample at dataset `position`, or `None` past the end. The owning
    /// shard is indexed on first access and kept for later calls.
    pub fn get(&self, position: usize) -> ShardResult<Option<Sample>> {
        let Some(run) = self.run_for(position) else {
            return Ok(None);
        };
        let index = self.cached_index(run)?;
        self.decode_at(run, &index, position).map(Some)
    }

    fn run_for(&self, position: usize) -> Option<&ShardRun> {
        let i = self.runs.partition_point(|run| run.positions.end <= position);
        self.runs.get(i).filter(|run| run.positions.contains(&position))
    }

    fn cached_index(&self, run: &ShardRun) -> ShardResult<Arc<ShardIndex>> {
        let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = indexes.get(&run.name) {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(self.open_index(run)?);
        indexes.insert(run.name.clone(), Arc::clone(&index));
        Ok(index)
    }

    fn open_index(&self, run: &ShardRun) -> ShardResult<ShardIndex> {
        let index = ShardIndex::open(&self.store, &run.name)?;
        if index.len() != run.positions.len() {
            return Err(ShardError::integrity(
                &run.name,
                format!(
                    "shard holds {} samples, the ledger lists {}",
                    index.len(),
                    run.positions.len()
                ),
            ));
        }
        Ok(index)
    }

    fn decode_at(&self, run: &ShardRun, index: &ShardIndex, position: usize) -> ShardResult<Sample> {
        let within = position - run.positions.start;
        let value = index.decode(&self.info.features, &self.registry, within)?;
        Ok(Sample {
            shard: run.name.clone(),
            index: within,
            position,
            value,
        })
    }
}

impl<'a> IntoIterator for &'a ShardReader {
    type Item = ShardResult<Sample>;
    type IntoIter = SampleIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// SampleIter
// ---------------------------------------------------------------------------

/// Sequential pass over a [`ShardReader`].
///
/// Holds only the shard currently being read; moving to the next shard
/// releases the previous one (lazy handles keep their own slice of it).
/// A shard that fails to open is reported once and its samples skipped.
pub struct SampleIter<'a> {
    reader: &'a ShardReader,
    position: usize,
    current: Option<(usize, Arc<ShardIndex>)>,
}

impl SampleIter<'_> {
    fn shard_for(&mut self, run_idx: usize) -> ShardResult<Arc<ShardIndex>> {
        if let Some((idx, index)) = &self.current
            && *idx == run_idx
        {
            return Ok(Arc::clone(index));
        }
        self.current = None;
        let run = &self.reader.runs[run_idx];
        let index = Arc::new(self.reader.open_index(run)?);
        self.current = Some((run_idx, Arc::clone(&index)));
        Ok(index)
    }
}

impl Iterator for SampleIter<'_> {
    type Item = ShardResult<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader;
        let position = self.position;
        let run_idx = reader
            .runs
            .partition_point(|run| run.positions.end <= position);
        let run = reader.runs.get(run_idx)?;

        let index = match self.shard_for(run_idx) {
            Ok(index) => index,
            Err(e) => {
                self.position = run.positions.end;
                return Some(Err(e));
            }
        };
        self.position += 1;
        Some(reader.decode_at(run, &index, position))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.reader.len().saturating_sub(self.position);
        (0, Some(remaining))
    }
}
