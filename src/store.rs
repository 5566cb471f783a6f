use std::fs::File;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use memmap2::Mmap;

use crate::archive::ArchiveWriter;
use crate::error::{ShardError, ShardResult};

pub const DATASET_INFO_FILENAME: &str = "dataset_info.json";
pub const SHARD_EXTENSION: &str = "tar";

// ---------------------------------------------------------------------------
// LocalStore
// ---------------------------------------------------------------------------

/// A dataset directory: numbered shard files next to one
/// `dataset_info.json`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name of shard `number`, zero-padded to `width` digits.
    pub fn shard_name(number: usize, width: usize) -> String {
        format!("{number:0width$}.{SHARD_EXTENSION}")
    }

    pub fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn info_path(&self) -> PathBuf {
        self.resolve(DATASET_INFO_FILENAME)
    }

    /// Create the directory if needed.
    pub fn ensure_root(&self) -> ShardResult<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Start a new shard. An existing file of the same name is an error.
    pub fn create_shard(&self, name: &str) -> ShardResult<ArchiveWriter> {
        ArchiveWriter::create(self.resolve(name))
    }

    /// Map a finished shard into memory. Any failure to open it means the
    /// ledger points at something that is not there.
    pub fn open_shard(&self, name: &str) -> ShardResult<Bytes> {
        let path = self.resolve(name);
        let unreadable = |e: std::io::Error| {
            ShardError::integrity(name, format!("cannot open {}: {e}", path.display()))
        };
        let file = File::open(&path).map_err(unreadable)?;
        if file.metadata().map_err(unreadable)?.len() == 0 {
            return Ok(Bytes::new());
        }
        // SAFETY: finished shards are never written again; callers must not
        // modify or truncate a shard while it is mapped.
        let mmap = unsafe { Mmap::map(&file) }.map_err(unreadable)?;
        Ok(Bytes::from_owner(mmap))
    }
}
