//! Shards are plain tar archives with one entry per directory or leaf member,
//! so any tar tool can list or extract them.
//!
//! Facts a tar header cannot carry travel in a PAX extended header ahead of
//! the member they describe:
//!
//! ```text
//! SHARDSET.compression  compression applied to a leaf (absent when stored)
//! SHARDSET.size         decompressed length of a compressed leaf
//! SHARDSET.length       element count of a sequence directory
//! ```
//!
//! A finalized shard ends with the two zero blocks that close a tar archive.
//! A shard without them was never finalized and is rejected.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tar::{EntryType, Header};

use crate::codecs::Compression;
use crate::error::{ShardError, ShardResult};
use crate::path::MemberPath;

pub const PAX_COMPRESSION: &str = "SHARDSET.compression";
pub const PAX_RAW_SIZE: &str = "SHARDSET.size";
pub const PAX_LENGTH: &str = "SHARDSET.length";

const BLOCK: usize = 512;
const END_OF_ARCHIVE: usize = 2 * BLOCK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    File,
    Directory,
}

/// One member of an encoded sample, ready to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub path: MemberPath,
    pub kind: MemberKind,
    pub data: Vec<u8>,
    /// Element count, recorded on sequence directories.
    pub length: Option<usize>,
}

impl Member {
    pub fn file(path: MemberPath, data: Vec<u8>) -> Self {
        Member {
            path,
            kind: MemberKind::File,
            data,
            length: None,
        }
    }

    pub fn directory(path: MemberPath) -> Self {
        Member {
            path,
            kind: MemberKind::Directory,
            data: Vec::new(),
            length: None,
        }
    }

    pub fn sequence(path: MemberPath, length: usize) -> Self {
        Member {
            length: Some(length),
            ..Member::directory(path)
        }
    }
}

/// A member located by [`scan`]. `range` addresses the stored bytes within
/// the shard.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub path: MemberPath,
    pub kind: MemberKind,
    pub compression: Compression,
    pub range: Range<usize>,
    pub raw_len: usize,
    pub length: Option<usize>,
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Collects the tar blocks of one sample before they reach the file.
#[derive(Debug, Default)]
struct Staging {
    pending: Vec<u8>,
}

impl Write for Staging {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct ArchiveWriter {
    builder: tar::Builder<Staging>,
    file: File,
    path: PathBuf,
    committed: u64,
    finished: bool,
    poisoned: bool,
}

impl ArchiveWriter {
    /// Create a new shard at `path`. Fails if the file already exists.
    pub fn create(path: impl AsRef<Path>) -> ShardResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self::from_file(file, path))
    }

    fn from_file(file: File, path: PathBuf) -> Self {
        ArchiveWriter {
            builder: tar::Builder::new(Staging::default()),
            file,
            path,
            committed: 0,
            finished: false,
            poisoned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes committed to the shard so far, tar headers and padding included.
    pub fn bytes_written(&self) -> u64 {
        self.committed
    }

    /// Append every member of one sample with a single write, returning the
    /// number of bytes added.
    ///
    /// Either the whole sample lands in the file or none of it does: a
    /// member that fails to encode discards the staged blocks, and a failed
    /// write cuts the file back to the previous sample. A shard that cannot
    /// be cut back refuses further appends.
    pub fn append(&mut self, members: &[Member], compression: Compression) -> ShardResult<u64> {
        if self.poisoned {
            return Err(self.poisoned_error());
        }
        if self.finished {
            return Err(ShardError::WriterClosed);
        }
        if let Err(e) = members.iter().try_for_each(|m| self.stage(m, compression)) {
            self.builder.get_mut().pending.clear();
            return Err(e);
        }
        self.commit()
    }

    /// Write the end-of-archive blocks and sync. Returns the final shard size.
    pub fn finish(mut self) -> ShardResult<u64> {
        self.finish_inner()?;
        Ok(self.committed)
    }

    fn stage(&mut self, member: &Member, compression: Compression) -> ShardResult<()> {
        let path = member.path.to_string();
        let encode_error = |e: io::Error| ShardError::Encode {
            path: path.clone(),
            reason: e.to_string(),
        };

        let mut header = Header::new_ustar();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        match member.kind {
            MemberKind::Directory => {
                if let Some(length) = member.length {
                    let length = length.to_string();
                    self.builder
                        .append_pax_extensions([(PAX_LENGTH, length.as_bytes())])
                        .map_err(encode_error)?;
                }
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                self.builder
                    .append_data(&mut header, &path, io::empty())
                    .map_err(encode_error)?;
            }
            MemberKind::File => {
                let stored = compression
                    .compress(&member.data)
                    .map_err(|e| ShardError::Encode {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                if !matches!(compression, Compression::Stored) {
                    let raw_size = member.data.len().to_string();
                    self.builder
                        .append_pax_extensions([
                            (PAX_COMPRESSION, compression.name().as_bytes()),
                            (PAX_RAW_SIZE, raw_size.as_bytes()),
                        ])
                        .map_err(encode_error)?;
                }
                header.set_entry_type(EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(stored.len() as u64);
                self.builder
                    .append_data(&mut header, &path, stored.as_ref())
                    .map_err(encode_error)?;
            }
        }
        Ok(())
    }

    /// Move the staged blocks into the file.
    fn commit(&mut self) -> ShardResult<u64> {
        let staging = self.builder.get_mut();
        let written = self.file.write_all(&staging.pending);
        let len = staging.pending.len() as u64;
        staging.pending.clear();
        if let Err(e) = written {
            self.roll_back();
            return Err(e.into());
        }
        self.committed += len;
        Ok(len)
    }

    fn roll_back(&mut self) {
        let restored = self
            .file
            .set_len(self.committed)
            .and_then(|()| self.file.seek(SeekFrom::Start(self.committed)).map(drop));
        if let Err(e) = restored {
            tracing::warn!(
                "cannot restore {} to {} bytes: {e}",
                self.path.display(),
                self.committed
            );
            self.poisoned = true;
        }
    }

    fn poisoned_error(&self) -> ShardError {
        ShardError::integrity(
            self.path.display(),
            "a failed append left the shard in an unknown state",
        )
    }

    fn finish_inner(&mut self) -> ShardResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.poisoned {
            return Err(self.poisoned_error());
        }
        self.builder.finish()?;
        self.commit()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("path", &self.path)
            .field("committed", &self.committed)
            .field("finished", &self.finished)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish_inner() {
            tracing::warn!("failed to finalize {}: {e}", self.path.display());
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Annotations {
    compression: Option<String>,
    raw_size: Option<u64>,
    length: Option<u64>,
}

impl Annotations {
    fn read<R: io::Read>(entry: &mut tar::Entry<'_, R>) -> Result<Self, String> {
        let mut annotations = Annotations::default();
        let Some(extensions) = entry.pax_extensions().map_err(|e| e.to_string())? else {
            return Ok(annotations);
        };
        for extension in extensions {
            let extension = extension.map_err(|e| e.to_string())?;
            let (Ok(key), Ok(value)) = (extension.key(), extension.value()) else {
                continue;
            };
            let number = || {
                value
                    .parse::<u64>()
                    .map_err(|e| format!("bad {key} value {value:?}: {e}"))
            };
            match key {
                PAX_COMPRESSION => annotations.compression = Some(value.to_string()),
                PAX_RAW_SIZE => annotations.raw_size = Some(number()?),
                PAX_LENGTH => annotations.length = Some(number()?),
                _ => {}
            }
        }
        Ok(annotations)
    }
}

/// Walk every member of a finalized shard in write order.
///
/// `location` names the shard in error messages.
pub fn scan(source: &Bytes, location: &str) -> ShardResult<Vec<Entry>> {
    let broken = |reason: String| ShardError::integrity(location, reason);

    let mut archive = tar::Archive::new(source.as_ref());
    let members = archive
        .entries()
        .map_err(|e| broken(format!("not a tar archive: {e}")))?;

    let mut entries = Vec::new();
    let mut end = 0usize;
    for member in members {
        let mut member = member.map_err(|e| broken(format!("unreadable member: {e}")))?;
        let name = String::from_utf8(member.path_bytes().into_owned())
            .map_err(|e| broken(format!("member path is not UTF-8: {e}")))?;
        let path: MemberPath = name
            .trim_end_matches('/')
            .parse()
            .map_err(|e: ShardError| broken(e.to_string()))?;
        let kind = match member.header().entry_type() {
            EntryType::Regular => MemberKind::File,
            EntryType::Directory => MemberKind::Directory,
            other => return Err(broken(format!("member {path} has unsupported type {other:?}"))),
        };
        let annotations =
            Annotations::read(&mut member).map_err(|e| broken(format!("member {path}: {e}")))?;

        let range = usize::try_from(member.raw_file_position())
            .ok()
            .zip(usize::try_from(member.size()).ok())
            .and_then(|(start, len)| Some(start..start.checked_add(len)?))
            .filter(|range| range.end <= source.len())
            .ok_or_else(|| broken(format!("member {path} runs past the end of the shard")))?;
        end = range.end.next_multiple_of(BLOCK);

        let compression = match &annotations.compression {
            None => Compression::Stored,
            Some(name) => {
                Compression::from_name(name).map_err(|e| broken(format!("member {path}: {e}")))?
            }
        };
        let raw_len = match (compression, annotations.raw_size) {
            (Compression::Stored, None) => range.len(),
            (Compression::Stored, Some(_)) => {
                return Err(broken(format!("stored member {path} records a raw size")));
            }
            (_, None) => {
                return Err(broken(format!("compressed member {path} lacks its raw size")));
            }
            (_, Some(raw)) => usize::try_from(raw)
                .ok()
                .filter(|&raw| raw <= compression.max_raw_len(range.len()))
                .ok_or_else(|| {
                    broken(format!(
                        "member {path} claims {raw} bytes from {} {} stored bytes",
                        range.len(),
                        compression.name()
                    ))
                })?,
        };
        let length = match (kind, annotations.length) {
            (MemberKind::Directory, length) => length
                .map(usize::try_from)
                .transpose()
                .map_err(|_| broken(format!("sequence {path} is too long")))?,
            (MemberKind::File, Some(_)) => {
                return Err(broken(format!("file member {path} records a length")));
            }
            (MemberKind::File, None) => None,
        };
        if kind == MemberKind::Directory && (!range.is_empty() || annotations.compression.is_some())
        {
            return Err(broken(format!("directory member {path} carries data")));
        }

        entries.push(Entry {
            path,
            kind,
            compression,
            range,
            raw_len,
            length,
        });
    }

    let trailer = source.get(end..).unwrap_or_default();
    if trailer.len() < END_OF_ARCHIVE || trailer.iter().any(|&b| b != 0) {
        return Err(broken("unfinished shard: missing end-of-archive blocks".into()));
    }
    Ok(entries)
}
